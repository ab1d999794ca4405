mod common;

use common::*;
use pretty_assertions::assert_eq;
use qcode::*;

fn aliased_roots(n: usize) -> String {
    let roots: Vec<String> = (0..n).map(|i| format!("p{i}: products {{ id }}")).collect();
    format!("{{ {} }}", roots.join(" "))
}

#[test]
fn selector_limit() {
    let co = compiler();

    let qc = compile(&co, &aliased_roots(MAX_SELECTORS), ANON_ROLE);
    assert_eq!(qc.selects.len(), MAX_SELECTORS);
    assert_eq!(qc.selects[99].field_name, "p99");

    let err = compile_err(&co, &aliased_roots(MAX_SELECTORS + 1), ANON_ROLE);
    assert_eq!(err, "selector limit reached (100)");
}

#[test]
fn deeply_nested_documents_fail_cleanly() {
    let co = compiler();

    let mut query = String::new();
    for _ in 0..10_000 {
        query.push_str("{ users ");
    }
    for _ in 0..10_000 {
        query.push('}');
    }

    let err = co.compile(&query, None, ANON_ROLE).unwrap_err();
    assert!(matches!(err, QCodeError::Parse(_)));
}

#[test]
fn deeply_nested_filters_compile() {
    let co = compiler();
    let depth = 10_000;

    let mut query = String::from("{ products(where: ");
    for _ in 0..depth {
        query.push_str("{ not: ");
    }
    query.push_str("{ id: { eq: 1 } }");
    for _ in 0..depth {
        query.push('}');
    }
    query.push_str(") { id } }");

    let qc = compile(&co, &query, ANON_ROLE);
    let nots = qc.selects[0].filter.as_ref().unwrap().walk().filter(|e| e.op == ExpOp::Not).count();

    assert_eq!(nots, depth);
}

#[test]
fn empty_documents() {
    let co = compiler();

    assert!(co.compile("", None, ANON_ROLE).is_err());
    assert_eq!(compile_err(&co, "{ __typename }", ANON_ROLE), "invalid query: no selectors found");
}
