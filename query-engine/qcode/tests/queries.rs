mod common;

use common::*;
use indoc::indoc;
use pretty_assertions::assert_eq;
use qcode::*;
use query_structure::{Catalog, DbType, RelType};
use serde_json::json;

#[test]
fn root_and_nested_selects_get_ids_in_discovery_order() {
    let co = compiler();
    let qc = compile(
        &co,
        "{ users { id products { id name } email } purchases { id } }",
        ANON_ROLE,
    );

    assert_eq!(qc.kind, QType::Query);
    assert_eq!(qc.roots, [0, 1]);
    assert_eq!(qc.selects.len(), 3);

    let ids: Vec<_> = qc.selects.iter().map(|s| (s.id, s.parent_id, s.table.as_str())).collect();
    assert_eq!(ids, [(0, None, "users"), (1, None, "purchases"), (2, Some(0), "products")]);

    assert_eq!(qc.selects[0].children, [2]);
    assert_eq!(field_names(&qc.selects[0]), ["id", "email"]);
}

#[test]
fn child_rows_are_joined_on_the_parent_key() {
    let co = compiler();
    let qc = compile(&co, "{ users { id products { id name } } }", ANON_ROLE);

    let products = &qc.selects[1];
    assert_eq!(products.rel_kind(), RelType::OneToOne);
    assert!(!products.singular);
    assert_eq!(filter(&qc, 1), "eq(products.user_id, users_0.id)");

    // The key the join needs is read even though it was not asked for.
    assert!(qc.selects[0].base_cols.iter().any(|c| c.col.name == "id"));
}

#[test]
fn parent_rows_are_singular() {
    let co = compiler();
    let qc = compile(&co, "{ products { id user { id email } } }", ANON_ROLE);

    let user = &qc.selects[1];
    assert_eq!(user.table, "users");
    assert!(user.singular);
    assert_eq!(filter(&qc, 1), "eq(users.id, products_0.user_id)");
    assert!(qc.selects[0].base_cols.iter().any(|c| c.col.name == "user_id"));
}

#[test]
fn join_tables_become_parent_joins() {
    let co = compiler();
    let qc = compile(&co, "{ products { id customer { id email } } }", ANON_ROLE);

    let customer = &qc.selects[1];
    assert_eq!(customer.table, "users");
    assert!(!customer.singular);
    assert_eq!(filter(&qc, 1), "eq(users.id, purchases.customer_id)");

    let joins: Vec<_> = customer.parent_joins().collect();
    assert_eq!(joins.len(), 1);
    assert_eq!(
        joins[0].filter.as_ref().unwrap().to_string(),
        "eq(purchases.product_id, products_0.id)"
    );
}

#[test]
fn table_aliases_and_by_id_selects() {
    let co = compiler();

    let qc = compile(&co, "{ me { id email } }", ANON_ROLE);
    assert_eq!(qc.selects[0].ti.name, "users");

    let qc = compile(&co, "{ products_by_id(id: 3) { id } }", ANON_ROLE);
    assert_eq!(qc.selects[0].table, "products");
    assert!(qc.selects[0].singular);
    assert_eq!(filter(&qc, 0), "eq(products.id, 3)");
}

#[test]
fn id_lookups_keep_other_row_filters() {
    let co = compiler();

    let qc = compile(&co, r#"{ products(where: { name: { eq: "a" } }, id: 3) { id } }"#, ANON_ROLE);
    assert_eq!(filter(&qc, 0), "and(eq(products.name, 'a'), eq(products.id, 3))");

    let qc = compile(&co, r#"{ products(id: 3, where: { name: { eq: "a" } }) { id } }"#, ANON_ROLE);
    assert_eq!(filter(&qc, 0), "and(eq(products.id, 3), eq(products.name, 'a'))");
    assert!(qc.selects[0].singular);
}

#[test]
fn camel_case_names() {
    let co = compiler_with(CompilerConfig {
        enable_camelcase: true,
        ..Default::default()
    });

    let qc = compile(&co, "{ productsByID(id: 3) { id userId } }", ANON_ROLE);
    let sel = &qc.selects[0];

    assert_eq!(sel.table, "products");
    assert_eq!(field_names(sel), ["id", "userId"]);
    assert_eq!(sel.fields[1].column().unwrap().name, "user_id");
}

#[test]
fn fragments_expand_in_place() {
    let co = compiler();
    let qc = compile(
        &co,
        indoc! {r#"
            query getProducts {
              products { ...Basics price }
            }

            fragment Basics on products { id name }
        "#},
        ANON_ROLE,
    );

    assert_eq!(qc.name, "getProducts");
    assert_eq!(field_names(&qc.selects[0]), ["id", "name", "price"]);
}

#[test]
fn variables_and_their_defaults() {
    let co = compiler();
    let qc = compile(&co, "query q($id: Int = 5, $name: String) { products(id: $id) { id } }", ANON_ROLE);

    assert_eq!(qc.vars[0].name, "id");
    assert_eq!(qc.vars[0].default, Some(json!(5)));
    assert_eq!(qc.vars[1].default, None);
    assert_eq!(filter(&qc, 0), "eq(products.id, $id)");
}

#[test]
fn where_with_logical_operators() {
    let co = compiler();
    let qc = compile(
        &co,
        "{ products(where: { id: { and: { greater_or_equals: 20, lt: 28 } } }) { id } }",
        ANON_ROLE,
    );

    assert_eq!(filter(&qc, 0), "and(gte(products.id, 20), lt(products.id, 28))");
}

#[test]
fn where_through_two_relationships() {
    let co = compiler();
    let qc = compile(
        &co,
        r#"{ comments(where: { products: { users: { email: { eq: "a@b.c" } } } }) { id } }"#,
        ANON_ROLE,
    );

    let exp = qc.selects[0].filter.as_ref().unwrap();
    assert_eq!(exp.to_string(), "eq(users.email, 'a@b.c')");
    assert_eq!(exp.joins.len(), 2);
    assert!(exp.joins.iter().all(|j| j.local));
}

#[test]
fn where_with_an_unrelated_segment() {
    let co = compiler();
    let err = compile_err(
        &co,
        r#"{ comments(where: { products: { nothing: { email: { eq: "a" } } } }) { id } }"#,
        ANON_ROLE,
    );

    assert_eq!(err, "where: [Where] 'nothing' is not related to 'products'");
}

#[test]
fn aggregates_and_functions() {
    let co = compiler();
    let qc = compile(&co, "{ products { count_id sum_price } comments { word_count_body } }", ANON_ROLE);

    let products = &qc.selects[0];
    assert!(products.group_cols);

    let count = products.fields[0].function().unwrap();
    assert_eq!((count.name.as_str(), count.agg), ("count", true));
    assert_eq!(products.fields[0].args[0].col.as_ref().unwrap().name, "id");

    let words = qc.selects[1].fields[0].function().unwrap();
    assert_eq!(words.name, "word_count");
    assert!(words.func.is_some());
}

#[test]
fn aggregates_can_be_disabled() {
    let co = compiler_with(CompilerConfig {
        disable_agg_functions: true,
        ..Default::default()
    });

    let err = compile_err(&co, "{ products { count_id } }", ANON_ROLE);
    assert_eq!(err, "aggregation disabled: db function 'count' cannot be used");

    let co = compiler_with(CompilerConfig {
        disable_functions: true,
        ..Default::default()
    });

    let err = compile_err(&co, "{ products { count_id } }", ANON_ROLE);
    assert_eq!(err, "all db functions blocked: count (role: 'anon')");
}

#[test]
fn full_text_search() {
    let co = compiler();
    let qc = compile(
        &co,
        r#"{ products(search: "shoes") { id search_rank search_headline_name } }"#,
        ANON_ROLE,
    );

    let sel = &qc.selects[0];
    assert_eq!(filter(&qc, 0), "tsquery('shoes')");
    assert_eq!(sel.internal_arg("search").unwrap().val, "shoes");
    assert_eq!(sel.fields[1].function().unwrap().name, "search_rank");
    assert_eq!(sel.fields[2].args[0].col.as_ref().unwrap().name, "name");

    let err = compile_err(&co, "{ products { id search_rank } }", ANON_ROLE);
    assert_eq!(err, "no search defined: search_rank");

    let err = compile_err(&co, r#"{ users(search: "bob") { id } }"#, ANON_ROLE);
    assert_eq!(err, "search: no tsvector column defined on table 'users'");
}

#[test]
fn order_by_own_and_related_columns() {
    let co = compiler();
    let qc = compile(
        &co,
        "{ products(order_by: { price: desc, user: { email: asc } }) { id } }",
        ANON_ROLE,
    );

    let sel = &qc.selects[0];
    let order: Vec<_> = sel.order_by.iter().map(|ob| (ob.col.table.as_str(), ob.col.name.as_str(), ob.order)).collect();

    assert_eq!(order, [("products", "price", Order::Desc), ("users", "email", Order::Asc)]);
    assert!(sel.base_cols.iter().any(|c| c.col.name == "price"));
    assert!(sel.joins.iter().all(|j| j.local));
    assert!(!sel.joins.is_empty());
}

#[test]
fn order_by_a_column_twice() {
    let co = compiler();
    let err = compile_err(&co, "{ products(order_by: { price: desc, price: asc }) { id } }", ANON_ROLE);

    assert_eq!(err, "order_by: argument 'price', can only be defined once");
}

#[test]
fn order_by_variable_expands_configured_sorts() {
    let mut config = CompilerConfig::default();
    config.tables.push(TableConfig {
        name: "products".to_owned(),
        order_by: [
            ("cheapest".to_owned(), vec![["price".to_owned(), "asc".to_owned()]]),
            ("newest".to_owned(), vec![["id".to_owned(), "desc".to_owned()]]),
        ]
        .into_iter()
        .collect(),
    });

    let co = compiler_with(config);
    let qc = compile(&co, "query q($order: String) { products(order_by: $order) { id } }", ANON_ROLE);

    let keys: Vec<_> = qc.selects[0].order_by.iter().map(|ob| (ob.key_var.as_str(), ob.key.as_str())).collect();
    assert_eq!(keys, [("order", "cheapest"), ("order", "newest")]);

    let err = compile_err(&co, "query q($order: String) { users(order_by: $order) { id } }", ANON_ROLE);
    assert_eq!(err, "order_by: no order by options defined for table 'users'");
}

#[test]
fn forward_cursor_paging() {
    let co = compiler();
    let qc = compile(&co, "{ products(first: 1, after: $cursor) { id name } }", ANON_ROLE);
    let sel = &qc.selects[0];

    assert_eq!(sel.paging.kind, PagingType::Forward);
    assert_eq!(sel.paging.limit, 1);
    assert!(sel.paging.cursor);
    assert_eq!(sel.order_by[0].col.name, "id");
    assert_eq!(filter(&qc, 0), "or(is_null(__cur.id), gt(products.id, __cur.id))");
}

#[test]
fn backward_cursor_paging() {
    let co = compiler();
    let qc = compile(&co, "{ products(last: 1, before: $cursor) { id name } }", ANON_ROLE);
    let sel = &qc.selects[0];

    assert_eq!(sel.paging.kind, PagingType::Backward);
    assert_eq!(sel.order_by[0].order, Order::Desc);
    assert_eq!(filter(&qc, 0), "or(is_null(__cur.id), lt(products.id, __cur.id))");
}

#[test]
fn cursor_over_several_sort_columns() {
    let co = compiler();
    let qc = compile(
        &co,
        "{ products(first: 10, after: $cursor, order_by: { price: desc }) { id } }",
        ANON_ROLE,
    );

    assert_eq!(
        filter(&qc, 0),
        "or(is_null(__cur.price), lt(products.price, __cur.price), and(eq(products.price, __cur.price), gt(products.id, __cur.id)))"
    );
}

#[test]
fn cursor_must_be_named_cursor() {
    let co = compiler();
    let err = compile_err(&co, "{ products(first: 1, after: $page) { id } }", ANON_ROLE);

    assert_eq!(err, "after: value for argument 'after' must be a variable named $cursor");
}

#[test]
fn limits_and_offsets() {
    let co = compiler();

    let qc = compile(&co, "{ products { id } }", ANON_ROLE);
    assert_eq!(qc.selects[0].paging.limit, DEFAULT_LIMIT);

    let qc = compile(&co, "{ products(limit: $n, offset: 10) { id } }", ANON_ROLE);
    assert_eq!(qc.selects[0].paging.limit_var.as_deref(), Some("n"));
    assert_eq!(qc.selects[0].paging.offset, 10);

    let qc = compile(&co, "{ products @object { id } }", ANON_ROLE);
    assert_eq!(qc.selects[0].paging.limit, 1);
    assert!(qc.selects[0].singular);

    let co = compiler_with(CompilerConfig {
        default_limit: 50,
        ..Default::default()
    });

    let qc = compile(&co, "{ products { id } }", ANON_ROLE);
    assert_eq!(qc.selects[0].paging.limit, 50);
}

#[test]
fn distinct_on() {
    let co = compiler();
    let qc = compile(&co, r#"{ products(distinct_on: ["name"]) { id } }"#, ANON_ROLE);

    assert_eq!(qc.selects[0].distinct_on[0].name, "name");

    let co = mysql_compiler();
    let qc = compile(&co, r#"{ products(distinct_on: ["name"]) { id } }"#, ANON_ROLE);

    assert!(qc.selects[0].distinct_on.is_empty());
    assert_eq!(qc.selects[0].order_by[0].col.name, "name");
}

#[test]
fn mysql_restrictions() {
    let co = mysql_compiler();
    assert_eq!(catalog(&co).db_type(), DbType::Mysql);

    let err = compile_err(&co, "{ products(limit: $n) { id } }", ANON_ROLE);
    assert_eq!(err, "limit: value for argument 'limit' must be a number (mysql)");

    let err = compile_err(&co, r#"{ users(search: "bob") { id } }"#, ANON_ROLE);
    assert_eq!(err, "search: no fulltext indexes defined for table 'users'");
}

#[test]
fn self_referencing_tables() {
    let co = compiler();
    let qc = compile(
        &co,
        r#"{ comments { id replies: comments(find: "children") { id body } } }"#,
        ANON_ROLE,
    );

    let replies = &qc.selects[1];
    assert_eq!(replies.field_name, "replies");
    assert_eq!(replies.rel_kind(), RelType::Recursive);

    let filter = replies.filter.as_ref().unwrap();
    assert_eq!(filter.op, ExpOp::And);
    assert_eq!(filter.children.len(), 3);

    let err = compile_err(&co, "{ comments { id comments { id } } }", ANON_ROLE);
    assert_eq!(err, "argument 'find' needed for recursive queries");

    let err = compile_err(&co, r#"{ products(find: "children") { id } }"#, ANON_ROLE);
    assert_eq!(err, "find: selector 'products' is not recursive");
}

#[test]
fn polymorphic_unions() {
    let co = compiler();
    let qc = compile(
        &co,
        indoc! {r#"
            {
              notifications {
                id
                verb
                subject {
                  ... on users { email }
                  ... on products { name }
                }
              }
            }
        "#},
        ANON_ROLE,
    );

    let kinds: Vec<_> = qc.selects.iter().map(|s| (s.kind, s.ti.name.as_str())).collect();
    assert_eq!(
        kinds,
        [
            (SelType::None, "notifications"),
            (SelType::Union, "subject"),
            (SelType::Member, "users"),
            (SelType::Member, "products"),
        ]
    );

    assert!(qc.selects[1].singular);
    assert!(filter(&qc, 2).contains("'users'"));
    assert!(filter(&qc, 3).contains("'products'"));
}

#[test]
fn typename_fields() {
    let co = compiler();
    let qc = compile(&co, "query q { __typename products { id __typename } }", ANON_ROLE);

    assert!(qc.typename);
    assert_eq!(qc.roots.len(), 1);
    assert!(qc.selects[0].typename);
}

#[test]
fn unknown_names() {
    let co = compiler();

    assert_eq!(compile_err(&co, "{ products { nope } }", ANON_ROLE), "field 'nope' is not a column or a function");
    assert_eq!(compile_err(&co, "{ products(foo: 1) { id } }", ANON_ROLE), "unknown argument 'foo'");
    assert_eq!(
        compile_err(&co, "{ users { products(id: 1) { id } } }", ANON_ROLE),
        "id: can only be specified at the query root"
    );
}

#[test]
fn parse_errors_surface() {
    let co = compiler();
    let err = co.compile("{ products { id ", None, ANON_ROLE).unwrap_err();

    assert!(matches!(err, QCodeError::Parse(_)));
}
