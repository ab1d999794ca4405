mod common;

use common::*;
use enumflags2::BitFlags;
use pretty_assertions::assert_eq;
use qcode::*;
use serde_json::json;

fn steps(qc: &QCode) -> Vec<(MType, &str)> {
    qc.mutates.iter().map(|m| (m.kind, m.ti.name.as_str())).collect()
}

fn columns(m: &Mutate) -> Vec<(&str, &str)> {
    m.cols.iter().map(|c| (c.col.name.as_str(), c.value.as_str())).collect()
}

#[test]
fn insert_from_an_inline_object() {
    let co = compiler();
    let qc = compile(&co, r#"mutation { products(insert: { name: "shoe", price: 10.5 }) { id } }"#, ANON_ROLE);

    assert_eq!(qc.kind, QType::Insert);
    assert_eq!(qc.action_val, Some(json!({ "name": "shoe", "price": 10.5 })));
    assert_eq!(steps(&qc), [(MType::Insert, "products")]);
    assert_eq!(columns(&qc.mutates[0]), [("name", ""), ("price", "")]);
}

#[test]
fn insert_from_a_variable() {
    let co = compiler();
    let query = "mutation create($data: ProductInput!) { products(insert: $data) { id } }";

    let qc = compile_with_vars(&co, query, json!({ "data": [{ "name": "a" }, { "name": "b", "tags": ["x"] }] }), ANON_ROLE).unwrap();

    assert_eq!(qc.action_var, "data");
    assert!(qc.mutates[0].array);
    assert_eq!(columns(&qc.mutates[0]), [("name", ""), ("tags", "")]);

    let err = compile_with_vars(&co, query, json!({}), ANON_ROLE).unwrap_err();
    assert_eq!(err.to_string(), "variable not defined: data");

    let err = compile_with_vars(&co, query, json!({ "data": 5 }), ANON_ROLE).unwrap_err();
    assert_eq!(err.to_string(), "mutation payload must be an object or a list of objects");
}

#[test]
fn nested_children_run_after_their_parent() {
    let co = compiler();
    let qc = compile(
        &co,
        r#"mutation { users(insert: { email: "a@b.c", products: [{ name: "p1" }, { name: "p2" }] }) { id } }"#,
        ANON_ROLE,
    );

    assert_eq!(steps(&qc), [(MType::Insert, "users"), (MType::Insert, "products")]);

    let products = &qc.mutates[1];
    assert!(products.array);
    assert_eq!(products.parent_id, Some(0));
    assert_eq!(products.path, ["products"]);
    assert_eq!(products.depends_on.iter().copied().collect::<Vec<_>>(), [0]);
    assert_eq!(products.rcols[0].col.name, "user_id");
    assert_eq!(products.rcols[0].vcol.name, "id");
    assert_eq!(columns(products), [("name", "")]);

    assert_eq!(qc.mutates[0].children, [1]);
    assert!(qc.mutates[0].depends_on.is_empty());
}

#[test]
fn nested_parents_run_before_their_child() {
    let co = compiler();
    let qc = compile(
        &co,
        r#"mutation { products(insert: { name: "p", user: { email: "a@b.c" } }) { id } }"#,
        ANON_ROLE,
    );

    assert_eq!(steps(&qc), [(MType::Insert, "users"), (MType::Insert, "products")]);

    let products = &qc.mutates[1];
    assert_eq!(products.depends_on.iter().copied().collect::<Vec<_>>(), [0]);
    assert_eq!(products.rcols[0].col.name, "user_id");
    assert_eq!(qc.mutates[0].parent_id, Some(1));
    assert_eq!(qc.mutates[0].key, "user");
}

#[test]
fn connect_links_an_existing_row() {
    let co = compiler();
    let qc = compile(
        &co,
        r#"mutation { products(insert: { name: "p", user: { connect: { id: 5 } } }) { id } }"#,
        ANON_ROLE,
    );

    assert_eq!(
        steps(&qc),
        [(MType::Connect, "users"), (MType::Insert, "products"), (MType::None, "users")]
    );

    let connect = &qc.mutates[0];
    assert_eq!(connect.filter.as_ref().unwrap().to_string(), "eq(users.id, 5)");
    assert_eq!(connect.parent_id, Some(1));

    let products = &qc.mutates[1];
    assert_eq!(products.depends_on.iter().copied().collect::<Vec<_>>(), [0]);
    assert_eq!(products.rcols[0].col.name, "user_id");

    let holder = &qc.mutates[2];
    assert_eq!(holder.links, BitFlags::from(LinkAction::Connect));

    assert_eq!(qc.munions["users"], [0]);
    assert_eq!(qc.munions["products"], [1]);
}

#[test]
fn connect_several_rows() {
    let co = compiler();
    let qc = compile(
        &co,
        r#"mutation { users(insert: { email: "a", products: { connect: [{ id: 1 }, { id: 2 }] } }) { id } }"#,
        ANON_ROLE,
    );

    let connect = qc.mutates.iter().find(|m| m.kind == MType::Connect).unwrap();
    assert_eq!(connect.filter.as_ref().unwrap().to_string(), "or(eq(products.id, 1), eq(products.id, 2))");

    let users = qc.mutates.iter().position(|m| m.kind == MType::Insert).unwrap();
    assert!(connect.depends_on.contains(&users));
}

#[test]
fn link_errors() {
    let co = compiler();

    let err = compile_err(
        &co,
        r#"mutation { products(insert: { name: "p", user: { disconnect: { id: 1 } } }) { id } }"#,
        ANON_ROLE,
    );
    assert_eq!(err, "disconnect is only valid with update or upsert");

    let err = compile_err(&co, r#"mutation { products(insert: { connect: { id: 1 } }) { id } }"#, ANON_ROLE);
    assert_eq!(err, "connect is only valid on a nested object");

    let err = compile_err(
        &co,
        r#"mutation { products(insert: { name: "p", user: { connect: [] } }) { id } }"#,
        ANON_ROLE,
    );
    assert_eq!(err, "expecting at least one object to match");
}

#[test]
fn update_with_a_nested_where() {
    let co = compiler();
    let qc = compile(
        &co,
        r#"mutation { users(id: 1, update: { full_name: "x", products: { where: { id: 3 }, name: "n" } }) { id } }"#,
        ANON_ROLE,
    );

    assert_eq!(qc.kind, QType::Update);
    assert_eq!(steps(&qc), [(MType::Update, "users"), (MType::Update, "products")]);
    assert_eq!(qc.mutates[1].filter.as_ref().unwrap().to_string(), "eq(products.id, 3)");
    assert_eq!(columns(&qc.mutates[1]), [("name", "")]);

    let err = compile_err(
        &co,
        r#"mutation { users(id: 1, update: { products: { name: "n" } }) { id } }"#,
        ANON_ROLE,
    );
    assert_eq!(err, "required argument 'where' missing");
}

#[test]
fn update_and_disconnect() {
    let co = compiler();
    let qc = compile(
        &co,
        r#"mutation { products(id: 3, update: { name: "n", user: { disconnect: { id: 1 } } }) { id } }"#,
        ANON_ROLE,
    );

    let disconnect = qc.mutates.iter().find(|m| m.kind == MType::Disconnect).unwrap();
    assert_eq!(disconnect.ti.name, "users");
    assert_eq!(disconnect.filter.as_ref().unwrap().to_string(), "eq(users.id, 1)");
}

#[test]
fn updates_and_deletes_need_a_filter() {
    let co = compiler();

    let err = compile_err(&co, r#"mutation { products(update: { name: "n" }) { id } }"#, ANON_ROLE);
    assert_eq!(err, "where clause required");

    let err = compile_err(&co, "mutation { products(delete: true) { id } }", ANON_ROLE);
    assert_eq!(err, "where clause required");
}

#[test]
fn delete_is_a_single_step() {
    let co = compiler();
    let qc = compile(&co, "mutation { products(delete: true, where: { id: { eq: 1 } }) { id } }", ANON_ROLE);

    assert_eq!(qc.kind, QType::Delete);
    assert_eq!(steps(&qc), [(MType::Delete, "products")]);
    assert_eq!(filter(&qc, 0), "eq(products.id, 1)");

    let err = compile_err(&co, "mutation { products(delete: false, id: 1) { id } }", ANON_ROLE);
    assert_eq!(err, "value for 'delete' must be 'true'");
}

#[test]
fn upsert_from_a_variable() {
    let co = compiler();
    let qc = compile_with_vars(
        &co,
        "mutation { products(upsert: $data, where: { id: { eq: 1 } }) { id } }",
        json!({ "data": { "id": 1, "name": "x" } }),
        ANON_ROLE,
    )
    .unwrap();

    assert_eq!(qc.kind, QType::Upsert);
    assert_eq!(columns(&qc.mutates[0]), [("id", ""), ("name", "")]);
}

#[test]
fn self_referencing_inserts() {
    let co = compiler();
    let qc = compile(
        &co,
        r#"mutation { comments(insert: { body: "a", comments: { body: "b" } }) { id } }"#,
        ANON_ROLE,
    );

    assert_eq!(qc.mutates.len(), 2);
    assert!(qc.mutates[0].path.is_empty());
    assert_eq!(qc.mutates[1].path, ["comments"]);
    assert_eq!(qc.mutates[1].rcols[0].col.name, "reply_to_id");
    assert!(qc.mutates.iter().all(|m| m.multi));

    let err = compile_err(
        &co,
        r#"mutation { comments(insert: { body: "a", comments: { find: "parent", body: "b" } }) { id } }"#,
        ANON_ROLE,
    );
    assert_eq!(err, "a new 'comments' cannot have a parent");
}

#[test]
fn presets_override_the_payload() {
    let co = compiler();
    co.add_role("user", "products", user_products_policy()).unwrap();

    let qc = compile(&co, r#"mutation { products(insert: { name: "x", user_id: 9 }) { id } }"#, "user");

    assert_eq!(columns(&qc.mutates[0]), [("user_id", "{{user_id}}"), ("name", "")]);
}

#[test]
fn role_filters_reach_mutations() {
    let co = compiler();
    co.add_role("user", "products", user_products_policy()).unwrap();

    let qc = compile(&co, r#"mutation { products(id: 3, update: { name: "n" }) { id } }"#, "user");
    assert_eq!(filter(&qc, 0), "and(eq(products.user_id, $user_id), eq(products.id, 3))");

    let err = compile_err(&co, "mutation { products(delete: true, id: 3) { id } }", "user");
    assert_eq!(err, "delete blocked: products (role: user)");
}

#[test]
fn payload_columns_are_checked() {
    let co = compiler();

    let err = compile_err(&co, r#"mutation { users(insert: { email: "a", password: "x" }) { id } }"#, ANON_ROLE);
    assert_eq!(err, "column: 'public.users.password' blocked");

    let mut config = TableRoleConfig::default();
    config.insert.columns = vec!["name".to_owned()];
    co.add_role("writer", "products", config).unwrap();

    let err = compile_err(&co, r#"mutation { products(insert: { name: "a", price: 1 }) { name } }"#, "writer");
    assert_eq!(err, "db column blocked: price (role: 'writer')");
}

#[test]
fn mutation_action_errors() {
    let co = compiler();

    let err = compile_err(&co, "mutation { products { id } }", ANON_ROLE);
    assert_eq!(
        err,
        "mutations must contains one of the following arguments (insert, update, upsert or delete)"
    );

    let err = compile_err(&co, "mutation { products(insert: 5) { id } }", ANON_ROLE);
    assert_eq!(err, "value for argument 'insert' must be a variable, an object or a list of objects");
}

#[test]
fn json_columns_are_not_nested_steps() {
    let co = compiler();
    let err = compile_err(&co, r#"mutation { products(insert: { name: "a", extra: { a: 1 } }) { id } }"#, ANON_ROLE);

    assert_eq!(err, "column: 'products.extra' not found");
}
