use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use query_structure::*;

fn col(table: &str, name: &str, ty: &str) -> DbColumn {
    DbColumn::new("public", table, name, ty)
}

fn shop() -> DbSchema {
    let columns = vec![
        col("users", "id", "bigint").primary_key(),
        col("users", "email", "text").unique(),
        col("users", "full_name", "text"),
        col("products", "id", "bigint").primary_key(),
        col("products", "name", "text"),
        col("products", "price", "numeric"),
        col("products", "user_id", "bigint").references("users", "id"),
        col("purchases", "id", "bigint").primary_key(),
        col("purchases", "customer_id", "bigint").references("users", "id"),
        col("purchases", "product_id", "bigint").references("products", "id"),
        col("comments", "id", "bigint").primary_key(),
        col("comments", "body", "text"),
        col("comments", "product_id", "bigint").references("products", "id"),
        col("comments", "commenter_id", "bigint").references("users", "id"),
        col("comments", "reply_to_id", "bigint").references("comments", "id"),
        col("notifications", "id", "bigint").primary_key(),
        col("notifications", "verb", "text"),
        col("notifications", "subject_id", "bigint"),
        col("notifications", "subject_type", "text"),
    ];

    let functions = vec![
        DbFunction::aggregate("public", "count", "bigint"),
        DbFunction::aggregate("public", "Sum", "numeric"),
        DbFunction::new("public", "concat_ws", "text").input("sep", "text").input("value", "text"),
    ];

    let mut info = DbInfo::new(DbType::Postgres, 140000, "public", "shop", columns, functions, &[]).unwrap();

    info.add_virtual_table(VirtualTable {
        name: "subject".to_owned(),
        id_column: "subject_id".to_owned(),
        type_column: "subject_type".to_owned(),
        fkey_column: "id".to_owned(),
    });

    let mut aliases = IndexMap::new();
    aliases.insert("users".to_owned(), vec!["customers".to_owned(), "me".to_owned()]);

    DbSchema::new(info, &aliases).unwrap()
}

fn describe(path: &[DbRel]) -> Vec<String> {
    path.iter().map(ToString::to_string).collect()
}

#[test]
fn child_holding_the_foreign_key() {
    let schema = shop();
    let path = schema.find_path("products", "users", None).unwrap();

    assert_eq!(describe(&path), ["one_to_one: products.user_id -> users.id"]);
    assert!(path[0].left_holds_key());
}

#[test]
fn parent_holding_the_foreign_key() {
    let schema = shop();
    let path = schema.find_path("user", "products", None).unwrap();

    assert_eq!(describe(&path), ["one_to_many: users.id -> products.user_id"]);
    assert!(!path[0].left_holds_key());
}

#[test]
fn self_reference_is_recursive() {
    let schema = shop();
    let path = schema.find_path("comments", "comments", None).unwrap();

    assert_eq!(describe(&path), ["recursive: comments.reply_to_id -> comments.id"]);
}

#[test]
fn join_through_an_intermediate_table() {
    let schema = shop();
    let path = schema.find_path("customer", "products", None).unwrap();

    assert_eq!(
        describe(&path),
        [
            "one_to_many: users.id -> purchases.customer_id",
            "one_to_one: purchases.product_id -> products.id",
        ]
    );
}

#[test]
fn through_table_narrows_the_path() {
    let schema = shop();
    let path = schema.find_path("users", "products", Some("purchases")).unwrap();

    assert_eq!(path.len(), 2);
    assert_eq!(path[0].right.table.name, "purchases");
    assert_eq!(path[1].right.table.name, "products");
}

#[test]
fn through_column_picks_the_direct_edge() {
    let schema = shop();
    let path = schema.find_path("comments", "users", Some("commenter_id")).unwrap();

    assert_eq!(describe(&path), ["one_to_one: comments.commenter_id -> users.id"]);
}

#[test]
fn through_unknown_column() {
    let schema = shop();
    let err = schema.find_path("comments", "users", Some("author_id")).unwrap_err();

    assert_eq!(err.to_string(), "no relationship found through column: author_id");
}

#[test]
fn unknown_names() {
    let schema = shop();

    assert_eq!(
        schema.find_path("nope", "users", None).unwrap_err(),
        SchemaError::TableNotFound("nope".to_owned())
    );

    assert_eq!(
        schema.find_path("users", "nope", None).unwrap_err().to_string(),
        "table not found: nope"
    );
}

#[test]
fn unrelated_tables() {
    let schema = shop();
    let err = schema.find_path("users", "notifications", None).unwrap_err();

    assert_eq!(err.to_string(), "relationship not found: users -> notifications");
}

#[test]
fn polymorphic_virtual_table() {
    let schema = shop();

    let subject = schema.find("", "subject").unwrap();
    assert_eq!(subject.kind, TableKind::Virtual);

    let path = schema.find_path("subject", "notifications", None).unwrap();
    assert_eq!(describe(&path), ["polymorphic: subject.subject_id -> notifications.id"]);
    assert_eq!(path[0].left.col.fkey_col, "subject_type");

    assert!(schema.virtual_table("subject").is_some());
}

#[test]
fn aliases_resolve_to_the_aliased_table() {
    let schema = shop();

    assert_eq!(schema.find("public", "customers").unwrap().name, "users");
    assert!(schema.is_alias("me"));

    let path = schema.find_path("products", "me", None).unwrap();
    assert_eq!(path[0].right.table.name, "users");
}

#[test]
fn columns_and_relationships_through_the_catalog_trait() {
    let schema: &dyn Catalog = &shop();

    assert_eq!(schema.get_column("", "users", "email").unwrap().ty, "text");
    assert!(schema.get_column("", "users", "password").is_err());

    let rel = schema.get_relationship("products", "users", None).unwrap();
    assert_eq!(rel.kind, RelType::OneToOne);
}

#[test]
fn only_single_argument_functions_are_exposed() {
    let schema = shop();
    let names: Vec<_> = schema.functions().keys().cloned().collect();

    assert_eq!(names, ["count", "sum"]);
    assert_eq!(schema.get_function("SUM").unwrap().name, "Sum");
    assert!(schema.get_function("concat_ws").is_err());
}

#[test]
fn missing_foreign_key_table() {
    let columns = vec![col("orders", "id", "bigint").primary_key(), col("orders", "shop_id", "bigint").references("shops", "id")];
    let info = DbInfo::new(DbType::Postgres, 0, "public", "db", columns, vec![], &[]).unwrap();

    let err = DbSchema::new(info, &IndexMap::new()).unwrap_err();
    assert_eq!(err.to_string(), "foreign key table not found: public.shops");
}

#[test]
fn columns_deserialize_from_json() {
    let json = r#"[
        {"schema": "public", "table": "tags", "name": "id", "type": "int", "primary_key": true},
        {"schema": "public", "table": "tags", "name": "label", "type": "text", "not_null": true}
    ]"#;

    let columns: Vec<DbColumn> = serde_json::from_str(json).unwrap();
    let info = DbInfo::new(DbType::Mysql, 80000, "public", "db", columns, vec![], &[]).unwrap();
    let schema = DbSchema::new(info, &IndexMap::new()).unwrap();

    let tags = schema.find("", "tags").unwrap();
    assert!(tags.get_column("id").unwrap().is_unique());
    assert_eq!(schema.db_type(), DbType::Mysql);
}
