#![allow(dead_code)]

use indexmap::IndexMap;
use qcode::*;
use query_structure::{Catalog, DbColumn, DbFunction, DbInfo, DbSchema, DbType, VirtualTable};
use serde_json::{Map, Value};
use std::sync::Arc;

fn col(table: &str, name: &str, ty: &str) -> DbColumn {
    DbColumn::new("public", table, name, ty)
}

pub fn shop_catalog(db_type: DbType) -> DbSchema {
    let columns = vec![
        col("users", "id", "bigint").primary_key(),
        col("users", "email", "text").unique(),
        col("users", "full_name", "text"),
        col("users", "password", "text"),
        col("products", "id", "bigint").primary_key(),
        col("products", "name", "text"),
        col("products", "price", "numeric"),
        col("products", "tags", "text").array(),
        col("products", "tsv", "tsvector").full_text(),
        col("products", "user_id", "bigint").references("users", "id"),
        col("purchases", "id", "bigint").primary_key(),
        col("purchases", "quantity", "integer"),
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
        DbFunction::new("public", "word_count", "integer").input("value", "text"),
        DbFunction::new("public", "concat_ws", "text").input("sep", "text").input("value", "text"),
    ];

    let blocklist = ["password".to_owned()];
    let mut info = DbInfo::new(db_type, 140000, "public", "shop", columns, functions, &blocklist).unwrap();

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

pub fn compiler() -> Compiler {
    compiler_with(CompilerConfig::default())
}

pub fn compiler_with(config: CompilerConfig) -> Compiler {
    Compiler::new(Arc::new(shop_catalog(DbType::Postgres)), config)
}

pub fn mysql_compiler() -> Compiler {
    Compiler::new(Arc::new(shop_catalog(DbType::Mysql)), CompilerConfig::default())
}

pub fn catalog(co: &Compiler) -> &dyn Catalog {
    co.catalog()
}

pub fn compile(co: &Compiler, query: &str, role: &str) -> QCode {
    co.compile(query, None, role).unwrap()
}

pub fn compile_err(co: &Compiler, query: &str, role: &str) -> String {
    co.compile(query, None, role).unwrap_err().to_string()
}

pub fn compile_with_vars(co: &Compiler, query: &str, vars: Value, role: &str) -> QCodeResult<QCode> {
    let vars: Map<String, Value> = match vars {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    co.compile(query, Some(&vars), role)
}

pub fn filter(qc: &QCode, id: SelectId) -> String {
    qc.selects[id].filter.as_ref().map(ToString::to_string).unwrap_or_default()
}

pub fn field_names(sel: &Select) -> Vec<&str> {
    sel.fields.iter().map(|f| f.name.as_str()).collect()
}

/// `user` may read `id` and `name` of its own products, and writes them with its id preset.
pub fn user_products_policy() -> TableRoleConfig {
    let mut config = TableRoleConfig::default();

    config.query.filters = vec!["{ user_id: { eq: $user_id } }".to_owned()];
    config.query.columns = vec!["id".to_owned(), "name".to_owned()];
    config.query.limit = 5;
    config.insert.presets = IndexMap::from([("user_id".to_owned(), "$user_id".to_owned())]);
    config.update.filters = vec!["{ user_id: { eq: $user_id } }".to_owned()];
    config.delete.block = true;

    config
}
