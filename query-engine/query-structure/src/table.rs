use crate::{DbColumn, DbFunction, SchemaError, SchemaResult};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    #[default]
    Table,
    /// A set-returning database function.
    Function,
    /// Stand-in for the targets of a polymorphic relationship.
    Virtual,
    /// Rows stored inside a json column of another table.
    Json,
    /// Data resolved outside of the database.
    Remote,
}

impl TableKind {
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "function" => TableKind::Function,
            "virtual" => TableKind::Virtual,
            "json" | "jsonb" => TableKind::Json,
            "remote" => TableKind::Remote,
            _ => TableKind::Table,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableKind::Table => "table",
            TableKind::Function => "function",
            TableKind::Virtual => "virtual",
            TableKind::Json => "json",
            TableKind::Remote => "remote",
        };

        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DbTable {
    pub comment: String,
    pub schema: String,
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<DbColumn>,
    pub primary_col: Option<DbColumn>,
    /// Link column of json, virtual and remote tables.
    pub secondary_col: Option<DbColumn>,
    pub full_text: Vec<DbColumn>,
    pub blocked: bool,
    pub func: Option<DbFunction>,
    col_index: HashMap<String, usize>,
}

impl DbTable {
    /// Builds a table, stamping schema and table name on every column.
    pub fn new(schema: impl Into<String>, name: impl Into<String>, kind: TableKind, mut columns: Vec<DbColumn>) -> Self {
        let schema = schema.into();
        let name = name.into();

        let mut primary_col = None;
        let mut full_text = Vec::new();
        let mut col_index = HashMap::with_capacity(columns.len());

        for (i, col) in columns.iter_mut().enumerate() {
            col.schema.clone_from(&schema);
            col.table.clone_from(&name);

            if col.full_text {
                full_text.push(col.clone());
            } else if col.primary_key && primary_col.is_none() {
                primary_col = Some(col.clone());
            }

            col_index.insert(col.name.clone(), i);
        }

        Self {
            comment: String::new(),
            schema,
            name,
            kind,
            columns,
            primary_col,
            secondary_col: None,
            full_text,
            blocked: false,
            func: None,
            col_index,
        }
    }

    pub fn column(&self, name: &str) -> Option<&DbColumn> {
        self.col_index.get(name).map(|&i| &self.columns[i])
    }

    pub fn get_column(&self, name: &str) -> SchemaResult<&DbColumn> {
        self.column(name).ok_or_else(|| SchemaError::ColumnNotFound {
            table: self.name.clone(),
            column: name.to_owned(),
        })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.col_index.contains_key(name)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Declares a polymorphic relationship: any table having both `id_column` and `type_column`
/// can point at rows of several tables through a virtual table called `name`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualTable {
    pub name: String,
    pub id_column: String,
    pub type_column: String,
    pub fkey_column: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_table_indexes_columns_and_picks_primary_key() {
        let table = DbTable::new(
            "public",
            "products",
            TableKind::Table,
            vec![
                DbColumn::new("", "", "id", "bigint").primary_key(),
                DbColumn::new("", "", "name", "text"),
                DbColumn::new("", "", "tsv", "tsvector").full_text(),
            ],
        );

        assert_eq!(table.primary_col.as_ref().map(|c| c.name.as_str()), Some("id"));
        assert_eq!(table.full_text.len(), 1);
        assert_eq!(table.get_column("name").unwrap().table, "products");
        assert_eq!(table.columns[2].schema, "public");
    }

    #[test]
    fn missing_column() {
        let table = DbTable::new("public", "users", TableKind::Table, vec![]);
        let err = table.get_column("email").unwrap_err();

        assert_eq!(err.to_string(), "column: 'users.email' not found");
    }

    #[test]
    fn kind_from_type_name() {
        assert_eq!(TableKind::from_type_name("jsonb"), TableKind::Json);
        assert_eq!(TableKind::from_type_name("remote"), TableKind::Remote);
        assert_eq!(TableKind::from_type_name("anything"), TableKind::Table);
    }
}
