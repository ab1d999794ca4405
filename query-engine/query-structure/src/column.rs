use serde::{Deserialize, Serialize};
use std::fmt;

/// A column as discovered in the database, or declared through the schema-definition language.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbColumn {
    pub comment: String,
    pub id: i32,
    pub schema: String,
    pub table: String,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub array: bool,
    pub not_null: bool,
    pub primary_key: bool,
    pub unique_key: bool,
    pub full_text: bool,
    pub fk_recursive: bool,
    pub fkey_schema: String,
    pub fkey_table: String,
    pub fkey_col: String,
    pub blocked: bool,
}

impl DbColumn {
    pub fn new(schema: impl Into<String>, table: impl Into<String>, name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            name: name.into(),
            ty: ty.into(),
            ..Default::default()
        }
    }

    /// Marks the column as primary key. Primary keys are always unique.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.unique_key = true;
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn full_text(mut self) -> Self {
        self.full_text = true;
        self
    }

    /// Foreign key to `table.column` in the same schema as the column.
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.fkey_table = table.into();
        self.fkey_col = column.into();
        self
    }

    pub fn is_unique(&self) -> bool {
        self.unique_key || self.primary_key
    }

    pub fn has_foreign_key(&self) -> bool {
        !self.fkey_table.is_empty()
    }
}

impl fmt::Display for DbColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{} {}", self.schema, self.table, self.name, self.ty)?;

        if self.array {
            f.write_str("[]")?;
        }

        if self.primary_key {
            f.write_str(" primary key")?;
        }

        if self.has_foreign_key() {
            write!(f, " references {}.{}", self.fkey_table, self.fkey_col)?;
        }

        Ok(())
    }
}
