use thiserror::Error;

pub type SchemaResult<T> = Result<T, SchemaError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("column: '{table}.{column}' not found")]
    ColumnNotFound { table: String, column: String },

    #[error("relationship not found: {from} -> {to}")]
    RelationshipNotFound { from: String, to: String },

    #[error("no relationship found through column: {0}")]
    ThroughColumnNotFound(String),

    #[error("foreign key table not found: {schema}.{table}")]
    ForeignKeyTableNotFound { schema: String, table: String },

    #[error("foreign key column not found: {table}.{column}")]
    ForeignKeyColumnNotFound { table: String, column: String },

    #[error("function not found: {0}")]
    FunctionNotFound(String),

    #[error("invalid blocklist pattern '{pattern}': {message}")]
    InvalidBlocklist { pattern: String, message: String },
}
