//! Database metadata: tables, columns, functions and the graph of relationships between them.

mod catalog;
mod column;
mod error;
mod function;
mod info;
mod relation;
mod schema;
mod table;

pub use catalog::Catalog;
pub use column::DbColumn;
pub use error::{SchemaError, SchemaResult};
pub use function::{DbFunction, FunctionParam};
pub use info::{DbInfo, DbType};
pub use relation::{DbRel, RelEnd, RelType};
pub use schema::DbSchema;
pub use table::{DbTable, TableKind, VirtualTable};
