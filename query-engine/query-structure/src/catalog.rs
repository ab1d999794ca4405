use crate::{DbColumn, DbFunction, DbRel, DbTable, DbType, SchemaError, SchemaResult, VirtualTable};
use indexmap::IndexMap;
use std::{fmt, sync::Arc};

/// Read-only access to table, column, relationship and function metadata.
///
/// Implementations are shared by every compilation running at the same time and must not
/// change once handed out.
pub trait Catalog: fmt::Debug + Send + Sync {
    fn db_type(&self) -> DbType;

    /// Schema used when a name is not qualified.
    fn default_schema(&self) -> &str;

    /// Table (or alias) by name. An empty `schema` means the default schema.
    fn find(&self, schema: &str, name: &str) -> SchemaResult<Arc<DbTable>>;

    /// Hops leading from the table known as `from` to the table known as `to`. The first hop
    /// starts at `from`, the last one ends at `to`.
    fn find_path(&self, from: &str, to: &str, through: Option<&str>) -> SchemaResult<Vec<DbRel>>;

    /// Single argument functions keyed by lowercase name.
    fn functions(&self) -> &IndexMap<String, DbFunction>;

    fn virtual_table(&self, name: &str) -> Option<&VirtualTable>;

    fn get_column(&self, schema: &str, table: &str, column: &str) -> SchemaResult<DbColumn> {
        self.find(schema, table)?.get_column(column).cloned()
    }

    /// The first hop of [`Catalog::find_path`].
    fn get_relationship(&self, from: &str, to: &str, through: Option<&str>) -> SchemaResult<DbRel> {
        self.find_path(from, to, through)?
            .into_iter()
            .next()
            .ok_or_else(|| SchemaError::RelationshipNotFound {
                from: from.to_owned(),
                to: to.to_owned(),
            })
    }

    fn get_function(&self, name: &str) -> SchemaResult<&DbFunction> {
        self.functions()
            .get(&name.to_lowercase())
            .ok_or_else(|| SchemaError::FunctionNotFound(name.to_owned()))
    }
}
