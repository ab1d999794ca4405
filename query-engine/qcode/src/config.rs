use indexmap::IndexMap;
use serde::Deserialize;

/// Rows returned by a select that names no limit and whose role sets none.
pub const DEFAULT_LIMIT: u32 = 20;

/// Compiler wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Schema for names that are not qualified.
    pub db_schema: String,
    /// Limit for selects without one. Zero means [`DEFAULT_LIMIT`].
    pub default_limit: u32,
    /// Block the anonymous role on tables it has no policy for.
    pub default_block: bool,
    pub disable_agg_functions: bool,
    pub disable_functions: bool,
    /// Names in documents are camelCase and are converted to snake_case before lookup.
    pub enable_camelcase: bool,
    /// Patterns of table and column names hidden from every role.
    pub blocklist: Vec<String>,
    pub tables: Vec<TableConfig>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            db_schema: "public".to_owned(),
            default_limit: 0,
            default_block: false,
            disable_agg_functions: false,
            disable_functions: false,
            enable_camelcase: false,
            blocklist: Vec::new(),
            tables: Vec::new(),
        }
    }
}

impl CompilerConfig {
    pub(crate) fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub name: String,
    /// Named sortings picked with `order_by: $var`. Each entry is `[column, direction]`.
    pub order_by: IndexMap<String, Vec<[String; 2]>>,
}

/// Access policy of one role on one table, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct TableRoleConfig {
    /// Shorthand for blocking every mutation.
    pub read_only: bool,
    pub query: QueryConfig,
    pub insert: InsertConfig,
    pub update: UpdateConfig,
    pub upsert: UpsertConfig,
    pub delete: DeleteConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub limit: u32,
    /// Filters in argument value syntax, AND-ed together. `"false"` blocks every row.
    pub filters: Vec<String>,
    /// Columns the role may select. Empty allows all.
    pub columns: Vec<String>,
    pub disable_functions: bool,
    pub block: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct InsertConfig {
    pub filters: Vec<String>,
    pub columns: Vec<String>,
    /// Column values set on every insert, `$var` references a variable.
    pub presets: IndexMap<String, String>,
    pub block: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub filters: Vec<String>,
    pub columns: Vec<String>,
    pub presets: IndexMap<String, String>,
    pub block: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct UpsertConfig {
    pub filters: Vec<String>,
    pub columns: Vec<String>,
    pub presets: IndexMap<String, String>,
    pub block: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct DeleteConfig {
    pub filters: Vec<String>,
    pub columns: Vec<String>,
    pub block: bool,
}
