//! The access control table: compiled per role, per table policies.
//!
//! Policies are compiled once when a role is added and are read-only afterwards. A
//! [`RoleTable`] is handed to the compiler as a whole and replaced as a whole.

use crate::{
    ConfigError, Exp, QType, TableRoleConfig,
    compiler::compile_filters,
};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use query_structure::Catalog;
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// The role of requests without a user.
pub const ANON_ROLE: &str = "anon";

static PRESET_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$([a-zA-Z0-9_]+)").expect("valid preset pattern"));

/// Policy of one role for one kind of operation on one table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpPolicy {
    /// AND-ed into the where clause of every select or mutation step.
    pub filter: Option<Exp>,
    /// The filter refers to the user id.
    pub needs_user: bool,
    /// Lowercase column names. Empty allows every column.
    pub columns: HashSet<String>,
    pub presets: IndexMap<String, String>,
    pub limit: u32,
    pub disable_functions: bool,
    pub block: bool,
}

impl OpPolicy {
    pub fn column_allowed(&self, name: &str) -> bool {
        self.columns.is_empty() || self.columns.contains(&name.to_lowercase())
    }

    fn blocked(block: bool) -> Self {
        Self {
            block,
            ..Default::default()
        }
    }
}

/// Everything a role may do with a table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableRole {
    pub read_only: bool,
    pub query: OpPolicy,
    pub insert: OpPolicy,
    pub update: OpPolicy,
    pub upsert: OpPolicy,
    pub delete: OpPolicy,
}

impl TableRole {
    /// Policy used when a role has none for a table.
    pub(crate) fn fallback(block: bool) -> Self {
        Self {
            read_only: false,
            query: OpPolicy::blocked(block),
            insert: OpPolicy::blocked(block),
            update: OpPolicy::blocked(block),
            upsert: OpPolicy::blocked(block),
            delete: OpPolicy::blocked(block),
        }
    }

    pub fn policy(&self, kind: QType) -> &OpPolicy {
        match kind {
            QType::Query | QType::Subscription => &self.query,
            QType::Insert => &self.insert,
            QType::Update => &self.update,
            QType::Upsert => &self.upsert,
            QType::Delete => &self.delete,
        }
    }

    pub fn is_blocked(&self, kind: QType) -> bool {
        (self.read_only && kind.is_mutation()) || self.policy(kind).block
    }

    pub fn functions_disabled(&self) -> bool {
        self.query.disable_functions
    }
}

/// All compiled policies, keyed by role, schema and table.
#[derive(Debug, Clone, Default)]
pub struct RoleTable {
    entries: HashMap<(String, String, String), TableRole>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles and stores the policy of `role` on `table` (`name` or `schema.name`).
    /// Filters are checked against the catalog here, so a bad policy fails at load time.
    #[tracing::instrument(skip(self, catalog, config))]
    pub fn add_role(
        &mut self,
        catalog: &dyn Catalog,
        role: &str,
        table: &str,
        config: TableRoleConfig,
    ) -> Result<(), ConfigError> {
        let (schema, name) = table.split_once('.').unwrap_or(("", table));
        let ti = catalog.find(schema, name)?;

        let compile = |kind: QType, filters: &[String]| -> Result<(Option<Exp>, bool), ConfigError> {
            compile_filters(catalog, &ti, filters).map_err(|err| ConfigError::Filter {
                role: role.to_owned(),
                table: table.to_owned(),
                kind,
                source: Box::new(err),
            })
        };

        let (filter, needs_user) = compile(QType::Query, &config.query.filters)?;
        let query = OpPolicy {
            filter,
            needs_user,
            columns: column_set(&config.query.columns),
            presets: IndexMap::new(),
            limit: config.query.limit,
            disable_functions: config.query.disable_functions,
            block: config.query.block,
        };

        let (filter, needs_user) = compile(QType::Insert, &config.insert.filters)?;
        let insert = OpPolicy {
            filter,
            needs_user,
            columns: column_set(&config.insert.columns),
            presets: presets(config.insert.presets),
            block: config.insert.block,
            ..Default::default()
        };

        let (filter, needs_user) = compile(QType::Update, &config.update.filters)?;
        let update = OpPolicy {
            filter,
            needs_user,
            columns: column_set(&config.update.columns),
            presets: presets(config.update.presets),
            block: config.update.block,
            ..Default::default()
        };

        let (filter, needs_user) = compile(QType::Upsert, &config.upsert.filters)?;
        let upsert = OpPolicy {
            filter,
            needs_user,
            columns: column_set(&config.upsert.columns),
            presets: presets(config.upsert.presets),
            block: config.upsert.block,
            ..Default::default()
        };

        let (filter, needs_user) = compile(QType::Delete, &config.delete.filters)?;
        let delete = OpPolicy {
            filter,
            needs_user,
            columns: column_set(&config.delete.columns),
            block: config.delete.block,
            ..Default::default()
        };

        let entry = TableRole {
            read_only: config.read_only,
            query,
            insert,
            update,
            upsert,
            delete,
        };

        self.entries
            .insert((role.to_owned(), ti.schema.clone(), ti.name.clone()), entry);

        Ok(())
    }

    pub fn get(&self, role: &str, schema: &str, table: &str) -> Option<&TableRole> {
        // Lookups happen once per select, the key is rebuilt each time.
        self.entries
            .get(&(role.to_owned(), schema.to_owned(), table.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn column_set(columns: &[String]) -> HashSet<String> {
    columns.iter().map(|c| c.to_lowercase()).collect()
}

/// Rewrites `$var` references to `{{var}}`.
fn presets(presets: IndexMap<String, String>) -> IndexMap<String, String> {
    presets
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), PRESET_VAR.replace_all(&v, "{{${1}}}").into_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExpOp, InsertConfig, QueryConfig};
    use indexmap::IndexMap;
    use query_structure::{DbColumn, DbInfo, DbSchema, DbType};

    fn catalog() -> DbSchema {
        let columns = vec![
            DbColumn::new("public", "users", "id", "bigint").primary_key(),
            DbColumn::new("public", "products", "id", "bigint").primary_key(),
            DbColumn::new("public", "products", "name", "text"),
            DbColumn::new("public", "products", "user_id", "bigint").references("users", "id"),
        ];

        let info = DbInfo::new(DbType::Postgres, 140000, "public", "db", columns, vec![], &[]).unwrap();
        DbSchema::new(info, &IndexMap::new()).unwrap()
    }

    #[test]
    fn compiles_filters_columns_and_presets() {
        let catalog = catalog();
        let mut roles = RoleTable::new();

        let config = TableRoleConfig {
            query: QueryConfig {
                filters: vec!["{ user_id: { eq: $user_id } }".to_owned()],
                columns: vec!["ID".to_owned(), "name".to_owned()],
                ..Default::default()
            },
            insert: InsertConfig {
                presets: IndexMap::from([("User_Id".to_owned(), "$user_id".to_owned())]),
                ..Default::default()
            },
            ..Default::default()
        };

        roles.add_role(&catalog, "user", "products", config).unwrap();

        let entry = roles.get("user", "public", "products").unwrap();
        let query = entry.policy(QType::Query);

        assert!(query.needs_user);
        assert_eq!(query.filter.as_ref().unwrap().to_string(), "eq(products.user_id, $user_id)");
        assert!(query.column_allowed("id"));
        assert!(!query.column_allowed("user_id"));
        assert_eq!(entry.insert.presets["user_id"], "{{user_id}}");
        assert!(entry.policy(QType::Update).column_allowed("anything"));
    }

    #[test]
    fn false_filter_and_read_only() {
        let catalog = catalog();
        let mut roles = RoleTable::new();

        let mut config = TableRoleConfig {
            read_only: true,
            ..Default::default()
        };
        config.query.filters = vec!["false".to_owned()];

        roles.add_role(&catalog, "anon", "public.products", config).unwrap();

        let entry = roles.get("anon", "public", "products").unwrap();
        assert_eq!(entry.query.filter.as_ref().unwrap().op, ExpOp::False);
        assert!(entry.is_blocked(QType::Delete));
        assert!(!entry.is_blocked(QType::Query));
    }

    #[test]
    fn bad_filter_fails_at_load_time() {
        let catalog = catalog();
        let mut roles = RoleTable::new();

        let mut config = TableRoleConfig::default();
        config.query.filters = vec!["{ owner: { id: { eq: 1 } } }".to_owned()];

        let err = roles.add_role(&catalog, "user", "products", config).unwrap_err();

        assert_eq!(
            err.to_string(),
            "role 'user': table 'products': invalid query filter: [Where] 'owner' is not related to 'products'"
        );
        assert!(roles.is_empty());
    }

    #[test]
    fn unknown_table() {
        let catalog = catalog();
        let err = RoleTable::new()
            .add_role(&catalog, "user", "orders", TableRoleConfig::default())
            .unwrap_err();

        assert_eq!(err.to_string(), "table not found: public.orders");
    }
}
