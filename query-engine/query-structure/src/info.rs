use crate::{DbColumn, DbFunction, DbTable, SchemaError, SchemaResult, TableKind, VirtualTable};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Tables with this prefix are internal bookkeeping and never exposed.
const INTERNAL_TABLE_PREFIX: &str = "_gj_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    #[default]
    Postgres,
    Mysql,
}

impl FromStr for DbType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "postgres" | "postgresql" => Ok(DbType::Postgres),
            "mysql" => Ok(DbType::Mysql),
            other => Err(format!("unsupported database type: {other}")),
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbType::Postgres => f.write_str("postgres"),
            DbType::Mysql => f.write_str("mysql"),
        }
    }
}

/// Raw database metadata, before the relationship graph is built.
#[derive(Debug, Clone, Default)]
pub struct DbInfo {
    pub db_type: DbType,
    pub version: u32,
    pub schema: String,
    pub name: String,
    pub tables: Vec<DbTable>,
    pub functions: Vec<DbFunction>,
    pub virtual_tables: Vec<VirtualTable>,
    table_index: IndexMap<(String, String), usize>,
}

impl DbInfo {
    /// Groups discovered columns into tables. Names matching a blocklist pattern
    /// (anchored regular expressions) are marked blocked.
    pub fn new(
        db_type: DbType,
        version: u32,
        schema: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<DbColumn>,
        functions: Vec<DbFunction>,
        blocklist: &[String],
    ) -> SchemaResult<Self> {
        let blocklist = Blocklist::new(blocklist)?;

        let mut info = Self {
            db_type,
            version,
            schema: schema.into(),
            name: name.into(),
            ..Default::default()
        };

        let mut grouped: IndexMap<(String, String), Vec<DbColumn>> = IndexMap::new();

        for mut col in columns {
            if col.table.starts_with(INTERNAL_TABLE_PREFIX) {
                continue;
            }

            col.blocked = col.blocked || blocklist.matches(&col.name);
            col.fk_recursive = col.has_foreign_key()
                && col.fkey_table == col.table
                && (col.fkey_schema.is_empty() || col.fkey_schema == col.schema);

            if col.primary_key {
                col.unique_key = true;
            }

            grouped.entry((col.schema.clone(), col.table.clone())).or_default().push(col);
        }

        for ((schema, table), cols) in grouped {
            let mut table = DbTable::new(schema, table, TableKind::Table, cols);
            table.blocked = blocklist.matches(&table.name);
            info.add_table(table);
        }

        for func in functions {
            if blocklist.matches(&func.name) {
                continue;
            }

            if func.returns_table() {
                let cols = func
                    .outputs
                    .iter()
                    .map(|p| {
                        let mut col = DbColumn::new("", "", p.name.clone(), p.ty.clone());
                        col.id = p.id;
                        col.array = p.array;
                        col
                    })
                    .collect();

                let mut table = DbTable::new(func.schema.clone(), func.name.clone(), TableKind::Function, cols);
                table.func = Some(func.clone());
                info.add_table(table);
            }

            info.functions.push(func);
        }

        Ok(info)
    }

    /// Adds or replaces a table.
    pub fn add_table(&mut self, table: DbTable) {
        let key = (table.schema.clone(), table.name.clone());

        match self.table_index.get(&key) {
            Some(&i) => self.tables[i] = table,
            None => {
                self.table_index.insert(key, self.tables.len());
                self.tables.push(table);
            }
        }
    }

    pub fn add_virtual_table(&mut self, table: VirtualTable) {
        self.virtual_tables.push(table);
    }

    pub fn get_table(&self, schema: &str, table: &str) -> SchemaResult<&DbTable> {
        self.table_index
            .get(&(schema.to_owned(), table.to_owned()))
            .map(|&i| &self.tables[i])
            .ok_or_else(|| SchemaError::TableNotFound(format!("{schema}.{table}")))
    }

    pub fn get_column(&self, schema: &str, table: &str, column: &str) -> SchemaResult<&DbColumn> {
        self.get_table(schema, table)?.get_column(column)
    }
}

struct Blocklist(Vec<Regex>);

impl Blocklist {
    fn new(patterns: &[String]) -> SchemaResult<Self> {
        let compiled = patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("^{p}$")).map_err(|err| SchemaError::InvalidBlocklist {
                    pattern: p.clone(),
                    message: err.to_string(),
                })
            })
            .collect::<SchemaResult<Vec<_>>>()?;

        Ok(Self(compiled))
    }

    fn matches(&self, name: &str) -> bool {
        self.0.iter().any(|re| re.is_match(name))
    }
}
