//! Tables and functions declared with the schema-definition language, for databases that
//! cannot be introspected or for views that only exist on the client side.

use crate::ConfigError;
use indexmap::IndexMap;
use query_document::{Directive, NodeArena, NodeKind, TypeField, parse_schema};
use query_structure::{DbColumn, DbFunction, DbInfo, DbSchema, DbType, FunctionParam};

/// Metadata read from a schema document, in the shape database introspection produces.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaDefinition {
    pub db_type: DbType,
    pub version: u32,
    pub schema: String,
    pub columns: Vec<DbColumn>,
    pub functions: Vec<DbFunction>,
}

#[derive(Default)]
struct FieldInfo<'a> {
    id: bool,
    unique: bool,
    search: bool,
    blocked: bool,
    type_args: &'a str,
    related_type: &'a str,
    related_field: &'a str,
    related_schema: &'a str,
    input: bool,
    output: bool,
}

impl SchemaDefinition {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let doc = parse_schema(input)?;

        let db_type = doc.db_type.parse::<DbType>().map_err(ConfigError::SchemaDefinition)?;

        let version = match doc.version.trim() {
            "" => 0,
            v => v
                .parse()
                .map_err(|_| ConfigError::SchemaDefinition(format!("invalid version: {v}")))?,
        };

        let mut def = Self {
            db_type,
            version,
            schema: doc.schema.trim().to_owned(),
            ..Default::default()
        };

        for ty in &doc.types {
            let in_type = |err: ConfigError| match err {
                ConfigError::SchemaDefinition(msg) => ConfigError::SchemaDefinition(format!("{}: {msg}", ty.name)),
                other => other,
            };

            let mut schema = def.schema.clone();
            let mut return_type = None;

            for d in &ty.directives {
                match d.name {
                    "schema" => schema = required_arg(&doc.nodes, d, "name").map_err(in_type)?.to_owned(),
                    "function" => return_type = Some(required_arg(&doc.nodes, d, "return_type").map_err(in_type)?),
                    _ => (),
                }
            }

            match return_type {
                Some(return_type) => {
                    let func = function(&doc.nodes, &schema, ty.name, return_type, &ty.fields).map_err(in_type)?;
                    def.functions.push(func);
                }
                None => {
                    let cols = columns(&doc.nodes, &schema, ty.name, &ty.fields).map_err(in_type)?;
                    def.columns.extend(cols);
                }
            }
        }

        tracing::debug!(
            columns = def.columns.len(),
            functions = def.functions.len(),
            "parsed schema definition"
        );

        Ok(def)
    }

    /// Builds the catalog, the same way introspected metadata is.
    pub fn into_catalog(
        self,
        name: &str,
        blocklist: &[String],
        aliases: &IndexMap<String, Vec<String>>,
    ) -> Result<DbSchema, ConfigError> {
        let info = DbInfo::new(
            self.db_type,
            self.version,
            self.schema,
            name,
            self.columns,
            self.functions,
            blocklist,
        )?;

        Ok(DbSchema::new(info, aliases)?)
    }
}

fn columns(nodes: &NodeArena<'_>, schema: &str, table: &str, fields: &[TypeField<'_>]) -> Result<Vec<DbColumn>, ConfigError> {
    let mut cols = Vec::with_capacity(fields.len());

    for (i, f) in fields.iter().enumerate() {
        let info = field_info(nodes, f)?;

        let mut ty = pascal_to_snake_space(f.ty);

        if !info.type_args.is_empty() {
            ty = format!("{ty}({})", info.type_args);
        }

        let mut col = DbColumn::new(schema, table, f.name, ty);
        col.id = i as i32;
        col.array = f.list;
        col.not_null = f.required;
        col.primary_key = info.id;
        col.unique_key = info.unique || info.id;
        col.full_text = info.search;
        col.blocked = info.blocked;
        col.fkey_schema = info.related_schema.to_owned();
        col.fkey_table = info.related_type.to_owned();
        col.fkey_col = info.related_field.to_owned();
        col.fk_recursive = info.related_type == table && (info.related_schema.is_empty() || info.related_schema == schema);

        cols.push(col);
    }

    Ok(cols)
}

fn function(
    nodes: &NodeArena<'_>,
    schema: &str,
    name: &str,
    return_type: &str,
    fields: &[TypeField<'_>],
) -> Result<DbFunction, ConfigError> {
    let mut func = DbFunction::new(schema, name, return_type);

    for (i, f) in fields.iter().enumerate() {
        let info = field_info(nodes, f)?;

        let param = FunctionParam {
            id: i as i32,
            name: f.name.to_owned(),
            ty: pascal_to_snake_space(f.ty),
            array: f.list,
        };

        if info.input {
            func.inputs.push(param);
        } else if info.output {
            func.outputs.push(param);
        } else {
            return Err(ConfigError::SchemaDefinition(format!(
                "{}: @input or @output directive required",
                f.name
            )));
        }
    }

    Ok(func)
}

fn field_info<'a>(nodes: &NodeArena<'a>, f: &TypeField<'a>) -> Result<FieldInfo<'a>, ConfigError> {
    let mut info = FieldInfo::default();

    for d in &f.directives {
        let in_directive = |err: ConfigError| match err {
            ConfigError::SchemaDefinition(msg) => {
                ConfigError::SchemaDefinition(format!("type field: {}: {msg}", d.name))
            }
            other => other,
        };

        match d.name {
            "id" => info.id = true,
            "unique" => info.unique = true,
            "search" => info.search = true,
            "blocked" => info.blocked = true,
            "input" => info.input = true,
            "output" => info.output = true,
            "type" => info.type_args = required_arg(nodes, d, "args").map_err(in_directive)?,
            "relation" => {
                info.related_type = required_arg(nodes, d, "type").map_err(in_directive)?;

                // Json columns can point at a whole table.
                info.related_field = if f.ty == "Json" {
                    optional_arg(nodes, d, "field").map_err(in_directive)?.unwrap_or_default()
                } else {
                    required_arg(nodes, d, "field").map_err(in_directive)?
                };

                info.related_schema = optional_arg(nodes, d, "schema").map_err(in_directive)?.unwrap_or_default();
            }
            other => {
                return Err(ConfigError::SchemaDefinition(format!(
                    "unknown schema field directive: {other}"
                )));
            }
        }
    }

    Ok(info)
}

fn optional_arg<'a>(nodes: &NodeArena<'a>, d: &Directive<'a>, name: &str) -> Result<Option<&'a str>, ConfigError> {
    let Some(arg) = d.arg(name) else {
        return Ok(None);
    };

    let node = &nodes[arg.value];

    match node.kind {
        NodeKind::Str | NodeKind::Label => Ok(Some(node.value)),
        _ => Err(ConfigError::SchemaDefinition(format!(
            "argument '{name}' must be a string"
        ))),
    }
}

fn required_arg<'a>(nodes: &NodeArena<'a>, d: &Directive<'a>, name: &str) -> Result<&'a str, ConfigError> {
    optional_arg(nodes, d, name)?
        .ok_or_else(|| ConfigError::SchemaDefinition(format!("required argument '{name}' missing")))
}

/// `CharacterVarying` is `character varying`.
fn pascal_to_snake_space(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);

    for (i, c) in name.chars().enumerate() {
        if i > 0 && c.is_uppercase() {
            out.push(' ');
        }

        out.extend(c.to_lowercase());
    }

    out
}
