use super::{Compilation, filter::ExpCompiler};
use crate::{
    Arg, CompileError, CompileResult, Field, FieldKind, Function, SelType, Select, SelectId,
    SkipType,
    exp::{and_filter, not_filter},
    roles::{ANON_ROLE, TableRole},
};
use query_document::{Arg as DocArg, Field as DocField, FieldId, NodeKind};
use query_structure::{DbColumn, RelType};
use std::collections::VecDeque;

/// Aggregates every database understands. Used as field name prefixes, as in `count_id`.
const AGGREGATES: [&str; 11] = [
    "count",
    "sum",
    "avg",
    "max",
    "min",
    "stddev",
    "stddev_pop",
    "stddev_samp",
    "variance",
    "var_pop",
    "var_samp",
];

impl Compilation<'_, '_> {
    /// Compiles the leaves of a selection and queues the nested selections.
    pub(super) fn compile_fields(
        &mut self,
        queue: &mut VecDeque<(FieldId, Option<SelectId>)>,
        sel: &mut Select,
        field: &DocField<'_>,
        tr: &TableRole,
    ) -> CompileResult<()> {
        let op = self.op;
        let mut agg = false;

        for &id in &field.children {
            let f = &op.fields[id];

            if sel.rel_kind() == RelType::Remote {
                sel.fields.push(Field {
                    id: sel.fields.len(),
                    name: f.response_name().to_owned(),
                    kind: FieldKind::Remote,
                    args: Vec::new(),
                    filter: None,
                    skip: SkipType::None,
                });
                continue;
            }

            if !f.children.is_empty() {
                queue.push_back((id, Some(sel.id)));
                continue;
            }

            let name = self.parse_name(f.name);

            if name == "__typename" {
                sel.typename = true;
                continue;
            }

            if name.ends_with("_cursor") {
                continue;
            }

            let (kind, args) = match sel.ti.column(&name) {
                Some(col) => (FieldKind::Column(col.clone()), Vec::new()),
                None => match self.function(sel, &name, f)? {
                    Some((func, args)) => (FieldKind::Function(func), args),
                    None => return Err(CompileError::UnknownField(name.into_owned())),
                },
            };

            let mut out = Field {
                id: sel.fields.len(),
                name: f.response_name().to_owned(),
                kind,
                args,
                filter: None,
                skip: SkipType::None,
            };

            self.compile_field_directives(&mut out, f)?;
            self.compile_field_args(sel, &mut out, f)?;

            if let Some(col) = out.column().filter(|c| c.blocked) {
                return Err(CompileError::BlockedColumn {
                    schema: col.schema.clone(),
                    table: col.table.clone(),
                    column: col.name.clone(),
                });
            }

            if out.skip == SkipType::Drop {
                continue;
            }

            if out.function().is_some_and(|func| func.agg) {
                agg = true;

                // The recursive query has to carry the aggregated column.
                if sel.rel_kind() == RelType::Recursive {
                    if let Some(col) = out.args.first().and_then(|a| a.col.clone()) {
                        sel.add_base_col(col);
                    }
                }
            }

            sel.add_field(out);
        }

        if agg {
            sel.group_cols = true;
        }

        self.validate_selector(sel, tr)?;
        self.add_rel_columns(sel);

        let order_cols: Vec<DbColumn> = sel
            .order_by
            .iter()
            .filter(|ob| ob.col.table == sel.ti.name)
            .map(|ob| ob.col.clone())
            .collect();

        for col in order_cols {
            sel.add_base_col(col);
        }

        Ok(())
    }

    /// Every column and function argument must be allowed for the role.
    fn validate_selector(&self, sel: &Select, tr: &TableRole) -> CompileResult<()> {
        let policy = tr.policy(self.qc.kind);

        let not_allowed = |col: &DbColumn| CompileError::ColumnNotAllowed {
            column: col.name.clone(),
            role: self.role.to_owned(),
        };

        for field in &sel.fields {
            match &field.kind {
                FieldKind::Column(col) => {
                    if !policy.column_allowed(&col.name) {
                        return Err(not_allowed(col));
                    }
                }
                FieldKind::Function(func) => {
                    if self.co.config.disable_functions || tr.functions_disabled() {
                        return Err(CompileError::FunctionsBlocked {
                            function: func.name.clone(),
                            role: self.role.to_owned(),
                        });
                    }

                    if let Some(col) = field.args.first().and_then(|a| a.col.as_ref()) {
                        if !policy.column_allowed(&col.name) {
                            return Err(not_allowed(col));
                        }
                    }
                }
                FieldKind::Remote => (),
            }
        }

        Ok(())
    }

    /// Adds the key columns the relationship with the parent needs.
    fn add_rel_columns(&mut self, sel: &mut Select) {
        let Some(pid) = sel.parent_id else {
            return;
        };

        if sel.kind == SelType::Member {
            return;
        }

        let rel = match sel.parent_joins().next() {
            Some(join) => join.rel.clone(),
            None => match &sel.rel {
                Some(rel) => rel.clone(),
                None => return,
            },
        };

        let parent = &mut self.qc.selects[pid];

        match rel.kind {
            RelType::OneToOne | RelType::OneToMany | RelType::Embedded => {
                parent.add_base_col(rel.right.col);
            }
            RelType::Remote => {
                parent.add_field(Field {
                    id: parent.fields.len(),
                    name: rel.left.col.name.clone(),
                    kind: FieldKind::Column(rel.right.col),
                    args: Vec::new(),
                    filter: None,
                    skip: SkipType::None,
                });

                sel.skip = SkipType::Remote;
            }
            RelType::Polymorphic => {
                for name in [&rel.left.col.name, &rel.left.col.fkey_col] {
                    if let Some(col) = parent.ti.column(name).cloned() {
                        parent.add_base_col(col);
                    }
                }
            }
            RelType::Recursive => {
                sel.add_base_col(rel.left.col);
                sel.add_base_col(rel.right.col);
            }
            _ => (),
        }
    }

    /// Resolves a field that is not a column: `search_rank`, `search_headline_<col>`, a user
    /// function called with `args`, or `<aggregate>_<col>`.
    fn function(&self, sel: &Select, name: &str, f: &DocField<'_>) -> CompileResult<Option<(Function, Vec<Arg>)>> {
        let searched = sel.internal_arg("search").is_some();

        let builtin = |name: &str, args: Vec<Arg>| {
            if !searched {
                return Err(CompileError::NoSearch(name.to_owned()));
            }

            let func = Function {
                name: name.to_owned(),
                func: None,
                agg: false,
            };

            Ok(Some((func, args)))
        };

        if name == "search_rank" {
            return builtin("search_rank", Vec::new());
        }

        if let Some(col) = name.strip_prefix("search_headline_") {
            let col = sel.ti.get_column(col)?.clone();
            return builtin("search_headline", vec![Arg::column(col)]);
        }

        let functions = self.co.catalog.functions();
        let lower = name.to_lowercase();

        if let Some(func) = functions.get(&lower).filter(|_| f.arg("args").is_some()) {
            let func = Function {
                name: lower,
                func: Some(func.clone()),
                agg: false,
            };

            return Ok(Some((func, Vec::new())));
        }

        // The longest prefix wins, `stddev_pop_price` is `stddev_pop(price)`.
        let prefix = AGGREGATES
            .iter()
            .copied()
            .chain(functions.keys().map(String::as_str))
            .filter(|k| lower.len() > k.len() + 1 && lower.starts_with(k) && lower.as_bytes()[k.len()] == b'_')
            .max_by_key(|k| k.len());

        let Some(prefix) = prefix else {
            return Ok(None);
        };

        if self.co.config.disable_agg_functions {
            return Err(CompileError::AggregationDisabled(prefix.to_owned()));
        }

        let col = sel.ti.get_column(&lower[prefix.len() + 1..])?.clone();

        let func = Function {
            name: prefix.to_owned(),
            func: functions.get(prefix).cloned(),
            agg: true,
        };

        Ok(Some((func, vec![Arg::column(col)])))
    }

    fn compile_field_args(&self, sel: &Select, field: &mut Field, doc: &DocField<'_>) -> CompileResult<()> {
        for arg in &doc.args {
            let result = match arg.name {
                "args" => self.compile_field_arg_args(sel, field, arg),
                "includeIf" | "include_if" => self.compile_field_arg_filter(sel, field, arg, false),
                "skipIf" | "skip_if" => self.compile_field_arg_filter(sel, field, arg, true),
                name => return Err(CompileError::UnknownArgument(name.to_owned())),
            };

            result.map_err(|err| err.in_argument(arg.name))?;
        }

        Ok(())
    }

    fn compile_field_arg_args(&self, sel: &Select, field: &mut Field, arg: &DocArg<'_>) -> CompileResult<()> {
        let func = field
            .function()
            .and_then(|f| f.func.clone())
            .filter(|f| !f.inputs.is_empty());

        let Some(func) = func else {
            return Err(CompileError::InvalidArgument(format!(
                "'{}' does not take arguments",
                field.name
            )));
        };

        self.expect_kind(arg, &[NodeKind::Obj], "an object")?;
        field.args = self.function_args(sel, &func, arg.value)?;

        Ok(())
    }

    fn compile_field_arg_filter(
        &self,
        sel: &Select,
        field: &mut Field,
        arg: &DocArg<'_>,
        skip: bool,
    ) -> CompileResult<()> {
        self.expect_kind(arg, &[NodeKind::Obj], "an object")?;

        let select = field.column().map(|_| sel.id);

        let (exp, needs_user) = ExpCompiler::new(self.co.catalog.as_ref(), &sel.ti)
            .camelcase(self.co.config.enable_camelcase)
            .select(select)
            .compile(&self.op.nodes, arg.value)?;

        if needs_user && self.role == ANON_ROLE {
            field.skip = SkipType::UserNeeded;
        }

        if skip {
            not_filter(&mut field.filter, exp);
        } else {
            and_filter(&mut field.filter, exp);
        }

        Ok(())
    }
}
