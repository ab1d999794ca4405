use super::{Compilation, filter::ExpCompiler};
use crate::{
    Arg, ArgKind, CompileError, CompileResult, Exp, ExpOp, Order, OrderBy, PagingType, Select,
    SkipType, ValType,
    exp::{and_filter, and_filter_last},
    roles::ANON_ROLE,
};
use once_cell::sync::Lazy;
use query_document::{Arg as DocArg, Field as DocField, Node, NodeArena, NodeId, NodeKind};
use query_structure::{DbFunction, DbType, RelType, TableKind};
use regex::Regex;

/// Positional function argument keys, `a0` or `_0`.
static POSITIONAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a_]\d+$").expect("valid positional key pattern"));

impl Compilation<'_, '_> {
    pub(super) fn compile_select_args(&mut self, sel: &mut Select, field: &DocField<'_>) -> CompileResult<()> {
        for arg in &field.args {
            let result = match arg.name {
                "id" => self.compile_arg_id(sel, arg),
                "search" => self.compile_arg_search(sel, arg),
                "where" => self.compile_arg_where(sel, arg),
                "orderby" | "orderBy" | "order_by" | "order" => self.compile_arg_order_by(sel, arg),
                "distinctOn" | "distinct_on" | "distinct" => self.compile_arg_distinct_on(sel, arg),
                "limit" => self.compile_arg_limit(sel, arg),
                "offset" => self.compile_arg_offset(sel, arg),
                "first" => self.compile_arg_first_last(sel, arg, Order::Asc),
                "last" => self.compile_arg_first_last(sel, arg, Order::Desc),
                "after" => self.compile_arg_after_before(sel, arg, PagingType::Forward),
                "before" => self.compile_arg_after_before(sel, arg, PagingType::Backward),
                "find" => self.compile_arg_find(sel, arg),
                "args" => self.compile_arg_args(sel, arg),
                "insert" | "update" | "upsert" | "delete" => Ok(()),
                name => return Err(CompileError::UnknownArgument(name.to_owned())),
            };

            result.map_err(|err| err.in_argument(arg.name))?;
        }

        Ok(())
    }

    fn compile_arg_id(&mut self, sel: &mut Select, arg: &DocArg<'_>) -> CompileResult<()> {
        if sel.parent_id.is_some() {
            return Err(CompileError::InvalidArgument(
                "can only be specified at the query root".to_owned(),
            ));
        }

        let node = self.expect_kind(arg, &[NodeKind::Num, NodeKind::Str, NodeKind::Var], "a number, a string or a variable")?;

        let Some(pk) = sel.ti.primary_col.clone() else {
            return Err(CompileError::PrimaryKeyRequired(sel.ti.name.clone()));
        };

        let mut exp = Exp::new(ExpOp::Equals);
        exp.left.col = Some(pk);
        exp.right.val = node.value.to_owned();
        exp.right.val_type = match node.kind {
            NodeKind::Num => ValType::Num,
            NodeKind::Var => ValType::Var,
            _ => ValType::Str,
        };

        and_filter_last(&mut sel.filter, exp);
        sel.singular = true;

        Ok(())
    }

    fn compile_arg_search(&mut self, sel: &mut Select, arg: &DocArg<'_>) -> CompileResult<()> {
        if sel.ti.full_text.is_empty() {
            let message = match self.co.catalog.db_type() {
                DbType::Mysql => format!("no fulltext indexes defined for table '{}'", sel.ti.name),
                DbType::Postgres => format!("no tsvector column defined on table '{}'", sel.ti.name),
            };

            return Err(CompileError::InvalidArgument(message));
        }

        let node = self.expect_kind(arg, &[NodeKind::Str, NodeKind::Var], "a string or a variable")?;

        let mut exp = Exp::new(ExpOp::TsQuery);
        exp.right.val = node.value.to_owned();
        exp.right.val_type = if node.kind == NodeKind::Var { ValType::Var } else { ValType::Str };

        sel.internal_args.push(Arg::internal("search", node.value));
        and_filter(&mut sel.filter, exp);

        Ok(())
    }

    fn compile_arg_where(&mut self, sel: &mut Select, arg: &DocArg<'_>) -> CompileResult<()> {
        self.expect_kind(arg, &[NodeKind::Obj], "an object")?;

        let (exp, needs_user) = ExpCompiler::new(self.co.catalog.as_ref(), &sel.ti)
            .camelcase(self.co.config.enable_camelcase)
            .compile(&self.op.nodes, arg.value)?;

        if needs_user && self.role == ANON_ROLE {
            sel.skip = SkipType::UserNeeded;
        }

        and_filter_last(&mut sel.filter, exp);

        Ok(())
    }

    fn compile_arg_distinct_on(&mut self, sel: &mut Select, arg: &DocArg<'_>) -> CompileResult<()> {
        let nodes = &self.op.nodes;
        let node = self.expect_kind(arg, &[NodeKind::List, NodeKind::Str, NodeKind::Label], "a list of strings")?;

        let names: Vec<&str> = match node.kind {
            NodeKind::List => node
                .children
                .iter()
                .map(|&c| match nodes[c].kind {
                    NodeKind::Str | NodeKind::Label => Ok(nodes[c].value),
                    _ => Err(CompileError::ArgumentType {
                        arg: arg.name.to_owned(),
                        expected: "a list of strings".to_owned(),
                    }),
                })
                .collect::<CompileResult<_>>()?,
            _ => vec![node.value],
        };

        for name in names {
            let col = sel.ti.get_column(&self.parse_name(name))?.clone();

            // MySQL has no DISTINCT ON, ordering on the columns is the closest match.
            if self.is_mysql() {
                sel.order_by.push(OrderBy::new(col, Order::Asc));
            } else {
                sel.distinct_on.push(col);
            }
        }

        Ok(())
    }

    fn compile_arg_limit(&mut self, sel: &mut Select, arg: &DocArg<'_>) -> CompileResult<()> {
        let node = self.expect_kind(arg, &[NodeKind::Num, NodeKind::Var], "a number or a variable")?;

        match node.kind {
            NodeKind::Var => {
                if self.is_mysql() {
                    return Err(CompileError::ArgumentType {
                        arg: arg.name.to_owned(),
                        expected: "a number (mysql)".to_owned(),
                    });
                }

                sel.paging.limit_var = Some(node.value.to_owned());
            }
            _ => sel.paging.limit = parse_count(arg.name, node.value)?,
        }

        Ok(())
    }

    fn compile_arg_offset(&mut self, sel: &mut Select, arg: &DocArg<'_>) -> CompileResult<()> {
        let node = self.expect_kind(arg, &[NodeKind::Num, NodeKind::Var], "a number or a variable")?;

        match node.kind {
            NodeKind::Var => {
                if self.is_mysql() {
                    return Err(CompileError::ArgumentType {
                        arg: arg.name.to_owned(),
                        expected: "a number (mysql)".to_owned(),
                    });
                }

                sel.paging.offset_var = Some(node.value.to_owned());
            }
            _ => sel.paging.offset = parse_count(arg.name, node.value)?,
        }

        Ok(())
    }

    fn compile_arg_first_last(&mut self, sel: &mut Select, arg: &DocArg<'_>, order: Order) -> CompileResult<()> {
        self.compile_arg_limit(sel, arg)?;

        if !sel.singular {
            sel.paging.cursor = true;
        }

        sel.order = order;

        Ok(())
    }

    fn compile_arg_after_before(&mut self, sel: &mut Select, arg: &DocArg<'_>, kind: PagingType) -> CompileResult<()> {
        let node = self.expect_kind(arg, &[NodeKind::Var], "a variable")?;

        if node.value != "cursor" {
            return Err(CompileError::ArgumentType {
                arg: arg.name.to_owned(),
                expected: "a variable named $cursor".to_owned(),
            });
        }

        sel.paging.kind = kind;

        if !sel.singular {
            sel.paging.cursor = true;
        }

        Ok(())
    }

    fn compile_arg_find(&mut self, sel: &mut Select, arg: &DocArg<'_>) -> CompileResult<()> {
        let node = self.expect_kind(arg, &[NodeKind::Str, NodeKind::Label], "a string")?;

        if sel.rel_kind() != RelType::Recursive {
            return Err(CompileError::NotRecursive(sel.field_name.clone()));
        }

        if !matches!(node.value, "parents" | "children") {
            return Err(CompileError::InvalidArgument(
                "valid values for 'find' are 'parents' and 'children'".to_owned(),
            ));
        }

        sel.internal_args.push(Arg::internal("find", node.value));

        Ok(())
    }

    /// Arguments of a table-returning function.
    fn compile_arg_args(&mut self, sel: &mut Select, arg: &DocArg<'_>) -> CompileResult<()> {
        let Some(func) = sel.ti.func.as_ref().filter(|_| sel.ti.kind == TableKind::Function) else {
            return Err(CompileError::InvalidArgument(format!(
                "'{}' is not a function and takes no arguments",
                sel.ti.name
            )));
        };

        self.expect_kind(arg, &[NodeKind::Obj], "an object")?;

        let args = self.function_args(sel, func, arg.value)?;
        sel.args = args;

        Ok(())
    }

    /// Maps `{ a0: .., a1: .. }` or `{ name: .. }` onto the function's inputs.
    pub(super) fn function_args(&self, sel: &Select, func: &DbFunction, value: NodeId) -> CompileResult<Vec<Arg>> {
        let nodes = &self.op.nodes;
        let mut args = Vec::with_capacity(nodes[value].children.len());

        for (i, (_, node)) in nodes.children(value).enumerate() {
            let mut arg = function_arg(func, node.name, i)?;

            match node.kind {
                NodeKind::Label => {
                    let col = sel.ti.get_column(&self.parse_name(node.value))?.clone();
                    arg.kind = ArgKind::Col;
                    arg.col = Some(col);
                }
                NodeKind::Var => {
                    arg.kind = ArgKind::Var;
                    arg.val = node.value.to_owned();
                }
                NodeKind::Obj | NodeKind::List => {
                    return Err(CompileError::InvalidArgument(format!(
                        "db function {}: argument '{}' must be a value, a column or a variable",
                        func.name, node.name
                    )));
                }
                _ => arg.val = node.value.to_owned(),
            }

            args.push(arg);
        }

        Ok(args)
    }

    /// Checks the kind of an argument value. Empty strings count as missing.
    pub(super) fn expect_kind(
        &self,
        arg: &DocArg<'_>,
        kinds: &[NodeKind],
        expected: &str,
    ) -> CompileResult<&'_ Node<'_>> {
        expect_node(&self.op.nodes, arg, kinds, expected)
    }
}

pub(super) fn expect_node<'n, 'a>(
    nodes: &'n NodeArena<'a>,
    arg: &DocArg<'_>,
    kinds: &[NodeKind],
    expected: &str,
) -> CompileResult<&'n Node<'a>> {
    let node = &nodes[arg.value];

    if !kinds.contains(&node.kind) || (node.kind == NodeKind::Str && node.value.is_empty()) {
        return Err(CompileError::ArgumentType {
            arg: arg.name.to_owned(),
            expected: expected.to_owned(),
        });
    }

    Ok(node)
}

fn function_arg(func: &DbFunction, key: &str, index: usize) -> CompileResult<Arg> {
    let invalid = |message: String| CompileError::InvalidArgument(format!("db function {}: {message}", func.name));

    if POSITIONAL.is_match(key) {
        let n: usize = key[1..].parse().map_err(|_| invalid(format!("invalid key: {key}")))?;

        if n != index {
            return Err(invalid(format!("invalid key order: {key}")));
        }

        let input = func.inputs.get(n).ok_or_else(|| invalid(format!("invalid key: {key}")))?;

        return Ok(Arg {
            dtype: input.ty.clone(),
            ..Default::default()
        });
    }

    let input = func
        .inputs
        .iter()
        .find(|input| input.name == key)
        .ok_or_else(|| invalid(format!("input not found: {key}")))?;

    Ok(Arg {
        name: input.name.clone(),
        dtype: input.ty.clone(),
        ..Default::default()
    })
}

fn parse_count(arg: &str, value: &str) -> CompileResult<u32> {
    value.parse().map_err(|_| CompileError::ArgumentType {
        arg: arg.to_owned(),
        expected: "a positive whole number".to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_and_named_function_args() {
        let func = DbFunction::new("public", "concat_ws", "text")
            .input("sep", "text")
            .input("value", "text");

        assert_eq!(function_arg(&func, "a0", 0).unwrap().dtype, "text");
        assert_eq!(function_arg(&func, "value", 1).unwrap().name, "value");

        let err = function_arg(&func, "_1", 0).unwrap_err();
        assert_eq!(err.to_string(), "db function concat_ws: invalid key order: _1");

        let err = function_arg(&func, "a5", 5).unwrap_err();
        assert_eq!(err.to_string(), "db function concat_ws: invalid key: a5");
    }

    #[test]
    fn counts_must_be_whole_numbers() {
        assert_eq!(parse_count("limit", "30").unwrap(), 30);
        assert_eq!(
            parse_count("limit", "-1").unwrap_err().to_string(),
            "value for argument 'limit' must be a positive whole number"
        );
    }
}
