//! Compiles `where`-style value trees into [`Exp`] trees.

use super::build_filter;
use crate::{
    CompileError, CompileResult, Exp, ExpOp, Join, SelectId, ValType,
    exp::and_filter_last,
};
use heck::ToSnakeCase;
use query_document::{NodeArena, NodeId, NodeKind, parse_arg_value};
use query_structure::{Catalog, DbColumn, DbTable};
use serde_json::Value;
use std::{borrow::Cow, sync::Arc};

/// Variables that carry the id of the requesting user.
const USER_VARS: [&str; 3] = ["user_id", "user_id_raw", "user_id_provider"];

pub(crate) struct ExpCompiler<'a> {
    catalog: &'a dyn Catalog,
    ti: &'a DbTable,
    camelcase: bool,
    json: bool,
    select_id: Option<SelectId>,
}

impl<'a> ExpCompiler<'a> {
    pub(crate) fn new(catalog: &'a dyn Catalog, ti: &'a DbTable) -> Self {
        Self {
            catalog,
            ti,
            camelcase: false,
            json: false,
            select_id: None,
        }
    }

    pub(crate) fn camelcase(mut self, camelcase: bool) -> Self {
        self.camelcase = camelcase;
        self
    }

    /// Column references are bound to the given select.
    pub(crate) fn select(mut self, id: Option<SelectId>) -> Self {
        self.select_id = id;
        self
    }

    fn json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Returns the expression and whether it refers to the user id.
    pub(crate) fn compile(&self, nodes: &NodeArena<'_>, root: NodeId) -> CompileResult<(Exp, bool)> {
        let root_node = &nodes[root];

        if root_node.kind != NodeKind::Obj || root_node.children.is_empty() {
            return Err(CompileError::InvalidArgument(
                "filter must be a non-empty object".to_owned(),
            ));
        }

        let mut needs_user = false;
        let mut exps: Vec<Option<Exp>> = Vec::new();
        let mut parents: Vec<Option<usize>> = Vec::new();
        let mut stack: Vec<(NodeId, Option<usize>)> = root_node.children.iter().rev().map(|&c| (c, None)).collect();

        while let Some((id, parent)) = stack.pop() {
            let node = &nodes[id];

            // Objects inside lists, as in `or: [{ .. }, { .. }]`.
            if node.name.is_empty() {
                stack.extend(node.children.iter().rev().map(|&c| (c, parent)));
                continue;
            }

            if let Some(op) = logical_op(node.name) {
                if node.children.is_empty() {
                    return Err(CompileError::MissingOperand(operand_name(op)));
                }

                exps.push(Some(Exp::new(op)));
                parents.push(parent);

                let idx = exps.len() - 1;
                stack.extend(node.children.iter().rev().map(|&c| (c, Some(idx))));
                continue;
            }

            let (op, guess) = match ExpOp::from_keyword(node.name) {
                Some(op) => (op, false),
                None if node.kind == NodeKind::Obj => {
                    if node.children.is_empty() {
                        return Err(CompileError::InvalidOperation(node.name.to_owned()));
                    }

                    stack.extend(node.children.iter().rev().map(|&c| (c, parent)));
                    continue;
                }
                None if node.kind == NodeKind::List => (ExpOp::In, true),
                None => (ExpOp::Equals, true),
            };

            let exp = self.comparison(nodes, root, id, op, guess)?;

            if node.kind == NodeKind::Var && USER_VARS.contains(&node.value) {
                needs_user = true;
            }

            exps.push(Some(exp));
            parents.push(parent);
        }

        // Children always come after their parent, so a reverse pass sees complete subtrees.
        let mut roots = Vec::new();

        for idx in (0..exps.len()).rev() {
            let Some(mut exp) = exps[idx].take() else {
                continue;
            };

            exp.children.reverse();

            if exp.op.is_logical() {
                if exp.children.is_empty() {
                    return Err(CompileError::MissingOperand(operand_name(exp.op)));
                }

                if exp.op == ExpOp::Not && exp.children.len() > 1 {
                    let children = std::mem::take(&mut exp.children);
                    exp.children.push(Exp::with_children(ExpOp::And, children));
                }
            }

            match parents[idx].and_then(|p| exps[p].as_mut()) {
                Some(parent) => parent.children.push(exp),
                None => roots.push(exp),
            }
        }

        roots.reverse();

        let exp = match roots.len() {
            0 => return Err(CompileError::InvalidArgument("empty filter".to_owned())),
            1 => roots.remove(0),
            _ => Exp::with_children(ExpOp::And, roots),
        };

        Ok((exp, needs_user))
    }

    fn comparison(
        &self,
        nodes: &NodeArena<'_>,
        root: NodeId,
        id: NodeId,
        mut op: ExpOp,
        guess: bool,
    ) -> CompileResult<Exp> {
        let node = &nodes[id];
        let mut path = column_path(nodes, root, id);

        if !guess {
            path.pop();
        }

        let (joins, col) = self.resolve(&path, node.name)?;
        let mut exp = Exp::new(op);

        match node.kind {
            NodeKind::Obj => return Err(CompileError::InvalidFilterValue(node.name.to_owned())),
            NodeKind::List => {
                exp.right.val_type = ValType::List;
                exp.right.list_type = node
                    .children
                    .first()
                    .map(|&c| val_type(nodes[c].kind))
                    .unwrap_or(ValType::Str);
                exp.right.list_val = node.children.iter().map(|&c| nodes[c].value.to_owned()).collect();
            }
            kind => {
                exp.right.val_type = val_type(kind);
                exp.right.val = node.value.to_owned();

                if op == ExpOp::IsNull && kind == NodeKind::Bool && node.value.eq_ignore_ascii_case("false") {
                    op = ExpOp::IsNotNull;
                    exp.right.val_type = ValType::None;
                    exp.right.val.clear();
                }
            }
        }

        if !guess && op.takes_list() && !matches!(exp.right.val_type, ValType::List | ValType::Var) {
            return Err(CompileError::InvalidFilterValue(node.name.to_owned()));
        }

        // Equality against an array column means containment.
        if guess && col.array {
            op = ExpOp::Contains;

            if exp.right.val_type != ValType::List && exp.right.val_type != ValType::Var {
                exp.right.list_type = exp.right.val_type;
                exp.right.list_val = vec![std::mem::take(&mut exp.right.val)];
                exp.right.val_type = ValType::List;
            }
        }

        exp.op = op;

        if self.json {
            exp.right.path = path.iter().map(|s| s.to_string()).collect();
        }

        if joins.is_empty() {
            exp.left.id = self.select_id;
        }

        exp.left.col = Some(col);
        exp.joins = joins;

        Ok(exp)
    }

    /// Follows relationship hops from the table being filtered to the column named last.
    fn resolve(&self, path: &[&str], op_name: &str) -> CompileResult<(Vec<Join>, DbColumn)> {
        let Some((col_name, hops)) = path.split_last() else {
            return Err(CompileError::InvalidOperation(op_name.to_owned()));
        };

        let mut joins = Vec::new();
        let mut current: Option<Arc<DbTable>> = None;
        let mut prev = self.ti.name.clone();

        for hop in hops {
            let hop = self.name(hop);

            if hop.as_ref() == self.ti.name.as_str() {
                continue;
            }

            let filter_path = || CompileError::FilterPath {
                segment: hop.to_string(),
                table: prev.clone(),
            };

            let rels = self.catalog.find_path(&hop, &prev, None).map_err(|_| filter_path())?;
            let first = rels.first().ok_or_else(filter_path)?;

            current = Some(first.left.table.clone());

            for rel in rels.into_iter().rev() {
                joins.push(Join {
                    filter: build_filter(&rel, None).map(Box::new),
                    rel,
                    local: true,
                });
            }

            prev = hop.into_owned();
        }

        let ti = current.as_deref().unwrap_or(self.ti);
        let col = ti.get_column(&self.name(col_name))?.clone();

        Ok((joins, col))
    }

    fn name<'n>(&self, name: &'n str) -> Cow<'n, str> {
        if self.camelcase {
            Cow::Owned(name.to_snake_case())
        } else {
            Cow::Borrowed(name)
        }
    }
}

/// Compiles role policy filters and AND-s them together. A `"false"` filter blocks every row.
pub(crate) fn compile_filters(
    catalog: &dyn Catalog,
    ti: &DbTable,
    filters: &[String],
) -> CompileResult<(Option<Exp>, bool)> {
    let mut filter = None;
    let mut needs_user = false;

    for text in filters {
        if text.trim().eq_ignore_ascii_case("false") {
            return Ok((Some(Exp::new(ExpOp::False)), false));
        }

        let tree = parse_arg_value(text, false)?;
        let (exp, user) = ExpCompiler::new(catalog, ti).compile(&tree.nodes, tree.root)?;

        needs_user |= user;
        and_filter_last(&mut filter, exp);
    }

    Ok((filter, needs_user))
}

/// Compiles a filter given as part of a json mutation payload.
pub(crate) fn compile_json_filter(catalog: &dyn Catalog, ti: &DbTable, value: &Value) -> CompileResult<(Exp, bool)> {
    let text = serde_json::to_string(value).map_err(|err| CompileError::InvalidMutation(err.to_string()))?;
    let tree = parse_arg_value(&text, true)?;

    ExpCompiler::new(catalog, ti).json().compile(&tree.nodes, tree.root)
}

fn logical_op(name: &str) -> Option<ExpOp> {
    match name {
        "and" | "_and" => Some(ExpOp::And),
        "or" | "_or" => Some(ExpOp::Or),
        "not" | "_not" => Some(ExpOp::Not),
        _ => None,
    }
}

fn operand_name(op: ExpOp) -> &'static str {
    match op {
        ExpOp::And => "AND",
        ExpOp::Or => "OR",
        _ => "NOT",
    }
}

fn val_type(kind: NodeKind) -> ValType {
    match kind {
        NodeKind::Str | NodeKind::Label => ValType::Str,
        NodeKind::Num => ValType::Num,
        NodeKind::Bool => ValType::Bool,
        NodeKind::List => ValType::List,
        NodeKind::Obj => ValType::Obj,
        NodeKind::Var => ValType::Var,
    }
}

/// Names of the object keys between `root` and `id`, outermost first, logical keys left out.
fn column_path<'n>(nodes: &NodeArena<'n>, root: NodeId, id: NodeId) -> Vec<&'n str> {
    let mut names = Vec::new();
    let mut cur = Some(id);

    while let Some(node_id) = cur {
        if node_id == root {
            break;
        }

        let node = nodes.get(node_id);

        if !node.name.is_empty() && logical_op(node.name).is_none() {
            names.push(node.name);
        }

        cur = node.parent;
    }

    names.reverse();
    names
}
