use super::{Compilation, build_filter};
use crate::{CompileError, CompileResult, Join, Order, OrderBy, Select};
use query_document::{Arg as DocArg, Node, NodeKind};
use query_structure::DbColumn;
use std::collections::HashSet;

const ORDER_VALUES: &str = "valid values include asc, desc, asc_nulls_first and desc_nulls_first";

impl Compilation<'_, '_> {
    /// `order_by: { price: desc, user: { email: asc }, id: [$ids, "asc"] }` or `order_by: $var`
    /// picking one of the table's configured sorts.
    pub(super) fn compile_arg_order_by(&mut self, sel: &mut Select, arg: &DocArg<'_>) -> CompileResult<()> {
        let node = self.expect_kind(arg, &[NodeKind::Obj, NodeKind::Var], "an object or a variable")?;

        let mut seen: HashSet<String> = sel.order_by.iter().map(|ob| qualified(&ob.col)).collect();

        if node.kind == NodeKind::Var {
            return self.order_by_sets(sel, node.value, &seen);
        }

        let nodes = &self.op.nodes;

        for (_, child) in nodes.children(arg.value) {
            let order_error = |message: &str| CompileError::OrderBy {
                arg: child.name.to_owned(),
                message: message.to_owned(),
            };

            let ob = match child.kind {
                NodeKind::Str | NodeKind::Label => {
                    let col = self.order_column(sel, child.name, None).map_err(|e| order_error(&e.to_string()))?;
                    OrderBy::new(col, to_order(child).map_err(|m| order_error(m))?)
                }
                NodeKind::List => {
                    let [var, order] = child.children.as_slice() else {
                        return Err(order_error("expecting a list of a variable and an order, e.g. [$ids, \"desc\"]"));
                    };

                    let (var, order) = (&nodes[*var], &nodes[*order]);

                    if var.kind != NodeKind::Var {
                        return Err(order_error("the first value must be a variable"));
                    }

                    let col = self.order_column(sel, child.name, None).map_err(|e| order_error(&e.to_string()))?;
                    let mut ob = OrderBy::new(col, to_order(order).map_err(|m| order_error(m))?);
                    ob.var = Some(var.value.to_owned());
                    ob
                }
                NodeKind::Obj => {
                    let Some(&inner) = child.children.first() else {
                        return Err(order_error("expecting a column of the related table"));
                    };

                    let inner = &nodes[inner];
                    let col = self
                        .order_column(sel, inner.name, Some(child.name))
                        .map_err(|e| order_error(&e.to_string()))?;

                    OrderBy::new(col, to_order(inner).map_err(|m| order_error(m))?)
                }
                _ => return Err(order_error("expecting a string, an object or a list")),
            };

            if !seen.insert(qualified(&ob.col)) {
                return Err(order_error("can only be defined once"));
            }

            sel.order_by.push(ob);
        }

        Ok(())
    }

    /// Column to sort on, on the select's table or on a related one reached with local joins.
    fn order_column(&self, sel: &mut Select, name: &str, related: Option<&str>) -> CompileResult<DbColumn> {
        let name = self.parse_name(name);

        let Some(related) = related else {
            return Ok(sel.ti.get_column(&name)?.clone());
        };

        let related = self.parse_name(related);
        let path = self.co.catalog.find_path(&related, &sel.ti.name, None)?;

        let Some(first) = path.first() else {
            return Err(CompileError::FilterPath {
                segment: related.into_owned(),
                table: sel.ti.name.clone(),
            });
        };

        let col = first.left.table.get_column(&name)?.clone();

        for rel in path.into_iter().rev() {
            sel.joins.push(Join {
                filter: build_filter(&rel, None).map(Box::new),
                rel,
                local: true,
            });
        }

        Ok(col)
    }

    /// Expands every configured sort of the table, tagged with its key, for the renderer to
    /// pick from with the variable at run time.
    fn order_by_sets(&self, sel: &mut Select, var: &str, seen: &HashSet<String>) -> CompileResult<()> {
        let Some(table) = self.co.config.table(&sel.ti.name).filter(|t| !t.order_by.is_empty()) else {
            return Err(CompileError::InvalidArgument(format!(
                "no order by options defined for table '{}'",
                sel.ti.name
            )));
        };

        for (key, columns) in &table.order_by {
            for [name, order] in columns {
                if seen.contains(&format!("{}.{name}", sel.ti.name)) {
                    return Err(CompileError::InvalidArgument(format!("duplicate column '{name}'")));
                }

                let col = sel.ti.get_column(name)?.clone();
                let order = Order::from_keyword(order).ok_or_else(|| CompileError::OrderBy {
                    arg: name.clone(),
                    message: ORDER_VALUES.to_owned(),
                })?;

                let mut ob = OrderBy::new(col, order);
                ob.key_var = var.to_owned();
                ob.key.clone_from(key);
                sel.order_by.push(ob);
            }
        }

        Ok(())
    }
}

fn qualified(col: &DbColumn) -> String {
    format!("{}.{}", col.table, col.name)
}

fn to_order(node: &Node<'_>) -> Result<Order, &'static str> {
    match node.kind {
        NodeKind::Str | NodeKind::Label => Order::from_keyword(node.value).ok_or(ORDER_VALUES),
        _ => Err(ORDER_VALUES),
    }
}
