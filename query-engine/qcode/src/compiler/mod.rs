//! Turns a parsed [`Operation`] into [`QCode`] for one role.
//!
//! Selections are compiled breadth first from an explicit queue, so select ids follow discovery
//! order and nesting depth never grows the call stack.

mod args;
mod directives;
mod fields;
mod filter;
mod mutation;
mod order_by;

pub(crate) use filter::compile_filters;

use crate::{
    CompileError, CompileResult, CompilerConfig, ConfigError, DEFAULT_LIMIT, Exp, ExpOp, Join,
    OrderBy, PagingType, QCode, QCodeResult, QType, RoleTable, SelType, Select, SelectId,
    SkipType, TableRoleConfig, ValType, Var,
    exp::and_filter,
    roles::{ANON_ROLE, TableRole},
    value::node_to_json,
};
use heck::ToSnakeCase;
use parking_lot::RwLock;
use query_document::{FieldId, FieldKind as DocFieldKind, OpKind, Operation, parse};
use query_structure::{Catalog, DbColumn, DbRel, DbTable, DbType, RelType};
use serde_json::{Map, Value};
use std::{borrow::Cow, collections::VecDeque, sync::Arc};

/// Selects allowed in one document.
pub const MAX_SELECTORS: usize = 100;

/// Compiles documents against one catalog. Cheap to share between threads.
#[derive(Debug)]
pub struct Compiler {
    catalog: Arc<dyn Catalog>,
    config: CompilerConfig,
    roles: RwLock<Arc<RoleTable>>,
    anon_fallback: TableRole,
    fallback: TableRole,
}

impl Compiler {
    pub fn new(catalog: Arc<dyn Catalog>, config: CompilerConfig) -> Self {
        let anon_fallback = TableRole::fallback(config.default_block);

        Self {
            catalog,
            config,
            roles: RwLock::new(Arc::new(RoleTable::new())),
            anon_fallback,
            fallback: TableRole::fallback(false),
        }
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// The role table in use. Compiles started earlier may still hold an older one.
    pub fn roles(&self) -> Arc<RoleTable> {
        self.roles.read().clone()
    }

    /// Replaces the whole role table, returning the previous one.
    pub fn swap_roles(&self, roles: RoleTable) -> Arc<RoleTable> {
        std::mem::replace(&mut *self.roles.write(), Arc::new(roles))
    }

    /// Adds one policy by building a new role table and swapping it in. The write lock is held
    /// throughout so concurrent registrations are never lost.
    pub fn add_role(&self, role: &str, table: &str, config: TableRoleConfig) -> Result<(), ConfigError> {
        let mut guard = self.roles.write();

        let mut roles = RoleTable::clone(&guard);
        roles.add_role(self.catalog.as_ref(), role, table, config)?;
        *guard = Arc::new(roles);

        Ok(())
    }

    /// Compiles `query` for `role`. `vars` are needed only by mutations taking their payload
    /// from a variable.
    #[tracing::instrument(skip_all, fields(role = role))]
    pub fn compile(&self, query: &str, vars: Option<&Map<String, Value>>, role: &str) -> QCodeResult<QCode> {
        let op = parse(query)?;
        let roles = self.roles();

        let kind = match op.kind {
            OpKind::Query => QType::Query,
            OpKind::Subscription => QType::Subscription,
            // Refined from the root field's arguments.
            OpKind::Mutation => QType::Insert,
        };

        let mut compilation = Compilation {
            co: self,
            roles: &roles,
            op: &op,
            role,
            vars,
            qc: QCode::new(kind, op.name, query),
        };

        compilation.compile_query()?;

        if compilation.qc.kind.is_mutation() {
            compilation.compile_mutation()?;
        }

        let qc = compilation.qc;

        tracing::debug!(
            kind = %qc.kind,
            selects = qc.selects.len(),
            mutates = qc.mutates.len(),
            "compiled document"
        );

        Ok(qc)
    }
}

/// State of a single compile call.
pub(crate) struct Compilation<'c, 'q> {
    co: &'c Compiler,
    roles: &'c RoleTable,
    op: &'c Operation<'q>,
    role: &'c str,
    vars: Option<&'c Map<String, Value>>,
    qc: QCode,
}

impl<'c, 'q> Compilation<'c, 'q> {
    fn compile_query(&mut self) -> CompileResult<()> {
        let op = self.op;

        if op.fields.is_empty() {
            return Err(CompileError::NoQuery);
        }

        if op.kind == OpKind::Mutation {
            self.set_mutation_type()?;
        }

        self.compile_op_directives()?;

        self.qc.vars = op
            .var_defs
            .iter()
            .map(|def| Var {
                name: def.name.to_owned(),
                default: def.default.map(|id| node_to_json(&op.nodes, id)),
            })
            .collect();

        let mut queue: VecDeque<(FieldId, Option<SelectId>)> = VecDeque::new();

        for field in op.roots() {
            if field.name == "__typename" && !op.name.is_empty() {
                self.qc.typename = true;
            }

            queue.push_back((field.id, None));
        }

        while let Some((field_id, parent)) = queue.pop_front() {
            let field = &op.fields[field_id];

            if field.kind == DocFieldKind::Keyword {
                continue;
            }

            if self.qc.selects.len() == MAX_SELECTORS {
                return Err(CompileError::TooManySelectors { max: MAX_SELECTORS });
            }

            let id = self.qc.selects.len();
            let mut sel = Select::new(id, parent, field.response_name());

            self.compile_select_directives(&mut sel, field)?;
            self.add_rel_info(&mut sel, field_id)?;

            let tr = self.table_role(&sel.ti);
            let policy = tr.policy(self.qc.kind);

            if tr.is_blocked(self.qc.kind) {
                if self.qc.kind.is_mutation() {
                    return Err(CompileError::OperationBlocked {
                        kind: self.qc.kind,
                        name: sel.field_name.clone(),
                        role: self.role.to_owned(),
                    });
                }

                tracing::debug!(table = %sel.table, "select blocked for role");
                sel.skip = SkipType::Blocked;
            }

            self.set_limit(&mut sel, tr);
            self.compile_select_args(&mut sel, field)?;
            self.compile_fields(&mut queue, &mut sel, field, tr)?;

            if let Some(filter) = &policy.filter {
                if filter.op == ExpOp::False {
                    sel.filter = Some(filter.clone());
                } else {
                    and_filter(&mut sel.filter, filter.clone());
                }

                if policy.needs_user && self.role == ANON_ROLE {
                    sel.skip = SkipType::UserNeeded;
                }
            }

            if sel.paging.cursor {
                order_by_id_col(&mut sel)?;

                if sel.paging.kind != PagingType::Offset {
                    add_seek_predicate(&mut sel);
                }
            }

            self.set_rel_filters(&mut sel);
            validate_select(&sel)?;

            self.qc.selects.push(sel);
        }

        if self.qc.selects.is_empty() {
            return Err(CompileError::NoSelectors);
        }

        Ok(())
    }

    /// Links the select to its parent and resolves the table it reads.
    fn add_rel_info(&mut self, sel: &mut Select, field_id: FieldId) -> CompileResult<()> {
        let op = self.op;
        let field = &op.fields[field_id];

        let mut child = Some(field);
        let mut parent = field.parent_id.map(|id| &op.fields[id]);

        match sel.parent_id {
            Some(pid) => self.qc.selects[pid].children.push(sel.id),
            None => self.qc.roots.push(sel.id),
        }

        match field.kind {
            DocFieldKind::Union => {
                if sel.parent_id.is_none() {
                    return Err(CompileError::UnionWithoutParent);
                }

                sel.kind = SelType::Union;
            }
            DocFieldKind::Member => {
                let Some(pid) = sel.parent_id else {
                    return Err(CompileError::UnionWithoutParent);
                };

                sel.kind = SelType::Member;
                sel.singular = self.qc.selects[pid].singular;

                // The relationship is the one of the union with its own parent.
                child = parent;
                parent = parent.and_then(|p| p.parent_id).map(|id| &op.fields[id]);
            }
            _ => (),
        }

        if let (false, Some(_), Some(child), Some(parent)) = (sel.not_related, sel.parent_id, child, parent) {
            let child_name = self.table_name(child.name);
            let parent_name = self.table_name(parent.name);

            let mut path = self
                .co
                .catalog
                .find_path(&child_name, &parent_name, sel.through.as_deref())?
                .into_iter();

            if let Some(rel) = path.next() {
                let hops: Vec<DbRel> = path.collect();
                let last = hops.len().saturating_sub(1);

                for (i, rel) in hops.into_iter().enumerate().rev() {
                    let pid = if i == last { sel.parent_id } else { None };

                    sel.joins.push(Join {
                        filter: build_filter(&rel, pid).map(Box::new),
                        rel,
                        local: false,
                    });
                }

                sel.rel = Some(rel);
            }
        }

        let name = self.table_name(field.name);
        let rel_kind = sel.rel_kind();

        let ti = match &sel.rel {
            Some(rel) if !matches!(rel_kind, RelType::Polymorphic | RelType::None) => rel.left.table.clone(),
            _ => {
                let schema = sel.schema.as_deref().unwrap_or(&self.co.config.db_schema);
                self.co.catalog.find(schema, &name)?
            }
        };

        if ti.blocked {
            return Err(CompileError::BlockedTable(name.into_owned()));
        }

        sel.table.clone_from(&ti.name);
        sel.ti = ti;

        if rel_kind == RelType::Remote {
            sel.table = name.into_owned();
            self.qc.remotes += 1;
            return Ok(());
        }

        if !sel.singular && !sel.has_parent_joins() {
            sel.singular = match &sel.rel {
                Some(rel) => {
                    (rel.kind == RelType::OneToMany && !rel.right.col.array) || rel.kind == RelType::Polymorphic
                }
                None => false,
            };
        }

        Ok(())
    }

    fn table_role(&self, ti: &DbTable) -> &'c TableRole {
        let roles: &'c RoleTable = self.roles;
        let co: &'c Compiler = self.co;

        match roles.get(self.role, &ti.schema, &ti.name) {
            Some(tr) => tr,
            None if self.role == ANON_ROLE => {
                tracing::trace!(table = %ti.name, "no policy, using anonymous default");
                &co.anon_fallback
            }
            None => &co.fallback,
        }
    }

    fn set_limit(&self, sel: &mut Select, tr: &TableRole) {
        if sel.paging.limit != 0 {
            return;
        }

        let limit = tr.policy(self.qc.kind).limit;

        sel.paging.limit = if limit != 0 {
            limit
        } else if self.co.config.default_limit != 0 {
            self.co.config.default_limit
        } else {
            DEFAULT_LIMIT
        };
    }

    /// Join condition between the select and its parent.
    fn set_rel_filters(&self, sel: &mut Select) {
        let Some(rel) = sel.rel.clone() else {
            return;
        };

        let pid = if sel.has_parent_joins() { None } else { sel.parent_id };

        match rel.kind {
            RelType::OneToOne | RelType::OneToMany | RelType::Embedded => {
                if let Some(filter) = build_filter(&rel, pid) {
                    and_filter(&mut sel.filter, filter);
                }
            }
            RelType::Polymorphic if sel.kind == SelType::Member => {
                let pid = sel.parent_id.and_then(|union| self.qc.selects[union].parent_id);
                let owner = pid.map(|p| self.qc.selects[p].ti.name.clone()).unwrap_or_default();

                // member.id = owner.<id column> AND owner.<type column> = 'member'
                let mut id_match = Exp::columns(ExpOp::Equals, rel.right.col.clone(), rel.left.col.clone());
                id_match.left.table.clone_from(&sel.ti.name);
                id_match.right.table.clone_from(&owner);
                id_match.right.id = pid;

                let left = &rel.left.col;
                let mut type_match = Exp::new(ExpOp::Equals);
                type_match.left.id = pid;
                type_match.left.table = owner;
                type_match.left.col = Some(DbColumn::new(&left.schema, &left.table, &left.fkey_col, "text"));
                type_match.right.val_type = ValType::Str;
                type_match.right.val.clone_from(&sel.ti.name);

                and_filter(&mut sel.filter, Exp::with_children(ExpOp::And, vec![id_match, type_match]));
            }
            RelType::Recursive => {
                let find = sel.internal_arg("find").map(|a| a.val.as_str()).unwrap_or_default();
                let filter = recursive_filter(&rel, find == "parents");
                and_filter(&mut sel.filter, filter);
            }
            _ => (),
        }
    }

    /// Table name for a field name: camelCase converted and the singular `_by_id` suffix removed.
    fn table_name<'n>(&self, name: &'n str) -> Cow<'n, str> {
        let name = self.parse_name(name);

        let trimmed = name
            .strip_suffix("_by_id")
            .or_else(|| name.strip_suffix("ByID"))
            .map(str::to_owned);

        match trimmed {
            Some(trimmed) => Cow::Owned(trimmed),
            None => name,
        }
    }

    fn parse_name<'n>(&self, name: &'n str) -> Cow<'n, str> {
        if self.co.config.enable_camelcase {
            Cow::Owned(name.to_snake_case())
        } else {
            Cow::Borrowed(name)
        }
    }

    fn is_mysql(&self) -> bool {
        self.co.catalog.db_type() == DbType::Mysql
    }
}

/// Join condition for one relationship hop. `pid` names the select holding the right side.
pub(crate) fn build_filter(rel: &DbRel, pid: Option<SelectId>) -> Option<Exp> {
    let (left, right) = (&rel.left.col, &rel.right.col);

    match rel.kind {
        RelType::OneToOne | RelType::OneToMany => {
            let exp = if !left.array && right.array {
                let mut exp = Exp::columns(ExpOp::In, left.clone(), right.clone());
                exp.right.id = pid;
                exp
            } else if left.array && !right.array {
                let mut exp = Exp::columns(ExpOp::In, right.clone(), left.clone());
                exp.left.id = pid;
                exp
            } else {
                let mut exp = Exp::columns(ExpOp::Equals, left.clone(), right.clone());
                exp.right.id = pid;
                exp
            };

            Some(exp)
        }
        RelType::Embedded => {
            let mut exp = Exp::columns(ExpOp::Equals, right.clone(), right.clone());
            exp.right.id = pid;
            Some(exp)
        }
        _ => None,
    }
}

/// Filter of the recursive CTE walking a self-referencing relationship up or down.
fn recursive_filter(rel: &DbRel, parents: bool) -> Exp {
    let cte = format!("__rcte_{}", rel.right.table.name);
    let (l, r) = (&rel.left.col, &rel.right.col);

    let compare = |op: ExpOp, left: (&str, &DbColumn), right: (&str, &DbColumn)| {
        let mut exp = Exp::columns(op, left.1.clone(), right.1.clone());
        exp.left.table = left.0.to_owned();
        exp.right.table = right.0.to_owned();
        exp
    };

    let mut not_null = Exp::new(ExpOp::IsNotNull);

    let (step, link) = if parents {
        not_null.left.table.clone_from(&cte);
        not_null.left.col = Some(l.clone());

        if !l.array && r.array {
            (
                compare(ExpOp::NotIn, (&cte, l), (&cte, r)),
                compare(ExpOp::In, (&cte, l), ("", r)),
            )
        } else if l.array && !r.array {
            (
                compare(ExpOp::NotIn, (&cte, r), (&cte, l)),
                compare(ExpOp::In, ("", r), (&cte, l)),
            )
        } else {
            (
                compare(ExpOp::NotEquals, (&cte, l), (&cte, r)),
                compare(ExpOp::Equals, ("", r), (&cte, l)),
            )
        }
    } else {
        not_null.left.col = Some(l.clone());

        if !l.array && r.array {
            (
                compare(ExpOp::NotIn, ("", l), ("", r)),
                compare(ExpOp::In, ("", l), (&cte, r)),
            )
        } else if l.array && !r.array {
            (
                compare(ExpOp::NotIn, ("", r), ("", l)),
                compare(ExpOp::In, (&cte, r), ("", l)),
            )
        } else {
            (
                compare(ExpOp::NotEquals, ("", l), ("", r)),
                compare(ExpOp::Equals, ("", l), (&cte, r)),
            )
        }
    };

    Exp::with_children(ExpOp::And, vec![not_null, step, link])
}

/// Cursor paging needs a unique sort key, the primary key is appended when missing.
fn order_by_id_col(sel: &mut Select) -> CompileResult<()> {
    let Some(pk) = sel.ti.primary_col.clone() else {
        return Err(CompileError::PrimaryKeyRequired(sel.ti.name.clone()));
    };

    sel.add_base_col(pk.clone());

    if !sel.order_by.iter().any(|ob| ob.col.name == pk.name) {
        sel.order_by.push(OrderBy::new(pk, sel.order));
    }

    Ok(())
}

/// `(a, b) > (__cur.a, __cur.b)` written as `a > __cur.a OR (a = __cur.a AND b > __cur.b)`,
/// true for every row when there is no cursor yet.
fn add_seek_predicate(sel: &mut Select) {
    let Some(first) = sel.order_by.first() else {
        return;
    };

    let mut no_cursor = Exp::new(ExpOp::IsNull);
    no_cursor.left.table = "__cur".to_owned();
    no_cursor.left.col = Some(first.col.clone());

    let mut or = vec![no_cursor];

    for i in 0..sel.order_by.len() {
        let mut and = Vec::with_capacity(i + 1);

        for (n, ob) in sel.order_by.iter().enumerate().take(i + 1) {
            let op = if n != i {
                ExpOp::Equals
            } else if ob.order.is_desc() {
                ExpOp::LesserThan
            } else {
                ExpOp::GreaterThan
            };

            let mut exp = Exp::columns(op, ob.col.clone(), ob.col.clone());
            exp.right.table = "__cur".to_owned();
            and.push(exp);
        }

        if and.len() == 1 {
            or.extend(and);
        } else {
            or.push(Exp::with_children(ExpOp::And, and));
        }
    }

    and_filter(&mut sel.filter, Exp::with_children(ExpOp::Or, or));
}

fn validate_select(sel: &Select) -> CompileResult<()> {
    if sel.rel_kind() != RelType::Recursive {
        return Ok(());
    }

    match sel.internal_arg("find").map(|a| a.val.as_str()) {
        Some("parents" | "children") => Ok(()),
        Some(_) => Err(CompileError::InvalidArgument(
            "valid values for 'find' are 'parents' and 'children'".to_owned(),
        )),
        None => Err(CompileError::FindRequired),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;
    use indexmap::IndexMap;
    use query_structure::{DbInfo, DbSchema, RelEnd, TableKind};
    use tracing_test::traced_test;

    fn col(table: &str, name: &str) -> DbColumn {
        DbColumn::new("public", table, name, "bigint")
    }

    fn rel(kind: RelType, left: DbColumn, right: DbColumn) -> DbRel {
        let table = |c: &DbColumn| Arc::new(DbTable::new("public", &c.table, TableKind::Table, vec![c.clone()]));

        DbRel {
            kind,
            left: RelEnd {
                table: table(&left),
                col: left,
            },
            right: RelEnd {
                table: table(&right),
                col: right,
            },
        }
    }

    #[test]
    fn join_filters_by_relationship_kind() {
        let one = rel(RelType::OneToMany, col("users", "id"), col("products", "user_id"));
        expect!["eq(users.id, products_0.user_id)"].assert_eq(&build_filter(&one, Some(0)).unwrap().to_string());

        let tags = rel(RelType::OneToMany, col("tags", "id"), col("products", "tag_ids").array());
        expect!["in(tags.id, products_2.tag_ids)"].assert_eq(&build_filter(&tags, Some(2)).unwrap().to_string());

        let poly = rel(RelType::Polymorphic, col("subject", "subject_id"), col("notifications", "id"));
        assert!(build_filter(&poly, Some(0)).is_none());
    }

    #[test]
    fn recursive_filters_walk_both_ways() {
        let reply = rel(RelType::Recursive, col("comments", "reply_to_id"), col("comments", "id"));

        expect!["and(is_not_null(__rcte_comments.reply_to_id), neq(__rcte_comments.reply_to_id, __rcte_comments.id), eq(comments.id, __rcte_comments.reply_to_id))"]
            .assert_eq(&recursive_filter(&reply, true).to_string());

        expect!["and(is_not_null(comments.reply_to_id), neq(comments.reply_to_id, comments.id), eq(comments.reply_to_id, __rcte_comments.id))"]
            .assert_eq(&recursive_filter(&reply, false).to_string());
    }

    fn compiler(config: CompilerConfig) -> Compiler {
        let columns = vec![
            DbColumn::new("public", "products", "id", "bigint").primary_key(),
            DbColumn::new("public", "products", "name", "text"),
        ];

        let info = DbInfo::new(DbType::Postgres, 140000, "public", "db", columns, vec![], &[]).unwrap();
        let catalog = DbSchema::new(info, &IndexMap::new()).unwrap();

        Compiler::new(Arc::new(catalog), config)
    }

    #[test]
    #[traced_test]
    fn anonymous_requests_fall_back_to_the_default_policy() {
        let co = compiler(CompilerConfig::default());
        let qc = co.compile("{ products { id name } }", None, ANON_ROLE).unwrap();

        assert_eq!(qc.selects[0].skip, SkipType::None);
        assert_eq!(qc.selects[0].paging.limit, DEFAULT_LIMIT);
        assert!(logs_contain("no policy, using anonymous default"));
        assert!(logs_contain("compiled document"));
    }

    #[test]
    fn default_block_hides_tables_without_a_policy() {
        let co = compiler(CompilerConfig {
            default_block: true,
            ..Default::default()
        });

        let qc = co.compile("{ products { id } }", None, ANON_ROLE).unwrap();
        assert_eq!(qc.selects[0].skip, SkipType::Blocked);

        let qc = co.compile("{ products { id } }", None, "user").unwrap();
        assert_eq!(qc.selects[0].skip, SkipType::None);
    }
}
