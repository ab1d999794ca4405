//! Plans mutations: the payload is unfolded into one step per table and the steps are put in
//! an order where every foreign key is known before it is written.

use super::{Compilation, filter::compile_json_filter};
use crate::{
    CompileError, CompileResult, Exp, ExpOp, LinkAction, MColumn, MRColumn, MType, Mutate, QType,
    value::node_to_json,
};
use indexmap::IndexMap;
use query_document::NodeKind;
use query_structure::{DbTable, RelType};
use serde_json::Value;
use std::{collections::HashSet, sync::Arc};

impl Compilation<'_, '_> {
    /// Picks insert, update, upsert or delete from the root field's arguments.
    pub(super) fn set_mutation_type(&mut self) -> CompileResult<()> {
        let op = self.op;

        let Some(root) = op.roots().next() else {
            return Err(CompileError::NoQuery);
        };

        for arg in &root.args {
            let Some(kind) = QType::from_action(arg.name) else {
                continue;
            };

            let node = &op.nodes[arg.value];
            self.qc.kind = kind;

            if kind == QType::Delete {
                if node.kind != NodeKind::Bool || !node.value.eq_ignore_ascii_case("true") {
                    return Err(CompileError::InvalidArgument("value for 'delete' must be 'true'".into()));
                }

                return Ok(());
            }

            let objects = !node.children.is_empty()
                && node.children.iter().all(|&id| op.nodes[id].kind == NodeKind::Obj);

            match node.kind {
                NodeKind::Var => self.qc.action_var = node.value.to_owned(),
                NodeKind::Obj => self.qc.action_val = Some(node_to_json(&op.nodes, arg.value)),
                NodeKind::List if objects => self.qc.action_val = Some(node_to_json(&op.nodes, arg.value)),
                _ => {
                    return Err(CompileError::ArgumentType {
                        arg: arg.name.to_owned(),
                        expected: "a variable, an object or a list of objects".into(),
                    });
                }
            }

            return Ok(());
        }

        Err(CompileError::MissingMutationAction)
    }

    /// Builds [`crate::QCode::mutates`] for the compiled root select.
    pub(super) fn compile_mutation(&mut self) -> CompileResult<()> {
        let kind = match self.qc.kind {
            QType::Insert => MType::Insert,
            QType::Update => MType::Update,
            QType::Upsert => MType::Upsert,
            QType::Delete => MType::Delete,
            QType::Query | QType::Subscription => return Ok(()),
        };

        let Some(&root) = self.qc.roots.first() else {
            return Err(CompileError::NoSelectors);
        };

        let (key, ti) = {
            let sel = &self.qc.selects[root];
            (sel.table.clone(), sel.ti.clone())
        };

        if kind != MType::Insert {
            let filtered = self
                .op
                .roots()
                .next()
                .is_some_and(|f| f.arg("where").is_some() || f.arg("id").is_some());

            if !filtered {
                return Err(CompileError::WhereRequired);
            }
        }

        if kind == MType::Delete {
            let step = Mutate::new(0, kind, &key, ti, Value::Null);
            self.check_step(&step)?;

            self.qc.munions.insert(step.ti.name.clone(), vec![0]);
            self.qc.mutates = vec![step];

            return Ok(());
        }

        let data = if self.qc.action_var.is_empty() {
            self.qc.action_val.clone().ok_or(CompileError::MissingMutationAction)?
        } else {
            let name = &self.qc.action_var;

            self.vars
                .and_then(|vars| vars.get(name))
                .cloned()
                .ok_or_else(|| CompileError::UndefinedVariable(name.clone()))?
        };

        if !is_payload(&data) {
            return Err(CompileError::InvalidMutation(
                "mutation payload must be an object or a list of objects".into(),
            ));
        }

        let mut tree = self.unfold(kind, &key, ti, data)?;

        add_dependencies(&mut tree);

        for step in tree.iter_mut() {
            self.check_step(step)?;
            step.cols = self.step_columns(step)?;
        }

        let mut mutates = in_execution_order(tree);

        for m in &mutates {
            if m.kind != MType::None {
                self.qc.munions.entry(m.ti.name.clone()).or_default().push(m.id);
            }
        }

        for m in mutates.iter_mut() {
            m.multi = self.qc.munions.get(&m.ti.name).is_some_and(|ids| ids.len() > 1);
        }

        tracing::debug!(steps = mutates.len(), kind = %kind, "planned mutation");

        self.qc.mutates = mutates;

        Ok(())
    }

    /// One step per nested object or list of objects that is related to its parent's table.
    /// `connect` and `disconnect` become steps of their own next to the step they appear in.
    fn unfold(&self, kind: MType, key: &str, ti: Arc<DbTable>, data: Value) -> CompileResult<Vec<Mutate>> {
        let mut tree = vec![Mutate::new(0, kind, key, ti, data)];
        let mut stack = vec![0];

        while let Some(idx) = stack.pop() {
            let entries = payload_entries(&tree[idx].data);

            let links_only = !entries.is_empty()
                && entries.keys().all(|k| k == "connect" || k == "disconnect");

            for (k, v) in entries {
                if !(v.is_object() || v.is_array()) {
                    continue;
                }

                let name = self.parse_name(&k).into_owned();

                if name == "connect" || name == "disconnect" {
                    let id = tree.len();
                    let link = self.link_step(kind, &tree[idx], id, &name, v)?;

                    let current = &mut tree[idx];
                    current.links |= if link.kind == MType::Connect {
                        LinkAction::Connect
                    } else {
                        LinkAction::Disconnect
                    };

                    if links_only {
                        current.kind = MType::None;
                    }

                    if let Some(pid) = link.parent_id {
                        tree[pid].children.push(id);
                    }

                    tree.push(link);
                    continue;
                }

                if name == "where" || name == "find" {
                    continue;
                }

                let path = self
                    .co
                    .catalog
                    .find_path(&self.table_name(&name), &self.table_name(&tree[idx].key), None);

                let rel = match path {
                    Ok(mut path) if path.len() == 1 => path.remove(0),
                    Ok(_) => {
                        return Err(CompileError::InvalidMutation(format!(
                            "'{name}' is only reachable through a join table and cannot be written to"
                        )));
                    }
                    // A json column holding an object or an array.
                    Err(_) => {
                        tree[idx].ti.get_column(&name)?;
                        continue;
                    }
                };

                let id = tree.len();
                let parent = &tree[idx];

                let mut child = Mutate::new(id, kind, &name, rel.left.table.clone(), v);
                child.parent_id = Some(idx);
                child.path = parent.path.iter().cloned().chain([name.clone()]).collect();
                child.rel = Some(rel);

                self.prepare_nested(&mut child, kind)?;

                tree[idx].children.push(id);
                tree.push(child);
                stack.push(id);
            }
        }

        Ok(tree)
    }

    /// A connect or disconnect step links existing rows of the step's table, found with the
    /// filter it holds, to the parent of that step.
    fn link_step(&self, kind: MType, current: &Mutate, id: usize, action: &str, data: Value) -> CompileResult<Mutate> {
        let link_kind = if action == "connect" {
            MType::Connect
        } else {
            MType::Disconnect
        };

        if link_kind == MType::Disconnect && kind == MType::Insert {
            return Err(CompileError::InvalidMutation(
                "disconnect is only valid with update or upsert".into(),
            ));
        }

        let Some(pid) = current.parent_id else {
            return Err(CompileError::InvalidMutation(format!(
                "{action} is only valid on a nested object"
            )));
        };

        let filter = self.json_filter(&current.ti, &data)?;

        let mut link = Mutate::new(id, link_kind, &current.key, current.ti.clone(), data);
        link.parent_id = Some(pid);
        link.rel.clone_from(&current.rel);
        link.path = current.path.iter().cloned().chain([action.to_owned()]).collect();
        link.filter = Some(self.with_policy(&current.ti, link_kind, filter));

        Ok(link)
    }

    /// Resolves the direction of recursive relationships and the `where` of nested updates.
    fn prepare_nested(&self, m: &mut Mutate, kind: MType) -> CompileResult<()> {
        let Some(rel) = m.rel.as_mut() else {
            return Ok(());
        };

        let obj = match &m.data {
            Value::Object(obj) => Some(obj),
            _ => None,
        };

        if rel.kind == RelType::Recursive {
            let default = if kind == MType::Insert { "child" } else { "parent" };
            let find = obj
                .and_then(|o| o.get("find"))
                .and_then(Value::as_str)
                .unwrap_or(default);

            match find {
                "child" | "children" => rel.kind = RelType::OneToOne,
                "parent" | "parents" => {
                    if kind == MType::Insert {
                        return Err(CompileError::InvalidMutation(format!(
                            "a new '{}' cannot have a parent",
                            m.key
                        )));
                    }

                    rel.kind = RelType::OneToMany;
                    std::mem::swap(&mut rel.left.col, &mut rel.right.col);
                }
                _ => {
                    return Err(CompileError::InvalidArgument(
                        "valid values for 'find' are 'parents' and 'children'".into(),
                    ));
                }
            }
        }

        if kind != MType::Update || !rel.left_holds_key() {
            return Ok(());
        }

        match obj.and_then(|o| o.get("where")) {
            Some(filter) => {
                let exp = self.json_filter(&m.ti, filter)?;
                m.filter = Some(self.with_policy(&m.ti, kind, exp));
            }
            None if obj.is_some_and(|o| o.contains_key("connect") || o.contains_key("disconnect")) => (),
            None => return Err(CompileError::MissingArgument("where".into())),
        }

        Ok(())
    }

    /// Filter from a payload object, a list of objects matches any of them.
    fn json_filter(&self, ti: &DbTable, value: &Value) -> CompileResult<Exp> {
        let catalog = self.co.catalog.as_ref();

        match value {
            Value::Array(items) if items.is_empty() => {
                Err(CompileError::InvalidMutation("expecting at least one object to match".into()))
            }
            Value::Array(items) => {
                let children = items
                    .iter()
                    .map(|item| compile_json_filter(catalog, ti, item).map(|(exp, _)| exp))
                    .collect::<CompileResult<Vec<_>>>()?;

                Ok(Exp::with_children(ExpOp::Or, children))
            }
            _ => compile_json_filter(catalog, ti, value).map(|(exp, _)| exp),
        }
    }

    fn with_policy(&self, ti: &DbTable, kind: MType, exp: Exp) -> Exp {
        let policy = self.table_role(ti).policy(query_type(kind));

        match &policy.filter {
            Some(filter) => Exp::with_children(ExpOp::And, vec![exp, filter.clone()]),
            None => exp,
        }
    }

    fn check_step(&self, m: &Mutate) -> CompileResult<()> {
        if m.kind == MType::None {
            return Ok(());
        }

        if m.ti.blocked {
            return Err(CompileError::BlockedTable(m.ti.name.clone()));
        }

        let kind = query_type(m.kind);

        if self.table_role(&m.ti).is_blocked(kind) {
            return Err(CompileError::OperationBlocked {
                kind,
                name: m.key.clone(),
                role: self.role.to_owned(),
            });
        }

        Ok(())
    }

    /// Presets first, then every column of the table present in the payload. Columns filled
    /// from another step are left out.
    fn step_columns(&self, m: &Mutate) -> CompileResult<Vec<MColumn>> {
        if !matches!(m.kind, MType::Insert | MType::Update | MType::Upsert) {
            return Ok(Vec::new());
        }

        let policy = self.table_role(&m.ti).policy(query_type(m.kind));

        let mut taken: HashSet<&str> = m.rcols.iter().map(|c| c.col.name.as_str()).collect();
        let mut cols = Vec::new();

        for (name, value) in &policy.presets {
            if !taken.insert(name.as_str()) {
                continue;
            }

            cols.push(MColumn {
                col: m.ti.get_column(name)?.clone(),
                field_name: name.clone(),
                value: value.clone(),
            });
        }

        let keys: HashSet<String> = payload_entries(&m.data)
            .keys()
            .map(|k| self.parse_name(k).into_owned())
            .collect();

        for col in &m.ti.columns {
            if taken.contains(col.name.as_str()) || !keys.contains(&col.name) {
                continue;
            }

            if col.blocked {
                return Err(CompileError::BlockedColumn {
                    schema: col.schema.clone(),
                    table: col.table.clone(),
                    column: col.name.clone(),
                });
            }

            if !policy.column_allowed(&col.name) {
                return Err(CompileError::ColumnNotAllowed {
                    column: col.name.clone(),
                    role: self.role.to_owned(),
                });
            }

            cols.push(MColumn {
                col: col.clone(),
                field_name: col.name.clone(),
                value: String::new(),
            });
        }

        Ok(cols)
    }
}

/// The step holding the foreign key waits for the step it points to.
fn add_dependencies(tree: &mut [Mutate]) {
    for idx in 1..tree.len() {
        let (Some(pid), Some(rel)) = (tree[idx].parent_id, tree[idx].rel.clone()) else {
            continue;
        };

        if tree[idx].kind == MType::None {
            continue;
        }

        if rel.left_holds_key() {
            let child = &mut tree[idx];
            child.depends_on.insert(pid);
            child.rcols.push(MRColumn {
                col: rel.left.col,
                vcol: rel.right.col,
            });
        } else {
            let parent = &mut tree[pid];
            parent.depends_on.insert(idx);
            parent.rcols.push(MRColumn {
                col: rel.right.col,
                vcol: rel.left.col,
            });
        }
    }
}

/// Topological order over `depends_on`, ties broken by discovery order. Ids are renumbered to
/// the new positions.
fn in_execution_order(tree: Vec<Mutate>) -> Vec<Mutate> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Open,
        Done,
    }

    let mut marks = vec![Mark::New; tree.len()];
    let mut order = Vec::with_capacity(tree.len());

    for start in 0..tree.len() {
        let mut stack = vec![(start, false)];

        while let Some((idx, finished)) = stack.pop() {
            if finished {
                marks[idx] = Mark::Done;
                order.push(idx);
                continue;
            }

            if marks[idx] != Mark::New {
                continue;
            }

            marks[idx] = Mark::Open;
            stack.push((idx, true));

            let deps = tree[idx].depends_on.iter().rev();
            stack.extend(deps.filter(|&&d| marks[d] == Mark::New).map(|&d| (d, false)));
        }
    }

    let mut position = vec![0; tree.len()];

    for (pos, &idx) in order.iter().enumerate() {
        position[idx] = pos;
    }

    let mut slots: Vec<Option<Mutate>> = tree.into_iter().map(Some).collect();

    order
        .iter()
        .filter_map(|&idx| slots[idx].take())
        .map(|mut m| {
            m.id = position[m.id];
            m.parent_id = m.parent_id.map(|p| position[p]);
            m.depends_on = m.depends_on.iter().map(|&d| position[d]).collect();
            m.children = m.children.iter().map(|&c| position[c]).collect();
            m
        })
        .collect()
}

fn query_type(kind: MType) -> QType {
    match kind {
        MType::Insert => QType::Insert,
        MType::Upsert => QType::Upsert,
        MType::Delete => QType::Delete,
        MType::Update | MType::Connect | MType::Disconnect | MType::None => QType::Update,
    }
}

fn is_payload(data: &Value) -> bool {
    match data {
        Value::Object(_) => true,
        Value::Array(items) => !items.is_empty() && items.iter().all(Value::is_object),
        _ => false,
    }
}

/// Keys of an object, or the union of the keys of a list of objects with the first value seen.
fn payload_entries(data: &Value) -> IndexMap<String, Value> {
    let mut entries = IndexMap::new();

    let objects: Vec<&serde_json::Map<String, Value>> = match data {
        Value::Object(obj) => vec![obj],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    };

    for obj in objects {
        for (k, v) in obj {
            entries.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    entries
}
