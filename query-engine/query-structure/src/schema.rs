//! The relationship graph.
//!
//! Every table is a node. Each foreign key adds two directed edges: one from the referencing
//! table to the referenced table, indexed under the referencing table's name, and one back,
//! indexed under the relationship name derived from the column (`user_id` → `user`) and under
//! the referenced table's name. Looking up a path between two names means picking a start node
//! from the first name's index entries and an end node from the second's, then choosing the
//! cheapest chain of edges between them.

use crate::{
    Catalog, DbColumn, DbFunction, DbInfo, DbRel, DbTable, DbType, RelEnd, RelType, SchemaError, SchemaResult, TableKind,
    VirtualTable, relation::rel_name,
};
use indexmap::IndexMap;
use itertools::Itertools;
use petgraph::{
    Direction,
    graph::{DiGraph, EdgeIndex, NodeIndex},
    visit::EdgeRef,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

/// Upper bound on the path candidates examined per lookup.
const MAX_PATH_SEARCH: usize = 3000;

/// Edges above this weight are never picked as the cheapest line.
const MAX_EDGE_WEIGHT: i32 = 100;

#[derive(Debug, Clone)]
struct RelEdge {
    kind: RelType,
    weight: i32,
    left_node: NodeIndex,
    left: DbColumn,
    right_node: NodeIndex,
    right: DbColumn,
    /// Referencing column name, used to pick an edge by `through` column.
    col_name: String,
}

/// A start (or end) candidate for a path: a node and the edges that were indexed under
/// the looked up name when leaving that node.
#[derive(Debug, Clone)]
struct EdgeInfo {
    node: NodeIndex,
    edges: Vec<EdgeIndex>,
}

#[derive(Debug)]
pub struct DbSchema {
    db_type: DbType,
    version: u32,
    schema: String,
    name: String,
    graph: DiGraph<Arc<DbTable>, RelEdge>,
    table_index: HashMap<(String, String), NodeIndex>,
    aliases: HashMap<String, NodeIndex>,
    edge_index: HashMap<String, Vec<EdgeInfo>>,
    virtual_tables: HashMap<String, VirtualTable>,
    functions: IndexMap<String, DbFunction>,
}

impl DbSchema {
    /// Builds the relationship graph. `aliases` maps a table name to extra names it can be
    /// selected by.
    #[tracing::instrument(skip_all, fields(tables = info.tables.len()))]
    pub fn new(info: DbInfo, aliases: &IndexMap<String, Vec<String>>) -> SchemaResult<Self> {
        let mut schema = Self {
            db_type: info.db_type,
            version: info.version,
            schema: info.schema,
            name: info.name,
            graph: DiGraph::new(),
            table_index: HashMap::new(),
            aliases: HashMap::new(),
            edge_index: HashMap::new(),
            virtual_tables: HashMap::new(),
            functions: IndexMap::new(),
        };

        for table in info.tables {
            let table_aliases = aliases.get(&table.name).cloned().unwrap_or_default();
            let node = schema.add_node(table);

            for alias in table_aliases {
                let table_schema = schema.graph[node].schema.clone();
                schema.table_index.insert((table_schema, alias.clone()), node);
                schema.aliases.insert(alias, node);
            }
        }

        for vt in info.virtual_tables {
            schema.add_virtual(vt);
        }

        for node in schema.graph.node_indices().collect::<Vec<_>>() {
            schema.add_rels(node)?;
        }

        for (table, names) in aliases {
            for alias in names {
                if schema.edge_index.contains_key(alias) {
                    continue;
                }

                if let Some(edges) = schema.edge_index.get(table).cloned() {
                    schema.edge_index.insert(alias.clone(), edges);
                }
            }
        }

        for func in info.functions {
            if func.inputs.len() == 1 {
                schema.functions.insert(func.name.to_lowercase(), func);
            }
        }

        tracing::debug!(
            nodes = schema.graph.node_count(),
            edges = schema.graph.edge_count(),
            "relationship graph built"
        );

        Ok(schema)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<DbTable>> {
        self.graph.node_weights()
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    fn add_node(&mut self, table: DbTable) -> NodeIndex {
        let key = (table.schema.clone(), table.name.clone());
        let node = self.graph.add_node(Arc::new(table));

        self.table_index.insert(key, node);
        node
    }

    fn table_node(&self, schema: &str, name: &str) -> Option<NodeIndex> {
        self.table_index.get(&(schema.to_owned(), name.to_owned())).copied()
    }

    fn add_rels(&mut self, node: NodeIndex) -> SchemaResult<()> {
        let table = self.graph[node].clone();

        match table.kind {
            TableKind::Json => self.add_json_rel(node, &table)?,
            TableKind::Virtual => self.add_polymorphic_rel(node, &table)?,
            TableKind::Remote => self.add_remote_rel(node, &table)?,
            TableKind::Table | TableKind::Function => {}
        }

        self.add_column_rels(node, &table)
    }

    fn add_column_rels(&mut self, node: NodeIndex, table: &DbTable) -> SchemaResult<()> {
        for col in table.columns.iter().filter(|c| c.has_foreign_key()) {
            let fkey_schema = if col.fkey_schema.is_empty() { &table.schema } else { &col.fkey_schema };

            let Some(fnode) = self.table_node(fkey_schema, &col.fkey_table) else {
                return Err(SchemaError::ForeignKeyTableNotFound {
                    schema: fkey_schema.clone(),
                    table: col.fkey_table.clone(),
                });
            };

            if col.fkey_col.is_empty() {
                continue;
            }

            let ftable = self.graph[fnode].clone();

            let Some(fcol) = ftable.column(&col.fkey_col) else {
                return Err(SchemaError::ForeignKeyColumnNotFound {
                    table: col.fkey_table.clone(),
                    column: col.fkey_col.clone(),
                });
            };

            let kind = if table.name == col.fkey_table {
                RelType::Recursive
            } else if fcol.is_unique() {
                RelType::OneToOne
            } else {
                RelType::OneToMany
            };

            self.add_to_graph(node, col.clone(), fnode, fcol.clone(), kind);
        }

        Ok(())
    }

    fn add_json_rel(&mut self, node: NodeIndex, table: &DbTable) -> SchemaResult<()> {
        let Some(link) = &table.secondary_col else {
            return Ok(());
        };

        let (onode, owner) = self.find_node(&link.schema, &link.table)?;
        let owner_col = owner.get_column(&link.name)?.clone();
        let left = table.primary_col.clone().unwrap_or_else(|| owner_col.clone());

        self.add_to_graph(node, left, onode, owner_col, RelType::Embedded);
        Ok(())
    }

    fn add_polymorphic_rel(&mut self, node: NodeIndex, table: &DbTable) -> SchemaResult<()> {
        let (Some(primary), Some(secondary)) = (&table.primary_col, &table.secondary_col) else {
            return Ok(());
        };

        let (pnode, ptable) = self.find_node(&primary.fkey_schema, &primary.fkey_table)?;
        let pcol = ptable.get_column(&secondary.name)?.clone();

        self.add_to_graph(node, primary.clone(), pnode, pcol, RelType::Polymorphic);
        Ok(())
    }

    fn add_remote_rel(&mut self, node: NodeIndex, table: &DbTable) -> SchemaResult<()> {
        let Some(primary) = &table.primary_col else {
            return Ok(());
        };

        let (pnode, ptable) = self.find_node(&primary.fkey_schema, &primary.fkey_table)?;
        let pcol = ptable.get_column(&primary.fkey_col)?.clone();

        self.add_to_graph(node, primary.clone(), pnode, pcol, RelType::Remote);
        Ok(())
    }

    /// Creates one virtual table node per table that carries the polymorphic id and type columns.
    fn add_virtual(&mut self, vt: VirtualTable) {
        let owners: Vec<Arc<DbTable>> = self
            .graph
            .node_weights()
            .filter(|t| t.kind != TableKind::Virtual)
            .cloned()
            .collect();

        for owner in owners {
            let (Some(id_col), Some(type_col), Some(fkey_col)) = (
                owner.column(&vt.id_column),
                owner.column(&vt.type_column),
                owner.column(&vt.fkey_column),
            ) else {
                continue;
            };

            let mut primary = DbColumn::new(owner.schema.clone(), owner.name.clone(), id_col.name.clone(), id_col.ty.clone());
            primary.id = -1;
            primary.fkey_schema.clone_from(&type_col.schema);
            primary.fkey_table.clone_from(&type_col.table);
            primary.fkey_col.clone_from(&type_col.name);

            let mut secondary = DbColumn::new(owner.schema.clone(), owner.name.clone(), fkey_col.name.clone(), "");
            secondary.id = -1;

            let mut table = DbTable::new(owner.schema.clone(), vt.name.clone(), TableKind::Virtual, Vec::new());
            table.primary_col = Some(primary);
            table.secondary_col = Some(secondary);

            self.add_node(table);
        }

        self.virtual_tables.insert(vt.name.clone(), vt);
    }

    fn add_to_graph(&mut self, lnode: NodeIndex, lcol: DbColumn, rnode: NodeIndex, rcol: DbColumn, kind: RelType) {
        if matches!(kind, RelType::None | RelType::Skip) {
            return;
        }

        let ltable = self.graph[lnode].name.clone();
        let rtable = self.graph[rnode].name.clone();

        let rel = match kind {
            RelType::Polymorphic | RelType::Embedded | RelType::Remote => rtable.clone(),
            _ => rel_name(&lcol.name),
        };

        let forward = self.graph.add_edge(
            lnode,
            rnode,
            RelEdge {
                kind,
                weight: kind.weight(),
                left_node: lnode,
                left: lcol.clone(),
                right_node: rnode,
                right: rcol.clone(),
                col_name: lcol.name.clone(),
            },
        );
        self.add_edge_info(&ltable, lnode, forward);

        let reverse = self.graph.add_edge(
            rnode,
            lnode,
            RelEdge {
                kind: kind.reversed(),
                weight: kind.weight(),
                left_node: rnode,
                left: rcol,
                right_node: lnode,
                right: lcol.clone(),
                col_name: lcol.name,
            },
        );
        self.add_edge_info(&rel, rnode, reverse);

        if rtable != rel {
            self.add_edge_info(&rtable, rnode, reverse);
        }
    }

    fn add_edge_info(&mut self, name: &str, node: NodeIndex, edge: EdgeIndex) {
        let infos = self.edge_index.entry(name.to_lowercase()).or_default();

        match infos.iter_mut().find(|i| i.node == node) {
            Some(info) if info.edges.contains(&edge) => {}
            Some(info) => info.edges.push(edge),
            None => infos.push(EdgeInfo { node, edges: vec![edge] }),
        }
    }

    fn find_node(&self, schema: &str, name: &str) -> SchemaResult<(NodeIndex, Arc<DbTable>)> {
        let schema = if schema.is_empty() { self.schema.as_str() } else { schema };

        self.table_node(schema, name)
            .map(|n| (n, self.graph[n].clone()))
            .ok_or_else(|| SchemaError::TableNotFound(format!("{schema}.{name}")))
    }

    /// Edges from `a` to `b` in insertion order.
    fn lines(&self, a: NodeIndex, b: NodeIndex) -> Vec<EdgeIndex> {
        self.graph.edges_connecting(a, b).map(|e| e.id()).sorted().collect()
    }

    /// Simple paths from `from` to `to`, shortest first. A path may end where it started
    /// when the table references itself.
    fn all_paths(&self, from: NodeIndex, to: NodeIndex) -> Vec<Vec<NodeIndex>> {
        let mut paths = Vec::new();
        let mut queue = VecDeque::from([vec![from]]);
        let mut searched = 0;

        while let Some(path) = queue.pop_front() {
            searched += 1;

            if searched > MAX_PATH_SEARCH {
                break;
            }

            let Some(&last) = path.last() else { continue };

            if last == to && path.len() > 1 {
                paths.push(path);
                continue;
            }

            let next_nodes = self
                .graph
                .edges_directed(last, Direction::Outgoing)
                .map(|e| (e.id(), e.target()))
                .sorted()
                .map(|(_, target)| target)
                .unique();

            for next in next_nodes {
                if next != to && path.contains(&next) {
                    continue;
                }

                let mut extended = path.clone();
                extended.push(next);
                queue.push_back(extended);
            }
        }

        paths
    }

    fn pick_path(&self, from: &EdgeInfo, to: &EdgeInfo, through: Option<&str>) -> SchemaResult<Option<Vec<EdgeIndex>>> {
        let mut paths = self.all_paths(from.node, to.node);

        if let Some(through) = through {
            paths = self.pick_through_path(paths, through)?;
        }

        for nodes in paths {
            let len = nodes.len();

            if len == 2 {
                let lines = self.lines(nodes[0], nodes[1]);

                if let Some(through) = through {
                    return lines
                        .into_iter()
                        .find(|&e| self.graph[e].col_name == through)
                        .map(|e| Some(vec![e]))
                        .ok_or_else(|| SchemaError::ThroughColumnNotFound(through.to_owned()));
                }

                if let Some(line) = pick_line(&lines, from) {
                    return Ok(Some(vec![line]));
                }
            }

            let mut edges = Vec::with_capacity(len - 1);

            for i in 1..len {
                let lines = self.lines(nodes[i - 1], nodes[i]);

                if i == 1 {
                    match pick_line(&lines, from) {
                        Some(line) => edges.push(line),
                        None => break,
                    }
                } else if i == len - 1 {
                    if let Some(line) = pick_line(&lines, to).or_else(|| self.min_weighted_line(&lines)) {
                        edges.push(line);
                    }

                    return Ok(Some(edges));
                } else if let Some(line) = self.min_weighted_line(&lines) {
                    edges.push(line);
                }
            }
        }

        Ok(None)
    }

    fn pick_through_path(&self, paths: Vec<Vec<NodeIndex>>, through: &str) -> SchemaResult<Vec<Vec<NodeIndex>>> {
        if paths.len() == 1 && paths[0].len() == 2 {
            return Ok(paths);
        }

        if let Some(node) = self.table_node(&self.schema, through) {
            return Ok(paths.into_iter().filter(|p| p.contains(&node)).collect());
        }

        // Not a table, so it can only name the column of a direct relationship.
        let direct: Vec<_> = paths.into_iter().filter(|p| p.len() == 2).collect();

        if direct.is_empty() {
            return Err(SchemaError::TableNotFound(through.to_owned()));
        }

        Ok(direct)
    }

    fn min_weighted_line(&self, lines: &[EdgeIndex]) -> Option<EdgeIndex> {
        lines
            .iter()
            .copied()
            .filter(|&e| self.graph[e].weight < MAX_EDGE_WEIGHT)
            .min_by_key(|&e| self.graph[e].weight)
    }

    fn to_rel(&self, edge: EdgeIndex) -> DbRel {
        let line = &self.graph[edge];

        DbRel {
            kind: line.kind,
            left: RelEnd {
                table: self.graph[line.left_node].clone(),
                col: line.left.clone(),
            },
            right: RelEnd {
                table: self.graph[line.right_node].clone(),
                col: line.right.clone(),
            },
        }
    }
}

fn pick_line(lines: &[EdgeIndex], info: &EdgeInfo) -> Option<EdgeIndex> {
    lines.iter().copied().find(|e| info.edges.contains(e))
}

impl Catalog for DbSchema {
    fn db_type(&self) -> DbType {
        self.db_type
    }

    fn default_schema(&self) -> &str {
        &self.schema
    }

    fn find(&self, schema: &str, name: &str) -> SchemaResult<Arc<DbTable>> {
        self.find_node(schema, name).map(|(_, table)| table)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    fn find_path(&self, from: &str, to: &str, through: Option<&str>) -> SchemaResult<Vec<DbRel>> {
        let from_infos = self
            .edge_index
            .get(&from.to_lowercase())
            .ok_or_else(|| SchemaError::TableNotFound(from.to_owned()))?;

        let to_infos = self
            .edge_index
            .get(&to.to_lowercase())
            .ok_or_else(|| SchemaError::TableNotFound(to.to_owned()))?;

        for f in from_infos {
            for t in to_infos {
                if let Some(edges) = self.pick_path(f, t, through)? {
                    return Ok(edges.into_iter().map(|e| self.to_rel(e)).collect());
                }
            }
        }

        Err(SchemaError::RelationshipNotFound {
            from: from.to_owned(),
            to: to.to_owned(),
        })
    }

    fn functions(&self) -> &IndexMap<String, DbFunction> {
        &self.functions
    }

    fn virtual_table(&self, name: &str) -> Option<&VirtualTable> {
        self.virtual_tables.get(name)
    }
}
