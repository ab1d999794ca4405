//! Parsed document structures.
//!
//! Fields are stored flat and addressed by [`FieldId`]; argument values live in a per-document
//! [`NodeArena`] and are addressed by [`NodeId`]. Everything borrows from the source text, so an
//! [`Operation`] cannot outlive the input it was parsed from.

use smallvec::SmallVec;
use std::{fmt, ops::Index};

/// Index of a field in [`Operation::fields`].
pub type FieldId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Query,
    Mutation,
    Subscription,
}

impl OpKind {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        if keyword.eq_ignore_ascii_case("query") {
            Some(OpKind::Query)
        } else if keyword.eq_ignore_ascii_case("mutation") {
            Some(OpKind::Mutation)
        } else if keyword.eq_ignore_ascii_case("subscription") {
            Some(OpKind::Subscription)
        } else {
            None
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Query => f.write_str("query"),
            OpKind::Mutation => f.write_str("mutation"),
            OpKind::Subscription => f.write_str("subscription"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FieldKind {
    #[default]
    Table,
    /// Parent of one or more `... on Type` inline fragments.
    Union,
    /// The type selector inside an inline fragment.
    Member,
    /// A root field without arguments or children, e.g. `products_cursor`.
    Keyword,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation<'a> {
    pub kind: OpKind,
    pub name: &'a str,
    pub var_defs: Vec<VarDef<'a>>,
    pub directives: Vec<Directive<'a>>,
    pub fields: Vec<Field<'a>>,
    pub nodes: NodeArena<'a>,
    /// Source text of the operation, fragment definitions excluded.
    pub query: &'a str,
}

impl<'a> Operation<'a> {
    pub fn roots(&self) -> impl Iterator<Item = &Field<'a>> {
        self.fields.iter().filter(|f| f.parent_id.is_none())
    }

    pub fn field(&self, id: FieldId) -> &Field<'a> {
        &self.fields[id]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field<'a> {
    pub id: FieldId,
    pub parent_id: Option<FieldId>,
    pub kind: FieldKind,
    pub name: &'a str,
    pub alias: Option<&'a str>,
    pub args: Vec<Arg<'a>>,
    pub directives: Vec<Directive<'a>>,
    pub children: SmallVec<[FieldId; 8]>,
}

impl<'a> Field<'a> {
    pub(crate) fn new(id: FieldId, name: &'a str) -> Self {
        Self {
            id,
            parent_id: None,
            kind: FieldKind::Table,
            name,
            alias: None,
            args: Vec::new(),
            directives: Vec::new(),
            children: SmallVec::new(),
        }
    }

    /// The key this field appears under in the response.
    pub fn response_name(&self) -> &'a str {
        self.alias.unwrap_or(self.name)
    }

    pub fn arg(&self, name: &str) -> Option<&Arg<'a>> {
        self.args.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arg<'a> {
    pub name: &'a str,
    pub value: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive<'a> {
    pub name: &'a str,
    pub args: Vec<Arg<'a>>,
}

impl<'a> Directive<'a> {
    pub fn arg(&self, name: &str) -> Option<&Arg<'a>> {
        self.args.iter().find(|a| a.name == name)
    }
}

/// `$name: Type = default` in the operation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarDef<'a> {
    pub name: &'a str,
    pub default: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Str,
    Num,
    Bool,
    Obj,
    List,
    Var,
    /// A bare name in value position, e.g. `desc` in `order_by: { price: desc }`.
    Label,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Str => "string",
            NodeKind::Num => "number",
            NodeKind::Bool => "boolean",
            NodeKind::Obj => "object",
            NodeKind::List => "list",
            NodeKind::Var => "variable",
            NodeKind::Label => "label",
        };

        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<'a> {
    pub kind: NodeKind,
    /// Key of this node inside its parent object, empty otherwise.
    pub name: &'a str,
    /// Exact source text for scalars and variables, empty for objects and lists.
    pub value: &'a str,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Node<'_> {
    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, NodeKind::Str | NodeKind::Num | NodeKind::Bool | NodeKind::Label)
    }
}

/// Per-document storage for value nodes. Dropped wholesale with the document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeArena<'a> {
    nodes: Vec<Node<'a>>,
}

impl<'a> NodeArena<'a> {
    pub(crate) fn alloc(&mut self, node: Node<'a>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut Node<'a> {
        &mut self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> &Node<'a> {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &Node<'a>)> {
        self.get(id).children.iter().map(move |&c| (c, self.get(c)))
    }

    /// Looks up an object member by key.
    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.get(id).children.iter().copied().find(|&c| self.get(c).name == name)
    }
}

impl<'a> Index<NodeId> for NodeArena<'a> {
    type Output = Node<'a>;

    fn index(&self, id: NodeId) -> &Self::Output {
        self.get(id)
    }
}

/// A standalone value parsed with [`crate::parse_arg_value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTree<'a> {
    pub nodes: NodeArena<'a>,
    pub root: NodeId,
}

impl<'a> ValueTree<'a> {
    pub fn root(&self) -> &Node<'a> {
        self.nodes.get(self.root)
    }
}
