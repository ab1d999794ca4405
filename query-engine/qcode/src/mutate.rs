use crate::Exp;
use enumflags2::{BitFlags, bitflags};
use indexmap::IndexSet;
use query_structure::{DbColumn, DbRel, DbTable};
use serde_json::Value;
use std::{fmt, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MType {
    Insert,
    Update,
    Upsert,
    Delete,
    /// Links existing rows matched by a filter.
    Connect,
    Disconnect,
    /// Holds only connect or disconnect steps, nothing is written to its table.
    None,
}

impl fmt::Display for MType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MType::Insert => "insert",
            MType::Update => "update",
            MType::Upsert => "upsert",
            MType::Delete => "delete",
            MType::Connect => "connect",
            MType::Disconnect => "disconnect",
            MType::None => "none",
        };

        f.write_str(s)
    }
}

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    Connect,
    Disconnect,
}

/// A column written by a step, with its preset value if it has one.
#[derive(Debug, Clone, PartialEq)]
pub struct MColumn {
    pub col: DbColumn,
    pub field_name: String,
    /// Preset value, `{{var}}` for variable references. Empty when the value comes from
    /// the payload.
    pub value: String,
}

/// A column filled with the value of a column written by another step.
#[derive(Debug, Clone, PartialEq)]
pub struct MRColumn {
    pub col: DbColumn,
    pub vcol: DbColumn,
}

/// One per-table step of a mutation plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutate {
    /// Position in [`crate::QCode::mutates`].
    pub id: usize,
    pub parent_id: Option<usize>,
    /// Steps that have to run before this one.
    pub depends_on: IndexSet<usize>,
    pub kind: MType,
    /// Key of this step in the payload.
    pub key: String,
    /// Keys leading from the payload root to this step.
    pub path: Vec<String>,
    pub data: Value,
    pub array: bool,
    pub cols: Vec<MColumn>,
    pub rcols: Vec<MRColumn>,
    pub ti: Arc<DbTable>,
    pub rel: Option<DbRel>,
    pub filter: Option<Exp>,
    pub links: BitFlags<LinkAction>,
    /// The table is written by more than one step.
    pub multi: bool,
    pub children: Vec<usize>,
}

impl Mutate {
    pub(crate) fn new(id: usize, kind: MType, key: &str, ti: Arc<DbTable>, data: Value) -> Self {
        Self {
            id,
            parent_id: None,
            depends_on: IndexSet::new(),
            kind,
            key: key.to_owned(),
            path: Vec::new(),
            array: data.is_array(),
            data,
            cols: Vec::new(),
            rcols: Vec::new(),
            ti,
            rel: None,
            filter: None,
            links: BitFlags::empty(),
            multi: false,
            children: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&MColumn> {
        self.cols.iter().find(|c| c.col.name == name)
    }
}
