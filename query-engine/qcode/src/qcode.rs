use crate::{Mutate, Select, SelectId};
use indexmap::IndexMap;
use query_document::OpKind;
use serde_json::Value;
use std::fmt;

/// What a compiled document does. Mutations are refined into the action named by their
/// root field's arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QType {
    Query,
    Subscription,
    Insert,
    Update,
    Upsert,
    Delete,
}

impl QType {
    pub fn is_mutation(self) -> bool {
        !matches!(self, QType::Query | QType::Subscription)
    }

    pub(crate) fn from_action(name: &str) -> Option<Self> {
        match name {
            "insert" => Some(QType::Insert),
            "update" => Some(QType::Update),
            "upsert" => Some(QType::Upsert),
            "delete" => Some(QType::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for QType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QType::Query => "query",
            QType::Subscription => "subscription",
            QType::Insert => "insert",
            QType::Update => "update",
            QType::Upsert => "upsert",
            QType::Delete => "delete",
        };

        f.write_str(s)
    }
}

/// Operation kind and name, read from the document header without parsing the document.
///
/// Cheap enough to run before picking a cache entry or a role. Comments and string contents
/// are ignored; a bare `{` is a query.
pub fn operation_info(query: &str) -> Option<(OpKind, &str)> {
    let bytes = query.as_bytes();
    let mut prev: Option<&str> = None;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            quote @ (b'"' | b'\'') => {
                i += 1;

                while i < bytes.len() && !(bytes[i] == quote && bytes[i - 1] != b'\\') {
                    i += 1;
                }
            }
            b'{' | b'(' | b'@' => {
                return match prev {
                    None => Some((OpKind::Query, "")),
                    Some(word) => OpKind::from_keyword(word).map(|kind| (kind, "")),
                };
            }
            b if b.is_ascii_alphanumeric() || b == b'_' => {
                let start = i;

                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }

                let word = &query[start..i];

                if let Some(kind) = prev.and_then(OpKind::from_keyword) {
                    return Some((kind, word));
                }

                if prev.is_some() {
                    return None;
                }

                prev = Some(word);
                continue;
            }
            _ => (),
        }

        i += 1;
    }

    None
}

/// An operation variable with its declared default.
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub name: String,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cache {
    /// Value of the `Cache-Control` response header.
    pub header: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Validation {
    pub source: String,
    pub kind: String,
}

/// The compiled form of one document for one role.
#[derive(Debug, Clone, PartialEq)]
pub struct QCode {
    pub kind: QType,
    pub name: String,
    /// Variable (or literal) carrying a mutation's payload.
    pub action_var: String,
    pub action_val: Option<Value>,
    pub vars: Vec<Var>,
    /// Indexed by [`Select::id`].
    pub selects: Vec<Select>,
    pub roots: Vec<SelectId>,
    /// Mutation steps in execution order.
    pub mutates: Vec<Mutate>,
    /// Mutation step ids per table.
    pub munions: IndexMap<String, Vec<usize>>,
    pub remotes: usize,
    pub cache: Cache,
    pub script: Option<Script>,
    pub validation: Option<Validation>,
    /// Validation rules per variable, e.g. `required,min=1~too short`.
    pub constraints: IndexMap<String, String>,
    pub typename: bool,
    pub query: String,
}

impl QCode {
    pub(crate) fn new(kind: QType, name: &str, query: &str) -> Self {
        Self {
            kind,
            name: name.to_owned(),
            action_var: String::new(),
            action_val: None,
            vars: Vec::new(),
            selects: Vec::new(),
            roots: Vec::new(),
            mutates: Vec::new(),
            munions: IndexMap::new(),
            remotes: 0,
            cache: Cache::default(),
            script: None,
            validation: None,
            constraints: IndexMap::new(),
            typename: false,
            query: query.to_owned(),
        }
    }

    pub fn root(&self) -> Option<&Select> {
        self.roots.first().map(|&id| &self.selects[id])
    }

    pub fn select(&self, id: SelectId) -> &Select {
        &self.selects[id]
    }

    pub fn children(&self, sel: &Select) -> impl Iterator<Item = &Select> {
        sel.children.iter().map(|&id| &self.selects[id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_info_from_headers() {
        assert_eq!(operation_info("{ products { id } }"), Some((OpKind::Query, "")));
        assert_eq!(
            operation_info("query getProducts { products { id } }"),
            Some((OpKind::Query, "getProducts"))
        );
        assert_eq!(
            operation_info("# mutation fake\nmutation { products(insert: $data) { id } }"),
            Some((OpKind::Mutation, ""))
        );
        assert_eq!(
            operation_info("subscription onNew($id: Int) { products { id } }"),
            Some((OpKind::Subscription, "onNew"))
        );
        assert_eq!(operation_info("fragment F on users { id }"), None);
        assert_eq!(operation_info(""), None);
    }

    #[test]
    fn qtype_names() {
        assert_eq!(QType::Upsert.to_string(), "upsert");
        assert!(QType::Delete.is_mutation());
        assert!(!QType::Subscription.is_mutation());
        assert_eq!(QType::from_action("update"), Some(QType::Update));
    }
}
