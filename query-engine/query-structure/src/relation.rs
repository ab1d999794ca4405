use crate::{DbColumn, DbTable};
use std::{fmt, sync::Arc};

/// How two tables are related. Named from the point of view of the `left` side of a [`DbRel`],
/// which is the table being selected as the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RelType {
    #[default]
    None,
    /// The left side holds a foreign key to a unique column on the right side.
    OneToOne,
    /// The right side holds the foreign key, or the left side references a non-unique column.
    OneToMany,
    Polymorphic,
    /// A table referencing itself.
    Recursive,
    /// Rows stored in a json column of the right side.
    Embedded,
    Remote,
    /// Relationship explicitly ignored with `@notRelated`.
    Skip,
}

impl RelType {
    pub(crate) fn weight(self) -> i32 {
        match self {
            RelType::Polymorphic => 15,
            RelType::Recursive => 10,
            RelType::Remote => 8,
            RelType::Embedded => 5,
            _ => 1,
        }
    }

    /// Type of the same edge walked in the opposite direction.
    pub(crate) fn reversed(self) -> Self {
        match self {
            RelType::OneToOne => RelType::OneToMany,
            RelType::OneToMany => RelType::OneToOne,
            RelType::Polymorphic | RelType::Embedded => self,
            RelType::Recursive | RelType::Remote | RelType::None | RelType::Skip => RelType::None,
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelType::None => "none",
            RelType::OneToOne => "one_to_one",
            RelType::OneToMany => "one_to_many",
            RelType::Polymorphic => "polymorphic",
            RelType::Recursive => "recursive",
            RelType::Embedded => "embedded",
            RelType::Remote => "remote",
            RelType::Skip => "skip",
        };

        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelEnd {
    pub table: Arc<DbTable>,
    pub col: DbColumn,
}

/// One hop between two tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbRel {
    pub kind: RelType,
    pub left: RelEnd,
    pub right: RelEnd,
}

impl DbRel {
    /// Whether the left (child) side stores the column pointing at the right side.
    pub fn left_holds_key(&self) -> bool {
        self.left.col.has_foreign_key()
            && self.left.col.fkey_table == self.right.table.name
            && self.left.col.fkey_col == self.right.col.name
    }
}

impl fmt::Display for DbRel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}.{} -> {}.{}",
            self.kind, self.left.table.name, self.left.col.name, self.right.table.name, self.right.col.name
        )
    }
}

/// Name a relationship is reachable under when walked from the referenced table,
/// e.g. `user_id` becomes `user`.
pub(crate) fn rel_name(col_name: &str) -> String {
    let lower = col_name.to_lowercase();

    if lower.ends_with("_id") {
        col_name[..col_name.len() - 3].to_owned()
    } else if lower.ends_with("_ids") {
        col_name[..col_name.len() - 4].to_owned()
    } else if lower.starts_with("id_") {
        col_name[3..].to_owned()
    } else if lower.starts_with("ids_") {
        col_name[4..].to_owned()
    } else {
        lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rel_names() {
        assert_eq!(rel_name("user_id"), "user");
        assert_eq!(rel_name("tag_ids"), "tag");
        assert_eq!(rel_name("id_owner"), "owner");
        assert_eq!(rel_name("ids_owner"), "owner");
        assert_eq!(rel_name("Owner"), "owner");
    }

    #[test]
    fn reversed_types() {
        assert_eq!(RelType::OneToOne.reversed(), RelType::OneToMany);
        assert_eq!(RelType::Recursive.reversed(), RelType::None);
        assert_eq!(RelType::Embedded.reversed(), RelType::Embedded);
    }
}
