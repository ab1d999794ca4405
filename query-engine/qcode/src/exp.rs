//! Boolean expression trees used for `where` clauses, role filters, join conditions and
//! field-level filters.

use crate::{Join, SelectId};
use itertools::Itertools;
use query_structure::DbColumn;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpOp {
    And,
    Or,
    Not,
    Equals,
    NotEquals,
    GreaterOrEquals,
    LesserOrEquals,
    GreaterThan,
    LesserThan,
    In,
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
    Similar,
    NotSimilar,
    Regex,
    NotRegex,
    IRegex,
    NotIRegex,
    Contains,
    ContainedIn,
    HasKey,
    HasKeyAny,
    HasKeyAll,
    IsNull,
    IsNotNull,
    TsQuery,
    /// Always false, used to hard-block a table for a role.
    False,
    NotDistinct,
    Distinct,
    /// The right side is a variable that must be `true`.
    EqualsTrue,
    NotEqualsTrue,
}

impl ExpOp {
    pub fn is_logical(self) -> bool {
        matches!(self, ExpOp::And | ExpOp::Or | ExpOp::Not)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExpOp::And => "and",
            ExpOp::Or => "or",
            ExpOp::Not => "not",
            ExpOp::Equals => "eq",
            ExpOp::NotEquals => "neq",
            ExpOp::GreaterOrEquals => "gte",
            ExpOp::LesserOrEquals => "lte",
            ExpOp::GreaterThan => "gt",
            ExpOp::LesserThan => "lt",
            ExpOp::In => "in",
            ExpOp::NotIn => "nin",
            ExpOp::Like => "like",
            ExpOp::NotLike => "nlike",
            ExpOp::ILike => "ilike",
            ExpOp::NotILike => "nilike",
            ExpOp::Similar => "similar",
            ExpOp::NotSimilar => "nsimilar",
            ExpOp::Regex => "regex",
            ExpOp::NotRegex => "nregex",
            ExpOp::IRegex => "iregex",
            ExpOp::NotIRegex => "niregex",
            ExpOp::Contains => "contains",
            ExpOp::ContainedIn => "contained_in",
            ExpOp::HasKey => "has_key",
            ExpOp::HasKeyAny => "has_key_any",
            ExpOp::HasKeyAll => "has_key_all",
            ExpOp::IsNull => "is_null",
            ExpOp::IsNotNull => "is_not_null",
            ExpOp::TsQuery => "tsquery",
            ExpOp::False => "false",
            ExpOp::NotDistinct => "not_distinct",
            ExpOp::Distinct => "distinct",
            ExpOp::EqualsTrue => "eq_true",
            ExpOp::NotEqualsTrue => "neq_true",
        }
    }

    /// Comparison operator for a filter keyword, aliases included.
    pub fn from_keyword(name: &str) -> Option<Self> {
        let op = match name {
            "eq" | "equals" => ExpOp::Equals,
            "neq" | "not_equals" => ExpOp::NotEquals,
            "gt" | "greater_than" => ExpOp::GreaterThan,
            "lt" | "lesser_than" => ExpOp::LesserThan,
            "gte" | "gteq" | "greater_or_equals" => ExpOp::GreaterOrEquals,
            "lte" | "lteq" | "lesser_or_equals" => ExpOp::LesserOrEquals,
            "in" => ExpOp::In,
            "nin" | "not_in" => ExpOp::NotIn,
            "like" => ExpOp::Like,
            "nlike" | "not_like" => ExpOp::NotLike,
            "ilike" => ExpOp::ILike,
            "nilike" | "not_ilike" => ExpOp::NotILike,
            "similar" => ExpOp::Similar,
            "nsimilar" | "not_similar" => ExpOp::NotSimilar,
            "regex" => ExpOp::Regex,
            "nregex" | "not_regex" => ExpOp::NotRegex,
            "iregex" => ExpOp::IRegex,
            "niregex" | "not_iregex" => ExpOp::NotIRegex,
            "contains" => ExpOp::Contains,
            "contained_in" => ExpOp::ContainedIn,
            "has_key" => ExpOp::HasKey,
            "has_key_any" => ExpOp::HasKeyAny,
            "has_key_all" => ExpOp::HasKeyAll,
            "is_null" => ExpOp::IsNull,
            "null_eq" | "ndis" | "not_distinct" => ExpOp::NotDistinct,
            "null_neq" | "dis" | "distinct" => ExpOp::Distinct,
            _ => return None,
        };

        Some(op)
    }

    /// Operators taking a list on the right side.
    pub(crate) fn takes_list(self) -> bool {
        matches!(
            self,
            ExpOp::In | ExpOp::NotIn | ExpOp::Contains | ExpOp::ContainedIn | ExpOp::HasKeyAny | ExpOp::HasKeyAll
        )
    }
}

impl fmt::Display for ExpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValType {
    #[default]
    None,
    Str,
    Num,
    Bool,
    List,
    Obj,
    Var,
}

/// Column side of a comparison.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExpLeft {
    /// Select the column belongs to, when it is not the one owning the expression.
    pub id: Option<SelectId>,
    /// Table alias overriding the column's own table, e.g. `__cur`.
    pub table: String,
    pub col: Option<DbColumn>,
}

/// Value side of a comparison: a literal, a variable, a list or another column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExpRight {
    pub val_type: ValType,
    /// Exact source text of the literal, or the variable name.
    pub val: String,
    pub id: Option<SelectId>,
    pub table: String,
    pub col: Option<DbColumn>,
    pub list_type: ValType,
    pub list_val: Vec<String>,
    /// Key path of the value inside a json payload.
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exp {
    pub op: ExpOp,
    /// Relationship hops needed to reach the column of the left side.
    pub joins: Vec<Join>,
    pub left: ExpLeft,
    pub right: ExpRight,
    pub children: Vec<Exp>,
}

impl Exp {
    pub fn new(op: ExpOp) -> Self {
        Self {
            op,
            joins: Vec::new(),
            left: ExpLeft::default(),
            right: ExpRight::default(),
            children: Vec::new(),
        }
    }

    pub fn with_children(op: ExpOp, children: Vec<Exp>) -> Self {
        let mut exp = Self::new(op);
        exp.children = children;
        exp
    }

    /// `left.col <op> right.col`.
    pub(crate) fn columns(op: ExpOp, left: DbColumn, right: DbColumn) -> Self {
        let mut exp = Self::new(op);
        exp.left.col = Some(left);
        exp.right.col = Some(right);
        exp
    }

    /// Comparison against a variable.
    pub(crate) fn var(op: ExpOp, name: &str) -> Self {
        let mut exp = Self::new(op);
        exp.right.val_type = ValType::Var;
        exp.right.val = name.to_owned();
        exp
    }

    /// Walks the tree depth first, parents before children.
    pub fn walk(&self) -> impl Iterator<Item = &Exp> {
        let mut stack = vec![self];

        std::iter::from_fn(move || {
            let exp = stack.pop()?;
            stack.extend(exp.children.iter().rev());
            Some(exp)
        })
    }
}

/// `AND(exp, existing)`. The existing filter is kept intact as a child.
pub(crate) fn and_filter(filter: &mut Option<Exp>, exp: Exp) {
    *filter = Some(match filter.take() {
        None => exp,
        Some(existing) => Exp::with_children(ExpOp::And, vec![exp, existing]),
    });
}

/// `AND(existing, exp)`.
pub(crate) fn and_filter_last(filter: &mut Option<Exp>, exp: Exp) {
    *filter = Some(match filter.take() {
        None => exp,
        Some(existing) => Exp::with_children(ExpOp::And, vec![existing, exp]),
    });
}

pub(crate) fn not_filter(filter: &mut Option<Exp>, exp: Exp) {
    and_filter(filter, Exp::with_children(ExpOp::Not, vec![exp]));
}

/// Compact rendering, e.g. `and(gte(products.id, 20), lt(products.id, 28))`.
impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.op)?;

        if !self.children.is_empty() {
            write!(f, "{}", self.children.iter().format(", "))?;
            return f.write_str(")");
        }

        let mut wrote_left = false;

        if let Some(col) = &self.left.col {
            f.write_str(&column_name(self.left.id, &self.left.table, col))?;
            wrote_left = true;
        }

        let mut right = String::new();

        if let Some(col) = &self.right.col {
            right = column_name(self.right.id, &self.right.table, col);
        } else if !self.right.list_val.is_empty() {
            let items = self.right.list_val.iter().map(|v| match self.right.list_type {
                ValType::Str => format!("'{v}'"),
                _ => v.clone(),
            });

            right = format!("[{}]", items.format(", "));
        } else {
            match self.right.val_type {
                ValType::None => (),
                ValType::Str => right = format!("'{}'", self.right.val),
                ValType::Var => right = format!("${}", self.right.val),
                _ => right.clone_from(&self.right.val),
            }
        }

        if !right.is_empty() {
            if wrote_left {
                f.write_str(", ")?;
            }

            f.write_str(&right)?;
        }

        f.write_str(")")
    }
}

fn column_name(id: Option<SelectId>, table: &str, col: &DbColumn) -> String {
    let table = if table.is_empty() { col.table.as_str() } else { table };

    match id {
        Some(id) => format!("{table}_{id}.{}", col.name),
        None if table.is_empty() => col.name.clone(),
        None => format!("{table}.{}", col.name),
    }
}
