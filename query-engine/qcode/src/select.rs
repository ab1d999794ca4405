use crate::Exp;
use query_structure::{DbColumn, DbFunction, DbRel, DbTable, RelType};
use std::{fmt, sync::Arc};

/// Position of a [`Select`] in [`crate::QCode::selects`].
pub type SelectId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SelType {
    #[default]
    None,
    /// Holds the `... on Type` members of a polymorphic relationship.
    Union,
    Member,
}

/// Why a select or field renders as `null` (or not at all). Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SkipType {
    #[default]
    None,
    /// Removed from the response.
    Drop,
    Nulled,
    /// The role filter needs a user and the request is anonymous.
    UserNeeded,
    Blocked,
    /// Resolved outside of the database.
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
    AscNullsFirst,
    AscNullsLast,
    DescNullsFirst,
    DescNullsLast,
}

impl Order {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let order = match keyword {
            "asc" => Order::Asc,
            "desc" => Order::Desc,
            "asc_nulls_first" => Order::AscNullsFirst,
            "asc_nulls_last" => Order::AscNullsLast,
            "desc_nulls_first" => Order::DescNullsFirst,
            "desc_nulls_last" => Order::DescNullsLast,
            _ => return None,
        };

        Some(order)
    }

    pub fn is_desc(self) -> bool {
        matches!(self, Order::Desc | Order::DescNullsFirst | Order::DescNullsLast)
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
            Order::AscNullsFirst => "ASC NULLS FIRST",
            Order::AscNullsLast => "ASC NULLS LAST",
            Order::DescNullsFirst => "DESC NULLS FIRST",
            Order::DescNullsLast => "DESC NULLS LAST",
        };

        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// Variable choosing between named order-by sets, with the set this entry belongs to.
    pub key_var: String,
    pub key: String,
    pub col: DbColumn,
    /// `[$list, "desc"]`: order by the position of the column value in a list variable.
    pub var: Option<String>,
    pub order: Order,
}

impl OrderBy {
    pub(crate) fn new(col: DbColumn, order: Order) -> Self {
        Self {
            key_var: String::new(),
            key: String::new(),
            col,
            var: None,
            order,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PagingType {
    #[default]
    Offset,
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Paging {
    pub kind: PagingType,
    pub limit: u32,
    pub limit_var: Option<String>,
    pub offset: u32,
    pub offset_var: Option<String>,
    /// Results carry a cursor and the `$cursor` variable seeks past it.
    pub cursor: bool,
    pub no_limit: bool,
}

/// A relationship hop between the select's table and its parent (or the table an order
/// or filter column lives on).
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub rel: DbRel,
    pub filter: Option<Box<Exp>>,
    /// Needed only by an order-by or filter of the select, not by the parent link.
    pub local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ArgKind {
    #[default]
    Val,
    Var,
    Col,
}

/// Argument of a database function call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arg {
    pub kind: ArgKind,
    /// Database type of the parameter.
    pub dtype: String,
    pub name: String,
    pub val: String,
    pub col: Option<DbColumn>,
}

impl Arg {
    pub(crate) fn internal(name: &str, val: &str) -> Self {
        Self {
            name: name.to_owned(),
            val: val.to_owned(),
            ..Default::default()
        }
    }

    pub(crate) fn column(col: DbColumn) -> Self {
        Self {
            kind: ArgKind::Col,
            dtype: col.ty.clone(),
            col: Some(col),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// Missing for built-ins such as `search_rank`.
    pub func: Option<DbFunction>,
    pub agg: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Column(DbColumn),
    Function(Function),
    /// Passed through to a remote source as is.
    Remote,
}

/// A leaf of a selection: a column or a function call.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub id: usize,
    /// Key in the response.
    pub name: String,
    pub kind: FieldKind,
    pub args: Vec<Arg>,
    /// Set by `@include(ifVar:)` and friends.
    pub filter: Option<Exp>,
    pub skip: SkipType,
}

impl Field {
    pub fn column(&self) -> Option<&DbColumn> {
        match &self.kind {
            FieldKind::Column(col) => Some(col),
            _ => None,
        }
    }

    pub fn function(&self) -> Option<&Function> {
        match &self.kind {
            FieldKind::Function(func) => Some(func),
            _ => None,
        }
    }
}

/// A column the renderer has to fetch, whether or not it ends up in the response.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub col: DbColumn,
    pub field_name: String,
}

/// One table-level node of a compiled query.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub id: SelectId,
    pub parent_id: Option<SelectId>,
    pub kind: SelType,
    /// Key in the response.
    pub field_name: String,
    pub table: String,
    /// Schema picked with `@schema`.
    pub schema: Option<String>,
    pub ti: Arc<DbTable>,
    pub singular: bool,
    pub typename: bool,
    pub fields: Vec<Field>,
    pub base_cols: Vec<Column>,
    /// Arguments consumed by the compiler, such as `search` and `find`.
    pub internal_args: Vec<Arg>,
    /// Arguments of a table-returning function.
    pub args: Vec<Arg>,
    pub filter: Option<Exp>,
    /// Filter from `@include(ifVar:)` and `@skip(ifVar:)`.
    pub field_filter: Option<Exp>,
    pub order_by: Vec<OrderBy>,
    pub distinct_on: Vec<DbColumn>,
    pub group_cols: bool,
    pub paging: Paging,
    pub children: Vec<SelectId>,
    pub rel: Option<DbRel>,
    pub joins: Vec<Join>,
    pub skip: SkipType,
    pub(crate) order: Order,
    pub(crate) through: Option<String>,
    pub(crate) not_related: bool,
}

impl Select {
    pub(crate) fn new(id: SelectId, parent_id: Option<SelectId>, field_name: &str) -> Self {
        Self {
            id,
            parent_id,
            kind: SelType::None,
            field_name: field_name.to_owned(),
            table: String::new(),
            schema: None,
            ti: Arc::default(),
            singular: false,
            typename: false,
            fields: Vec::new(),
            base_cols: Vec::new(),
            internal_args: Vec::new(),
            args: Vec::new(),
            filter: None,
            field_filter: None,
            order_by: Vec::new(),
            distinct_on: Vec::new(),
            group_cols: false,
            paging: Paging::default(),
            children: Vec::new(),
            rel: None,
            joins: Vec::new(),
            skip: SkipType::None,
            order: Order::Asc,
            through: None,
            not_related: false,
        }
    }

    pub fn rel_kind(&self) -> RelType {
        self.rel.as_ref().map(|r| r.kind).unwrap_or_default()
    }

    pub fn internal_arg(&self, name: &str) -> Option<&Arg> {
        self.internal_args.iter().find(|a| a.name == name)
    }

    /// Relationship joins leading to the parent, order-by joins excluded.
    pub fn parent_joins(&self) -> impl Iterator<Item = &Join> {
        self.joins.iter().filter(|j| !j.local)
    }

    pub(crate) fn has_parent_joins(&self) -> bool {
        self.parent_joins().next().is_some()
    }

    pub(crate) fn add_field(&mut self, field: Field) {
        if let FieldKind::Column(col) = &field.kind {
            if !self.has_base_col(&col.name) {
                self.base_cols.push(Column {
                    col: col.clone(),
                    field_name: field.name.clone(),
                });
            }
        }

        if !self.fields.iter().any(|f| f.name.eq_ignore_ascii_case(&field.name)) {
            self.fields.push(field);
        }
    }

    pub(crate) fn add_base_col(&mut self, col: DbColumn) {
        if !self.has_base_col(&col.name) {
            self.base_cols.push(Column {
                col,
                field_name: String::new(),
            });
        }
    }

    fn has_base_col(&self, name: &str) -> bool {
        self.base_cols.iter().any(|c| c.col.name.eq_ignore_ascii_case(name))
    }
}
