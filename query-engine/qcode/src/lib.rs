//! Compiles GraphQL documents into QCode, a database independent plan a SQL renderer can
//! turn into a single statement. Access control, filters, paging and mutation planning are
//! resolved here, against a [`query_structure::Catalog`].

mod compiler;
mod config;
mod error;
mod exp;
mod mutate;
mod qcode;
mod roles;
mod schema_def;
mod select;
mod value;

pub use compiler::{Compiler, MAX_SELECTORS};
pub use config::*;
pub use error::*;
pub use exp::{Exp, ExpLeft, ExpOp, ExpRight, ValType};
pub use mutate::*;
pub use qcode::*;
pub use roles::{ANON_ROLE, OpPolicy, RoleTable, TableRole};
pub use schema_def::SchemaDefinition;
pub use select::*;
