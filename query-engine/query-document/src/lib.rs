//! Lexing and parsing of GraphQL-shaped query documents and of the schema-definition
//! language. Nothing in here knows about tables or roles.

mod ast;
mod error;
mod lexer;
mod parser;
mod schema_def;

pub use ast::*;
pub use error::*;
pub use lexer::{Token, TokenKind, tokenize};
pub use parser::{MAX_ARGS, MAX_FIELDS, parse, parse_arg_value};
pub use schema_def::*;
