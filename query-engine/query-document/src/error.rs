use thiserror::Error;

pub type ParseResult<T> = Result<T, ParseError>;

/// Scanner failures. Every variant is fatal for the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("empty query")]
    Empty,

    #[error("unrecognized character in action: {rune:?} (line: {line}, pos: {pos})")]
    UnrecognizedCharacter { rune: char, line: u32, pos: usize },

    #[error("bad number syntax: {text:?} (line: {line}, pos: {pos})")]
    BadNumber { text: String, line: u32, pos: usize },

    #[error("unterminated string (line: {line}, pos: {pos})")]
    UnterminatedString { line: u32, pos: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("unexpected token '{found}', expecting '{expected}' (line: {line}, pos: {pos})")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        line: u32,
        pos: usize,
    },

    #[error("invalid query: end reached before query was closed")]
    UnexpectedEof,

    #[error("fragment not defined: {0}")]
    UndefinedFragment(String),

    #[error("too many fields (max {max})")]
    TooManyFields { max: usize },

    #[error("too many args (max {max})")]
    TooManyArgs { max: usize },

    #[error("too many variable definitions (max {max})")]
    TooManyVariables { max: usize },

    #[error("empty value")]
    EmptyValue,

    /// Structural errors in the schema-definition language.
    #[error("schema: {0}")]
    SchemaDefinition(String),
}
