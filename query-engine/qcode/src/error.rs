use crate::QType;
use query_document::{LexError, ParseError};
use query_structure::SchemaError;
use thiserror::Error;

pub type QCodeResult<T> = Result<T, QCodeError>;
pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum QCodeError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl From<LexError> for QCodeError {
    fn from(err: LexError) -> Self {
        QCodeError::Parse(ParseError::Lex(err))
    }
}

/// Semantic problems found while compiling a parsed document. None of them is recoverable,
/// the document is never partially compiled.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Role filters and mutation payloads are parsed during compilation.
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("invalid graphql no query found")]
    NoQuery,

    #[error("invalid query: no selectors found")]
    NoSelectors,

    #[error("selector limit reached ({max})")]
    TooManySelectors { max: usize },

    #[error("table: '{0}' blocked")]
    BlockedTable(String),

    #[error("column: '{schema}.{table}.{column}' blocked")]
    BlockedColumn { schema: String, table: String, column: String },

    #[error("db column blocked: {column} (role: '{role}')")]
    ColumnNotAllowed { column: String, role: String },

    #[error("all db functions blocked: {function} (role: '{role}')")]
    FunctionsBlocked { function: String, role: String },

    #[error("{kind} blocked: {name} (role: {role})")]
    OperationBlocked { kind: QType, name: String, role: String },

    #[error("field '{0}' is not a column or a function")]
    UnknownField(String),

    #[error("unknown argument '{0}'")]
    UnknownArgument(String),

    #[error("required argument '{0}' missing")]
    MissingArgument(String),

    #[error("value for argument '{arg}' must be {expected}")]
    ArgumentType { arg: String, expected: String },

    #[error("{arg}: {source}")]
    Argument {
        arg: String,
        #[source]
        source: Box<CompileError>,
    },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("unknown {scope} directive: {name}")]
    UnknownDirective { scope: &'static str, name: String },

    #[error("directive @{directive}: {source}")]
    Directive {
        directive: String,
        #[source]
        source: Box<CompileError>,
    },

    #[error("unknown validator: {0}")]
    UnknownValidator(String),

    #[error("aggregation disabled: db function '{0}' cannot be used")]
    AggregationDisabled(String),

    #[error("no search defined: {0}")]
    NoSearch(String),

    #[error("table requires primary key: {0}")]
    PrimaryKeyRequired(String),

    #[error("selector '{0}' is not recursive")]
    NotRecursive(String),

    #[error("argument 'find' needed for recursive queries")]
    FindRequired,

    #[error("union types are only valid with polymorphic relationships")]
    UnionWithoutParent,

    #[error("missing expression after '{0}' operator")]
    MissingOperand(&'static str),

    #[error("[Where] invalid operation: {0}")]
    InvalidOperation(String),

    #[error("[Where] invalid values for: {0}")]
    InvalidFilterValue(String),

    #[error("[Where] '{segment}' is not related to '{table}'")]
    FilterPath { segment: String, table: String },

    #[error("argument '{arg}', {message}")]
    OrderBy { arg: String, message: String },

    #[error("where clause required")]
    WhereRequired,

    #[error("variable not defined: {0}")]
    UndefinedVariable(String),

    #[error("mutations must contains one of the following arguments (insert, update, upsert or delete)")]
    MissingMutationAction,

    #[error("{0}")]
    InvalidMutation(String),
}

impl CompileError {
    pub(crate) fn in_argument(self, arg: &str) -> Self {
        CompileError::Argument {
            arg: arg.to_owned(),
            source: Box::new(self),
        }
    }

    pub(crate) fn in_directive(self, directive: &str) -> Self {
        CompileError::Directive {
            directive: directive.to_owned(),
            source: Box::new(self),
        }
    }
}

/// Problems in role policies or schema definitions, reported when they are loaded.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("role '{role}': table '{table}': invalid {kind} filter: {source}")]
    Filter {
        role: String,
        table: String,
        kind: QType,
        #[source]
        source: Box<CompileError>,
    },

    #[error("role '{role}': table '{table}': {message}")]
    Policy { role: String, table: String, message: String },

    #[error("schema definition: {0}")]
    SchemaDefinition(String),

    #[error(transparent)]
    Parse(#[from] ParseError),
}
