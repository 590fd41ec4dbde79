use thiserror::Error;

use crate::construct::Entity;

/// Errors raised while turning terms into a [`crate::query::Query`].
/// A compile either succeeds completely or returns one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Syntax error at {line}:{col}: {message}")]
    Syntax { message: String, line: usize, col: usize },
    #[error("Unresolved identifier '{name}' (column {col})")]
    UnresolvedIdentifier { name: String, col: usize },
    #[error("'{name}' is not a relationship and cannot be used in a pair (column {col})")]
    NotARelationship { name: String, col: usize },
    #[error("Invalid OR group (column {col}): {message}")]
    InvalidOr { message: String, col: usize },
    #[error("Too many arguments: a term takes a subject and an object, got {count} (column {col})")]
    TooManyArguments { count: usize, col: usize },
    #[error("Fact '{term}' is not ground")]
    NotGround { term: String },
}

impl CompileError {
    /// Column of the offending token, when known.
    pub fn column(&self) -> Option<usize> {
        match self {
            Self::Syntax { col, .. }
            | Self::UnresolvedIdentifier { col, .. }
            | Self::NotARelationship { col, .. }
            | Self::InvalidOr { col, .. }
            | Self::TooManyArguments { col, .. } => Some(*col),
            Self::NotGround { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum QuarryError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("Stale entity reference {0}")]
    StaleEntity(Entity),
    #[error("Adding ({relationship}, {object}) to {subject} would create a cycle")]
    Cycle { relationship: Entity, subject: Entity, object: Entity },
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, QuarryError>;

// Helper conversions
impl From<rusqlite::Error> for QuarryError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}

impl From<config::ConfigError> for QuarryError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
