//! Error types for query parsing, execution and result shaping.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no parameter supplied for token `:{name}`")]
    TokenResolution { name: String },

    #[error("template has more positional tokens than the {supplied} value(s) supplied")]
    PositionalArity { supplied: usize },

    #[error("unknown type token `{letters}` in `{token}`")]
    UnknownTypeToken { token: String, letters: String },

    #[error("no template to run")]
    MissingTemplate,

    #[error("query failed: {message} (template: {template})")]
    QueryExecution { message: String, template: String },

    #[error("result is empty")]
    EmptyResult,

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("invalid bind target: {0}")]
    InvalidBindTarget(String),

    #[error("`{type_name}` cannot be constructed: {reason}")]
    InvalidTypeDescriptor { type_name: String, reason: String },

    #[error("mapper returned no object for row {row}")]
    InvalidMapperResult { row: usize },

    #[error("results are read-only")]
    ReadOnlyResult,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// True for errors caused by a malformed or unresolvable template.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Error::TokenResolution { .. }
                | Error::PositionalArity { .. }
                | Error::UnknownTypeToken { .. }
                | Error::MissingTemplate
        )
    }
}
