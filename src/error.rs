use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the record mapper, compiler and execution engine.
///
/// Nothing is retried internally. A failure inside a transaction is only
/// returned after the rollback has been issued.
#[derive(Debug, Error)]
pub enum Error {
    /// The record definition is malformed (duplicate storage names, no fields).
    #[error("schema error: {0}")]
    Schema(String),

    /// A predicate, projection or assignment names a column that does not exist.
    #[error("unknown column `{column}` in `{table}`")]
    InvalidColumn { table: String, column: String },

    /// The query intent is structurally invalid.
    #[error("compile error: {0}")]
    Compile(String),

    /// The backend could not be opened.
    #[error("connection error: {0}")]
    Connection(String),

    /// A transaction was nested or otherwise misused.
    #[error("transaction state error: {0}")]
    TransactionState(String),

    /// A result row does not fit the declared shape.
    #[error("marshal error: {0}")]
    Marshal(String),

    /// The backend rejected the statement.
    #[error("execution error: {0}")]
    Execution(String),
}

impl Error {
    pub(crate) fn invalid_column(table: &str, column: &str) -> Self {
        Error::InvalidColumn {
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Execution(err.to_string())
    }
}
