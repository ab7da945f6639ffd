use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// The requester may not perform this mutation.
    #[error("{0}")]
    Forbidden(String),

    /// The mutation makes no sense for this record.
    #[error("{0}")]
    InvalidOperation(String),

    #[error("{0}")]
    InvalidArgument(String),

    /// A uniqueness constraint fired under concurrent writers.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored value failed to decode.
    #[error("Corrupt {field}: {value}")]
    Corrupt { field: &'static str, value: String },

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Reclassify SQLite constraint violations as [`StoreError::Conflict`].
    pub(crate) fn from_write(err: rusqlite::Error, what: &str) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(format!("{what}: {err}"))
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
