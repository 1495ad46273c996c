//! Error types for loam-db.

use thiserror::Error;

/// Database error type for loam-db operations.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to prepare statement `{sql}`: {source}")]
    Prepare {
        sql: String,
        source: rusqlite::Error,
    },

    #[error("failed to execute statement `{sql}`: {source}")]
    Execute {
        sql: String,
        source: rusqlite::Error,
    },

    #[error("statement `{sql}` could not be prepared earlier and is unusable")]
    Unprepared { sql: String },

    #[error("thread lock poison error")]
    Poison,
}

/// Result type alias for loam-db operations.
pub type Result<T> = std::result::Result<T, DbError>;
