//! Error types for record store operations.

use thiserror::Error;

/// Errors that can occur while reading or writing projected records.
///
/// Duplicate-key inserts and updates or deletes of absent keys are not errors;
/// they are reported through [`WriteOutcome`](crate::WriteOutcome).
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite database error.
    #[error("sqlite error: {0}")]
    Sqlite(String),

    /// Read connection pool error.
    #[error("connection pool error: {0}")]
    Pool(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Sqlite(err.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Pool(err.to_string())
    }
}

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;
