//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use crate::models::RepositoryVersionId;
use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A write was rejected by a uniqueness or foreign key constraint.
    #[display("constraint violation")]
    Constraint,
    /// Stored data could not be converted into (or out of) its model.
    #[display("invalid store data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    #[display("unknown content type: {_0}")]
    UnknownContentType(#[error(not(source))] String),
    #[display("repository not found: {_0}")]
    RepositoryNotFound(#[error(not(source))] String),
    #[display("repository version not found: {_0}")]
    VersionNotFound(#[error(not(source))] RepositoryVersionId),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }

    /// Wrap a driver error, singling out constraint violations so callers can
    /// tell "this row clashes" apart from "the database is unavailable". The
    /// driver error is kept as a child in the error tree.
    #[track_caller]
    pub fn sqlx(err: sqlx::Error) -> Error {
        let kind = match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
                Self::Constraint
            },
            _ => Self::Database,
        };
        exn::Exn::from(err).raise(kind)
    }
}
