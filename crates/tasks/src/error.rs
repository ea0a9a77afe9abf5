//! Task Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use ferry_db::{ContentId, RepositoryVersionId};

/// A task error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for task operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// ### Validation Errors
/// Nothing was changed; the request itself has to be fixed.
/// - [`ErrorKind::LastVersion`]
/// - [`ErrorKind::UnknownContent`]
/// - [`ErrorKind::InvalidContentId`]
/// - [`ErrorKind::InvalidBaseVersion`]
/// - [`ErrorKind::RepositoryNotFound`]
/// - [`ErrorKind::VersionNotFound`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Store`]
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Download`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("a repository must retain at least one version")]
    LastVersion,
    #[display("unknown content: {_0:?}")]
    UnknownContent(#[error(not(source))] Vec<ContentId>),
    #[display("not a content id: {_0}")]
    InvalidContentId(#[error(not(source))] String),
    /// The base version is unknown, incomplete, or from another repository.
    #[display("invalid base version: {_0}")]
    InvalidBaseVersion(#[error(not(source))] RepositoryVersionId),
    #[display("repository not found: {_0}")]
    RepositoryNotFound(#[error(not(source))] String),
    #[display("repository version not found: {_0}")]
    VersionNotFound(#[error(not(source))] RepositoryVersionId),
    /// The content store failed.
    #[display("content store error")]
    Store,
    /// Reading, writing or deleting an artifact file failed.
    #[display("artifact storage error")]
    Storage,
    #[display("download of {_0} failed")]
    Download(#[error(not(source))] String),
    #[display("configuration error")]
    Config,
    #[display("background task panicked or was cancelled")]
    Panicked,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store | Self::Storage | Self::Download(_))
    }
}
