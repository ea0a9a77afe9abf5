//! Pipeline Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a stage (and with it, the pipeline) stopped.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A stage's own processing failed.
    #[display("stage {_0} failed")]
    Stage(#[error(not(source))] &'static str),
    /// A read or write against the content store failed.
    #[display("content store error")]
    Store,
    /// The next stage went away before it could receive everything.
    #[display("downstream stage disconnected")]
    Disconnected,
    #[display("unknown content type: {_0}")]
    UnknownContentType(#[error(not(source))] String),
    /// A candidate's natural key does not cover exactly the fields registered
    /// for its content type.
    #[display("natural key {key} does not match the fields registered for {content_type}")]
    InvalidNaturalKey { content_type: String, key: String },
    #[display("stage task panicked or was cancelled")]
    Panicked,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store)
    }
}
