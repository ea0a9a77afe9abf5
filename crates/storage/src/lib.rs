//! Byte storage for artifact files.
//!
//! Artifacts are addressed by a relative path (usually derived from their
//! sha256 digest, see [`artifact_path`]) and read or written through a
//! [`StorageBackend`]. Backend selection and configuration beyond the local
//! filesystem is left to the embedding application.

pub mod backend;
pub mod error;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::path::{artifact_path, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
