//! SQLite store for content, artifacts and repository versions.
//!
//! # Architecture
//! - **Content** units are deduplicated by `(content_type, natural_key)`.
//!   The natural key is the set of fields a content type declares as its
//!   identity; see [`ContentType`].
//! - **Artifacts** are stored files, addressed by their sha256 digest. A
//!   content unit links to its files through content artifacts, and remote
//!   artifacts record where each file can be downloaded again.
//! - **Repository versions** are numbered snapshots of a repository's content
//!   set. Membership is kept as `[added, removed)` ranges so that a version's
//!   content never has to be copied.

pub mod checksum;
pub mod content;
mod db;
pub mod error;
pub mod models;
mod rows;
mod store;

pub use crate::content::{Content, ContentType, ContentTypes, FileContent, NaturalKey};
pub use crate::db::Database;
pub use crate::models::*;
pub use crate::store::{Store, StoreTransaction};
