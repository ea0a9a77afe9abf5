//! Persisted records.

use crate::checksum::{Checksums, Digests};
use crate::content::NaturalKey;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use time::UtcDateTime;

macro_rules! id_type {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {$(
        $(#[$meta])*
        #[derive(Debug, Display, From, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[derive(sqlx::Type)]
        #[sqlx(transparent)]
        #[serde(transparent)]
        pub struct $name(pub i64);
    )+};
}

id_type!(
    /// Primary key of a [`ContentRecord`].
    ContentId,
    /// Primary key of an [`Artifact`].
    ArtifactId,
    /// Primary key of a [`ContentArtifact`].
    ContentArtifactId,
    /// Primary key of a [`RemoteArtifact`].
    RemoteArtifactId,
    /// Primary key of a [`Remote`].
    RemoteId,
    /// Primary key of a [`Repository`].
    RepositoryId,
    /// Primary key of a [`RepositoryVersion`].
    RepositoryVersionId,
);

/// A saved content unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
    pub id: ContentId,
    pub content_type: String,
    pub natural_key: NaturalKey,
    pub attributes: serde_json::Value,
    pub created_at: UtcDateTime,
}

/// A stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub id: ArtifactId,
    /// Path of the file relative to the storage root.
    pub file: PathBuf,
    pub size: u64,
    pub checksums: Checksums,
    pub created_at: UtcDateTime,
}
impl Artifact {
    pub fn sha256(&self) -> &str {
        &self.checksums.sha256
    }
}

/// A content-addressed file that is about to be recorded.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub file: PathBuf,
    pub size: u64,
    pub checksums: Checksums,
}
impl NewArtifact {
    /// Describe a file stored at its content-addressed path.
    pub fn content_addressed(size: u64, checksums: Checksums) -> ferry_storage::error::Result<Self> {
        let file = ferry_storage::artifact_path(&checksums.sha256)?;
        Ok(Self { file, size, checksums })
    }
}

/// An upstream source of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub id: RemoteId,
    pub name: String,
    pub url: String,
    /// Upper bound for a whole download from this remote.
    pub total_timeout: Option<Duration>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewRemote {
    pub name: String,
    pub url: String,
    pub total_timeout: Option<Duration>,
    pub username: Option<String>,
    pub password: Option<String>,
}
impl NewRemote {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Link between a content unit and one of its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentArtifact {
    pub id: ContentArtifactId,
    pub content_id: ContentId,
    /// `None` while the file has not been downloaded (on-demand content).
    pub artifact_id: Option<ArtifactId>,
    pub relative_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContentArtifact {
    pub content_id: ContentId,
    pub artifact_id: Option<ArtifactId>,
    pub relative_path: String,
}

/// Provenance: a remote claims a content artifact is available at `url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifact {
    pub id: RemoteArtifactId,
    pub content_artifact_id: ContentArtifactId,
    pub remote_id: RemoteId,
    pub url: String,
    pub size: Option<u64>,
    pub digests: Digests,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRemoteArtifact {
    pub content_artifact_id: ContentArtifactId,
    pub remote_id: RemoteId,
    pub url: String,
    pub size: Option<u64>,
    pub digests: Digests,
}

/// A content artifact with a stored file, as visited by integrity checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedArtifact {
    pub content_artifact_id: ContentArtifactId,
    pub content_id: ContentId,
    pub relative_path: String,
    pub artifact: Artifact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
    /// Number the next created version will receive. Never decreases.
    pub next_version: u64,
    pub created_at: UtcDateTime,
}

/// A numbered snapshot of a repository's content set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryVersion {
    pub id: RepositoryVersionId,
    pub repository_id: RepositoryId,
    pub number: u64,
    /// Incomplete versions are still being built and are not part of history.
    pub complete: bool,
    pub base_version_id: Option<RepositoryVersionId>,
    pub created_at: UtcDateTime,
}

/// Which content artifacts an integrity check visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactScope {
    All,
    /// Only artifacts of content in this version's content set.
    Version(RepositoryVersionId),
}
