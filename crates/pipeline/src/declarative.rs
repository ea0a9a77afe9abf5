//! In-flight descriptions of content and its files.

use ferry_db::checksum::Digests;
use ferry_db::{Artifact, Content, ContentRecord, NaturalKey, Remote};

/// The content of a [`DeclarativeContent`]: either a candidate that has not
/// been saved, or the stored record it turned out to be.
#[derive(Debug)]
pub enum ContentRef {
    Unsaved(Box<dyn Content>),
    Saved(ContentRecord),
}

impl ContentRef {
    pub fn content_type(&self) -> &str {
        match self {
            Self::Unsaved(unit) => unit.content_type(),
            Self::Saved(record) => &record.content_type,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        match self {
            Self::Unsaved(unit) => unit.natural_key(),
            Self::Saved(record) => record.natural_key.clone(),
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved(_))
    }

    pub fn saved(&self) -> Option<&ContentRecord> {
        match self {
            Self::Saved(record) => Some(record),
            Self::Unsaved(_) => None,
        }
    }
}

/// The bytes behind a [`DeclarativeArtifact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRef {
    /// Already downloaded and recorded.
    Stored(Artifact),
    /// Not downloaded (on-demand); only what the remote advertises is known.
    Deferred { size: Option<u64>, digests: Digests },
}

impl ArtifactRef {
    pub fn size(&self) -> Option<u64> {
        match self {
            Self::Stored(artifact) => Some(artifact.size),
            Self::Deferred { size, .. } => *size,
        }
    }

    pub fn digests(&self) -> Digests {
        match self {
            Self::Stored(artifact) => Digests::from(&artifact.checksums),
            Self::Deferred { digests, .. } => digests.clone(),
        }
    }
}

/// One file of a content unit, and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarativeArtifact {
    url: String,
    relative_path: String,
    artifact: ArtifactRef,
    remote: Remote,
}

impl DeclarativeArtifact {
    pub fn new(artifact: ArtifactRef, url: impl Into<String>, relative_path: impl Into<String>, remote: Remote) -> Self {
        Self {
            url: url.into(),
            relative_path: relative_path.into(),
            artifact,
            remote,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn artifact(&self) -> &ArtifactRef {
        &self.artifact
    }

    pub fn remote(&self) -> &Remote {
        &self.remote
    }
}

/// A content unit making its way through the pipeline.
#[derive(Debug)]
pub struct DeclarativeContent {
    pub content: ContentRef,
    pub d_artifacts: Vec<DeclarativeArtifact>,
}

impl DeclarativeContent {
    pub fn new(content: impl Content + 'static, d_artifacts: Vec<DeclarativeArtifact>) -> Self {
        Self {
            content: ContentRef::Unsaved(Box::new(content)),
            d_artifacts,
        }
    }
}
