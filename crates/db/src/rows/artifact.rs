use crate::checksum::{Checksums, Digests};
use crate::error::{Error, ErrorKind};
use crate::models::{
    Artifact, ArtifactId, ContentArtifact, ContentArtifactId, ContentId, LinkedArtifact, Remote, RemoteArtifact,
    RemoteArtifactId, RemoteId,
};
use exn::ResultExt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(sqlx::FromRow)]
pub(crate) struct ArtifactRow {
    pub id: ArtifactId,
    pub file: String,
    pub size: i64,
    pub md5: String,
    pub sha1: String,
    pub sha224: String,
    pub sha256: String,
    pub sha384: String,
    pub sha512: String,
    pub created_at: i64,
}
impl TryFrom<ArtifactRow> for Artifact {
    type Error = Error;
    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            file: PathBuf::from(row.file),
            size: super::unsigned(row.size, "artifact size")?,
            checksums: Checksums {
                md5: row.md5,
                sha1: row.sha1,
                sha224: row.sha224,
                sha256: row.sha256,
                sha384: row.sha384,
                sha512: row.sha512,
            },
            created_at: super::timestamp(row.created_at, "artifact creation date")?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RemoteRow {
    pub id: RemoteId,
    pub name: String,
    pub url: String,
    pub total_timeout_ms: Option<i64>,
    pub username: Option<String>,
    pub password: Option<String>,
}
impl TryFrom<RemoteRow> for Remote {
    type Error = Error;
    fn try_from(row: RemoteRow) -> Result<Self, Self::Error> {
        let total_timeout = row
            .total_timeout_ms
            .map(|ms| super::unsigned(ms, "remote timeout").map(Duration::from_millis))
            .transpose()?;
        Ok(Self {
            id: row.id,
            name: row.name,
            url: row.url,
            total_timeout,
            username: row.username,
            password: row.password,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ContentArtifactRow {
    pub id: ContentArtifactId,
    pub content_id: ContentId,
    pub artifact_id: Option<ArtifactId>,
    pub relative_path: String,
}
impl From<ContentArtifactRow> for ContentArtifact {
    fn from(row: ContentArtifactRow) -> Self {
        Self {
            id: row.id,
            content_id: row.content_id,
            artifact_id: row.artifact_id,
            relative_path: row.relative_path,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RemoteArtifactRow {
    pub id: RemoteArtifactId,
    pub content_artifact_id: ContentArtifactId,
    pub remote_id: RemoteId,
    pub url: String,
    pub size: Option<i64>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha224: Option<String>,
    pub sha256: Option<String>,
    pub sha384: Option<String>,
    pub sha512: Option<String>,
}
impl TryFrom<RemoteArtifactRow> for RemoteArtifact {
    type Error = Error;
    fn try_from(row: RemoteArtifactRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            content_artifact_id: row.content_artifact_id,
            remote_id: row.remote_id,
            url: row.url,
            size: row.size.map(|s| super::unsigned(s, "remote artifact size")).transpose()?,
            digests: Digests {
                md5: row.md5,
                sha1: row.sha1,
                sha224: row.sha224,
                sha256: row.sha256,
                sha384: row.sha384,
                sha512: row.sha512,
            },
        })
    }
}

/// Content artifact joined with its (non-null) artifact.
#[derive(sqlx::FromRow)]
pub(crate) struct LinkedArtifactRow {
    pub content_artifact_id: ContentArtifactId,
    pub content_id: ContentId,
    pub relative_path: String,
    #[sqlx(flatten)]
    pub artifact: ArtifactRow,
}
impl TryFrom<LinkedArtifactRow> for LinkedArtifact {
    type Error = Error;
    fn try_from(row: LinkedArtifactRow) -> Result<Self, Self::Error> {
        Ok(Self {
            content_artifact_id: row.content_artifact_id,
            content_id: row.content_id,
            relative_path: row.relative_path,
            artifact: row.artifact.try_into()?,
        })
    }
}

/// Encodes an optional timeout for storage.
pub(crate) fn timeout_ms(timeout: Option<Duration>) -> crate::error::Result<Option<i64>> {
    timeout
        .map(|t| i64::try_from(t.as_millis()).or_raise(|| ErrorKind::InvalidData("remote timeout")))
        .transpose()
}
