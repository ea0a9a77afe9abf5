use crate::error::Error;
use crate::models::{Repository, RepositoryId, RepositoryVersion, RepositoryVersionId};

#[derive(sqlx::FromRow)]
pub(crate) struct RepositoryRow {
    pub id: RepositoryId,
    pub name: String,
    pub next_version: i64,
    pub created_at: i64,
}
impl TryFrom<RepositoryRow> for Repository {
    type Error = Error;
    fn try_from(row: RepositoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            next_version: super::unsigned(row.next_version, "next version")?,
            created_at: super::timestamp(row.created_at, "repository creation date")?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct VersionRow {
    pub id: RepositoryVersionId,
    pub repository_id: RepositoryId,
    pub number: i64,
    pub complete: bool,
    pub base_version_id: Option<RepositoryVersionId>,
    pub created_at: i64,
}
impl TryFrom<VersionRow> for RepositoryVersion {
    type Error = Error;
    fn try_from(row: VersionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            repository_id: row.repository_id,
            number: super::unsigned(row.number, "version number")?,
            complete: row.complete,
            base_version_id: row.base_version_id,
            created_at: super::timestamp(row.created_at, "version creation date")?,
        })
    }
}
