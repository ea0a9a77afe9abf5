use super::{MAX_BIND_PARAMS, Store, StoreTransaction, now, rows_per_chunk};
use crate::error::{ErrorKind, Result};
use crate::models::{ContentId, Repository, RepositoryId, RepositoryVersion, RepositoryVersionId};
use crate::rows::{RepositoryRow, VersionRow, signed};
use exn::OptionExt;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::BTreeSet;
use tracing::{debug, instrument};

async fn get_repository(conn: &mut SqliteConnection, id: RepositoryId) -> Result<Option<Repository>> {
    let row: Option<RepositoryRow> = sqlx::query_as(include_str!("../../queries/get_repository.sql"))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(ErrorKind::sqlx)?;
    row.map(Repository::try_from).transpose()
}

async fn get_version(conn: &mut SqliteConnection, id: RepositoryVersionId) -> Result<Option<RepositoryVersion>> {
    let row: Option<VersionRow> = sqlx::query_as(include_str!("../../queries/get_version.sql"))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(ErrorKind::sqlx)?;
    row.map(RepositoryVersion::try_from).transpose()
}

async fn latest_version(conn: &mut SqliteConnection, repository: RepositoryId) -> Result<Option<RepositoryVersion>> {
    let row: Option<VersionRow> = sqlx::query_as(include_str!("../../queries/latest_version.sql"))
        .bind(repository)
        .fetch_optional(conn)
        .await
        .map_err(ErrorKind::sqlx)?;
    row.map(RepositoryVersion::try_from).transpose()
}

async fn version_content(conn: &mut SqliteConnection, version: &RepositoryVersion) -> Result<Vec<ContentId>> {
    let rows: Vec<(ContentId,)> = sqlx::query_as(include_str!("../../queries/version_content.sql"))
        .bind(version.repository_id)
        .bind(signed(version.number, "version number")?)
        .fetch_all(conn)
        .await
        .map_err(ErrorKind::sqlx)?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Appends `(?, ?, ...)` binding every id in `ids`.
fn push_id_list(query: &mut QueryBuilder<'_, Sqlite>, ids: &[ContentId]) {
    query.push(" (");
    let mut list = query.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    list.push_unseparated(")");
}

fn deduplicate(ids: &[ContentId]) -> Vec<ContentId> {
    ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

impl Store {
    /// Create a repository together with its empty, complete version 0.
    #[instrument(skip(self))]
    pub async fn create_repository(&self, name: &str) -> Result<(Repository, RepositoryVersion)> {
        let mut tx = self.begin().await?;
        let row: RepositoryRow = sqlx::query_as(include_str!("../../queries/insert_repository.sql"))
            .bind(name)
            .bind(now())
            .fetch_one(tx.conn())
            .await
            .map_err(ErrorKind::sqlx)?;
        let repository = Repository::try_from(row)?;
        let mut version = tx.create_version(repository.id, None).await?;
        tx.finish_version(version.id).await?;
        version.complete = true;
        let repository = tx
            .get_repository(repository.id)
            .await?
            .ok_or_raise(|| ErrorKind::RepositoryNotFound(name.to_string()))?;
        tx.commit().await?;
        Ok((repository, version))
    }

    pub async fn get_repository(&self, id: RepositoryId) -> Result<Option<Repository>> {
        get_repository(&mut *self.conn().await?, id).await
    }

    pub async fn get_repository_by_name(&self, name: &str) -> Result<Option<Repository>> {
        let row: Option<RepositoryRow> = sqlx::query_as(include_str!("../../queries/get_repository_by_name.sql"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(ErrorKind::sqlx)?;
        row.map(Repository::try_from).transpose()
    }

    pub async fn get_version(&self, id: RepositoryVersionId) -> Result<Option<RepositoryVersion>> {
        get_version(&mut *self.conn().await?, id).await
    }

    /// Complete versions of a repository, oldest first.
    pub async fn versions(&self, repository: RepositoryId) -> Result<Vec<RepositoryVersion>> {
        let rows: Vec<VersionRow> = sqlx::query_as(include_str!("../../queries/list_versions.sql"))
            .bind(repository)
            .fetch_all(&self.pool)
            .await
            .map_err(ErrorKind::sqlx)?;
        rows.into_iter().map(RepositoryVersion::try_from).collect()
    }

    pub async fn latest_version(&self, repository: RepositoryId) -> Result<Option<RepositoryVersion>> {
        latest_version(&mut *self.conn().await?, repository).await
    }

    /// Content set of a version, in ascending id order.
    pub async fn version_content(&self, id: RepositoryVersionId) -> Result<Vec<ContentId>> {
        let mut conn = self.conn().await?;
        let version = get_version(&mut conn, id).await?.ok_or_raise(|| ErrorKind::VersionNotFound(id))?;
        version_content(&mut conn, &version).await
    }
}

impl StoreTransaction {
    pub async fn get_repository(&mut self, id: RepositoryId) -> Result<Option<Repository>> {
        get_repository(self.conn(), id).await
    }

    pub async fn get_version(&mut self, id: RepositoryVersionId) -> Result<Option<RepositoryVersion>> {
        get_version(self.conn(), id).await
    }

    pub async fn latest_version(&mut self, repository: RepositoryId) -> Result<Option<RepositoryVersion>> {
        latest_version(self.conn(), repository).await
    }

    pub async fn count_complete_versions(&mut self, repository: RepositoryId) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(include_str!("../../queries/count_complete_versions.sql"))
            .bind(repository)
            .fetch_one(self.conn())
            .await
            .map_err(ErrorKind::sqlx)?;
        crate::rows::unsigned(count, "version count")
    }

    /// Start a new, incomplete version with the next unused number.
    ///
    /// Changes made through [`add_content`](Self::add_content) and
    /// [`remove_content`](Self::remove_content) apply on top of the current
    /// content set, so at most one version should be under construction per
    /// repository.
    pub async fn create_version(
        &mut self,
        repository: RepositoryId,
        base: Option<RepositoryVersionId>,
    ) -> Result<RepositoryVersion> {
        let claimed: Option<(i64,)> = sqlx::query_as(include_str!("../../queries/claim_version_number.sql"))
            .bind(repository)
            .fetch_optional(self.conn())
            .await
            .map_err(ErrorKind::sqlx)?;
        let (number,) = claimed.ok_or_raise(|| ErrorKind::RepositoryNotFound(repository.to_string()))?;
        let row: VersionRow = sqlx::query_as(include_str!("../../queries/insert_version.sql"))
            .bind(repository)
            .bind(number)
            .bind(base)
            .bind(now())
            .fetch_one(self.conn())
            .await
            .map_err(ErrorKind::sqlx)?;
        RepositoryVersion::try_from(row)
    }

    pub async fn finish_version(&mut self, id: RepositoryVersionId) -> Result<()> {
        sqlx::query(include_str!("../../queries/finish_version.sql"))
            .bind(id)
            .execute(self.conn())
            .await
            .map_err(ErrorKind::sqlx)?;
        Ok(())
    }

    pub async fn version_content(&mut self, version: &RepositoryVersion) -> Result<Vec<ContentId>> {
        version_content(self.conn(), version).await
    }

    /// Content that is a member of the repository right now, including changes
    /// made by a version still under construction.
    pub async fn current_content(&mut self, repository: RepositoryId) -> Result<Vec<ContentId>> {
        let rows: Vec<(ContentId,)> = sqlx::query_as(include_str!("../../queries/current_content.sql"))
            .bind(repository)
            .fetch_all(self.conn())
            .await
            .map_err(ErrorKind::sqlx)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Make `ids` members of `version`.
    ///
    /// Content removed earlier by the same version gets its membership
    /// restored rather than a second row; content already present is left
    /// alone.
    #[instrument(skip(self, version, ids), fields(version = version.number, count = ids.len()))]
    pub async fn add_content(&mut self, version: &RepositoryVersion, ids: &[ContentId]) -> Result<()> {
        let ids = deduplicate(ids);
        if ids.is_empty() {
            return Ok(());
        }
        for chunk in ids.chunks(MAX_BIND_PARAMS - 2) {
            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE repository_content SET version_removed_id = NULL WHERE repository_id = ");
            query.push_bind(version.repository_id);
            query.push(" AND version_removed_id = ");
            query.push_bind(version.id);
            query.push(" AND content_id IN");
            push_id_list(&mut query, chunk);
            query.build().execute(self.conn()).await.map_err(ErrorKind::sqlx)?;
        }

        let present: BTreeSet<ContentId> = self.current_content(version.repository_id).await?.into_iter().collect();
        let new: Vec<ContentId> = ids.into_iter().filter(|id| !present.contains(id)).collect();
        for chunk in new.chunks(rows_per_chunk(3)) {
            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO repository_content (repository_id, content_id, version_added_id) ");
            query.push_values(chunk, |mut row, id| {
                row.push_bind(version.repository_id).push_bind(*id).push_bind(version.id);
            });
            query.build().execute(self.conn()).await.map_err(ErrorKind::sqlx)?;
        }
        debug!(added = new.len(), "content added");
        Ok(())
    }

    /// End the membership of `ids` at `version`.
    ///
    /// Content added by this same version is dropped outright, as if it had
    /// never been added.
    #[instrument(skip(self, version, ids), fields(version = version.number, count = ids.len()))]
    pub async fn remove_content(&mut self, version: &RepositoryVersion, ids: &[ContentId]) -> Result<()> {
        let ids = deduplicate(ids);
        for chunk in ids.chunks(MAX_BIND_PARAMS - 2) {
            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM repository_content WHERE repository_id = ");
            query.push_bind(version.repository_id);
            query.push(" AND version_added_id = ");
            query.push_bind(version.id);
            query.push(" AND content_id IN");
            push_id_list(&mut query, chunk);
            query.build().execute(self.conn()).await.map_err(ErrorKind::sqlx)?;

            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE repository_content SET version_removed_id = ");
            query.push_bind(version.id);
            query.push(" WHERE repository_id = ");
            query.push_bind(version.repository_id);
            query.push(" AND version_removed_id IS NULL AND content_id IN");
            push_id_list(&mut query, chunk);
            query.build().execute(self.conn()).await.map_err(ErrorKind::sqlx)?;
        }
        Ok(())
    }

    /// Delete a version without changing the content set of any other version.
    ///
    /// A complete version with a complete successor has its changes folded
    /// into that successor. Otherwise (the latest version, or one that was
    /// never finished) its changes are undone.
    #[instrument(skip(self, version), fields(repository = %version.repository_id, version = version.number))]
    pub async fn delete_version(&mut self, version: &RepositoryVersion) -> Result<()> {
        let successor = if version.complete {
            let row: Option<VersionRow> = sqlx::query_as(include_str!("../../queries/next_version.sql"))
                .bind(version.repository_id)
                .bind(signed(version.number, "version number")?)
                .fetch_optional(self.conn())
                .await
                .map_err(ErrorKind::sqlx)?;
            row.map(RepositoryVersion::try_from).transpose()?
        } else {
            None
        };

        match successor {
            Some(next) => {
                debug!(into = next.number, "squashing version");
                self.squash(version.id, next.id).await?;
            },
            None => {
                debug!("reverting version");
                sqlx::query(include_str!("../../queries/revert_added.sql"))
                    .bind(version.id)
                    .execute(self.conn())
                    .await
                    .map_err(ErrorKind::sqlx)?;
                sqlx::query(include_str!("../../queries/revert_removed.sql"))
                    .bind(version.id)
                    .execute(self.conn())
                    .await
                    .map_err(ErrorKind::sqlx)?;
            },
        }

        sqlx::query(include_str!("../../queries/delete_version.sql"))
            .bind(version.id)
            .execute(self.conn())
            .await
            .map_err(ErrorKind::sqlx)?;
        Ok(())
    }

    async fn squash(&mut self, deleted: RepositoryVersionId, next: RepositoryVersionId) -> Result<()> {
        sqlx::query(include_str!("../../queries/squash_drop_transient.sql"))
            .bind(deleted)
            .bind(next)
            .execute(self.conn())
            .await
            .map_err(ErrorKind::sqlx)?;

        let pairs: Vec<(i64, i64, Option<RepositoryVersionId>)> =
            sqlx::query_as(include_str!("../../queries/squash_readded_pairs.sql"))
                .bind(deleted)
                .bind(next)
                .fetch_all(self.conn())
                .await
                .map_err(ErrorKind::sqlx)?;
        for (earlier, later, removed) in pairs {
            sqlx::query(include_str!("../../queries/squash_extend_membership.sql"))
                .bind(earlier)
                .bind(removed)
                .execute(self.conn())
                .await
                .map_err(ErrorKind::sqlx)?;
            sqlx::query(include_str!("../../queries/delete_membership.sql"))
                .bind(later)
                .execute(self.conn())
                .await
                .map_err(ErrorKind::sqlx)?;
        }

        sqlx::query(include_str!("../../queries/squash_move_added.sql"))
            .bind(deleted)
            .bind(next)
            .execute(self.conn())
            .await
            .map_err(ErrorKind::sqlx)?;
        sqlx::query(include_str!("../../queries/squash_move_removed.sql"))
            .bind(deleted)
            .bind(next)
            .execute(self.conn())
            .await
            .map_err(ErrorKind::sqlx)?;
        Ok(())
    }
}
