use super::{Store, StoreTransaction, now, rows_per_chunk};
use crate::error::{ErrorKind, Result};
use crate::models::{
    Artifact, ArtifactId, ArtifactScope, ContentArtifact, ContentArtifactId, ContentId, LinkedArtifact, NewArtifact,
    NewContentArtifact, NewRemote, NewRemoteArtifact, Remote, RemoteArtifact, RemoteId,
};
use crate::rows::{ArtifactRow, ContentArtifactRow, LinkedArtifactRow, RemoteArtifactRow, RemoteRow, signed};
use exn::OptionExt;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

async fn bulk_insert_content_artifacts(
    conn: &mut SqliteConnection,
    links: Vec<NewContentArtifact>,
) -> Result<Vec<ContentArtifact>> {
    let mut saved = Vec::with_capacity(links.len());
    for chunk in links.chunks(rows_per_chunk(3)) {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO content_artifacts (content_id, artifact_id, relative_path) ");
        query.push_values(chunk, |mut row, link| {
            row.push_bind(link.content_id).push_bind(link.artifact_id).push_bind(link.relative_path.clone());
        });
        query.push(" RETURNING id, content_id, artifact_id, relative_path");
        let rows: Vec<ContentArtifactRow> =
            query.build_query_as().fetch_all(&mut *conn).await.map_err(ErrorKind::sqlx)?;
        saved.extend(rows.into_iter().map(ContentArtifact::from));
    }
    Ok(saved)
}

async fn bulk_insert_remote_artifacts(
    conn: &mut SqliteConnection,
    provenance: Vec<NewRemoteArtifact>,
) -> Result<Vec<RemoteArtifact>> {
    let mut saved = Vec::with_capacity(provenance.len());
    for chunk in provenance.chunks(rows_per_chunk(10)) {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO remote_artifacts \
             (content_artifact_id, remote_id, url, size, md5, sha1, sha224, sha256, sha384, sha512) ",
        );
        let mut sizes = Vec::with_capacity(chunk.len());
        for ra in chunk {
            sizes.push(ra.size.map(|s| signed(s, "remote artifact size")).transpose()?);
        }
        query.push_values(chunk.iter().zip(sizes), |mut row, (ra, size)| {
            row.push_bind(ra.content_artifact_id)
                .push_bind(ra.remote_id)
                .push_bind(ra.url.clone())
                .push_bind(size)
                .push_bind(ra.digests.md5.clone())
                .push_bind(ra.digests.sha1.clone())
                .push_bind(ra.digests.sha224.clone())
                .push_bind(ra.digests.sha256.clone())
                .push_bind(ra.digests.sha384.clone())
                .push_bind(ra.digests.sha512.clone());
        });
        query.push(
            " RETURNING id, content_artifact_id, remote_id, url, size, md5, sha1, sha224, sha256, sha384, sha512",
        );
        let rows: Vec<RemoteArtifactRow> =
            query.build_query_as().fetch_all(&mut *conn).await.map_err(ErrorKind::sqlx)?;
        for row in rows {
            saved.push(RemoteArtifact::try_from(row)?);
        }
    }
    Ok(saved)
}

impl Store {
    /// Record a stored file. Saving an artifact whose sha256 is already known
    /// returns the existing record.
    pub async fn save_artifact(&self, artifact: &NewArtifact) -> Result<Artifact> {
        let file = artifact.file.to_str().ok_or_raise(|| ErrorKind::InvalidData("artifact path"))?;
        let sums = &artifact.checksums;
        let row: ArtifactRow = sqlx::query_as(include_str!("../../queries/insert_artifact.sql"))
            .bind(file)
            .bind(signed(artifact.size, "artifact size")?)
            .bind(&sums.md5)
            .bind(&sums.sha1)
            .bind(&sums.sha224)
            .bind(&sums.sha256)
            .bind(&sums.sha384)
            .bind(&sums.sha512)
            .bind(now())
            .fetch_one(&self.pool)
            .await
            .map_err(ErrorKind::sqlx)?;
        row.try_into()
    }

    pub async fn get_artifact(&self, id: ArtifactId) -> Result<Option<Artifact>> {
        let row: Option<ArtifactRow> = sqlx::query_as(include_str!("../../queries/get_artifact.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ErrorKind::sqlx)?;
        row.map(Artifact::try_from).transpose()
    }

    /// Create a remote, or update the one with the same name.
    pub async fn save_remote(&self, remote: &NewRemote) -> Result<Remote> {
        let row: RemoteRow = sqlx::query_as(include_str!("../../queries/upsert_remote.sql"))
            .bind(&remote.name)
            .bind(&remote.url)
            .bind(crate::rows::timeout_ms(remote.total_timeout)?)
            .bind(&remote.username)
            .bind(&remote.password)
            .fetch_one(&self.pool)
            .await
            .map_err(ErrorKind::sqlx)?;
        row.try_into()
    }

    pub async fn get_remote(&self, id: RemoteId) -> Result<Option<Remote>> {
        let row: Option<RemoteRow> = sqlx::query_as(include_str!("../../queries/get_remote.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ErrorKind::sqlx)?;
        row.map(Remote::try_from).transpose()
    }

    /// Files of a content unit, ordered by relative path.
    pub async fn content_artifacts(&self, content_id: ContentId) -> Result<Vec<ContentArtifact>> {
        let rows: Vec<ContentArtifactRow> =
            sqlx::query_as(include_str!("../../queries/content_artifacts_for_content.sql"))
                .bind(content_id)
                .fetch_all(&self.pool)
                .await
                .map_err(ErrorKind::sqlx)?;
        Ok(rows.into_iter().map(ContentArtifact::from).collect())
    }

    /// Provenance records of a content artifact, in the order they were saved.
    pub async fn remote_artifacts(&self, content_artifact_id: ContentArtifactId) -> Result<Vec<RemoteArtifact>> {
        let rows: Vec<RemoteArtifactRow> =
            sqlx::query_as(include_str!("../../queries/remote_artifacts_for_content_artifact.sql"))
                .bind(content_artifact_id)
                .fetch_all(&self.pool)
                .await
                .map_err(ErrorKind::sqlx)?;
        rows.into_iter().map(RemoteArtifact::try_from).collect()
    }

    /// Every content artifact with a stored file within `scope`.
    ///
    /// Fetched eagerly: integrity checks hold no connection while they hash
    /// files and download replacements.
    pub async fn repairable_artifacts(&self, scope: ArtifactScope) -> Result<Vec<LinkedArtifact>> {
        let rows: Vec<LinkedArtifactRow> = match scope {
            ArtifactScope::All => sqlx::query_as(include_str!("../../queries/repairable_all.sql"))
                .fetch_all(&self.pool)
                .await
                .map_err(ErrorKind::sqlx)?,
            ArtifactScope::Version(version_id) => {
                let version = self
                    .get_version(version_id)
                    .await?
                    .ok_or_raise(|| ErrorKind::VersionNotFound(version_id))?;
                sqlx::query_as(include_str!("../../queries/repairable_version.sql"))
                    .bind(version.repository_id)
                    .bind(signed(version.number, "version number")?)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(ErrorKind::sqlx)?
            },
        };
        rows.into_iter().map(LinkedArtifact::try_from).collect()
    }
}

impl StoreTransaction {
    /// Insert links in as few statements as the parameter limit allows.
    ///
    /// The returned links are not guaranteed to be in input order; match them
    /// back by `(content_id, relative_path)`, which is unique.
    pub async fn bulk_insert_content_artifacts(&mut self, links: Vec<NewContentArtifact>) -> Result<Vec<ContentArtifact>> {
        bulk_insert_content_artifacts(self.conn(), links).await
    }

    pub async fn bulk_insert_remote_artifacts(
        &mut self,
        provenance: Vec<NewRemoteArtifact>,
    ) -> Result<Vec<RemoteArtifact>> {
        bulk_insert_remote_artifacts(self.conn(), provenance).await
    }
}
