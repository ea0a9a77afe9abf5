use super::{MAX_BIND_PARAMS, Store, StoreTransaction, now};
use crate::content::{Content, NaturalKey};
use crate::error::{ErrorKind, Result};
use crate::models::{ContentId, ContentRecord};
use crate::rows::ContentRow;
use exn::ResultExt;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::BTreeSet;

async fn insert_content(conn: &mut SqliteConnection, unit: &dyn Content) -> Result<Option<ContentRecord>> {
    let attributes = serde_json::to_string(&unit.attributes()).or_raise(|| ErrorKind::InvalidData("attributes"))?;
    let row: Option<ContentRow> = sqlx::query_as(include_str!("../../queries/insert_content.sql"))
        .bind(unit.content_type())
        .bind(unit.natural_key().to_json()?)
        .bind(attributes)
        .bind(now())
        .fetch_optional(conn)
        .await
        .map_err(ErrorKind::sqlx)?;
    row.map(ContentRecord::try_from).transpose()
}

/// One statement per chunk of keys: `content_type = ? AND natural_key IN (...)`.
///
/// Natural keys are stored canonically, so text equality here is exact
/// equality on every natural-key field.
async fn find_by_natural_keys(
    conn: &mut SqliteConnection,
    content_type: &str,
    keys: &[NaturalKey],
) -> Result<Vec<ContentRecord>> {
    let encoded = keys.iter().map(NaturalKey::to_json).collect::<Result<BTreeSet<_>>>()?;
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    let encoded: Vec<String> = encoded.into_iter().collect();
    let mut records = Vec::new();
    for chunk in encoded.chunks(MAX_BIND_PARAMS - 1) {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, content_type, natural_key, attributes, created_at FROM content WHERE content_type = ",
        );
        query.push_bind(content_type.to_string());
        query.push(" AND natural_key IN (");
        let mut list = query.separated(", ");
        for key in chunk {
            list.push_bind(key.clone());
        }
        list.push_unseparated(")");
        let rows: Vec<ContentRow> =
            query.build_query_as().fetch_all(&mut *conn).await.map_err(ErrorKind::sqlx)?;
        for row in rows {
            records.push(ContentRecord::try_from(row)?);
        }
    }
    Ok(records)
}

async fn get_content(conn: &mut SqliteConnection, id: ContentId) -> Result<Option<ContentRecord>> {
    let row: Option<ContentRow> = sqlx::query_as(include_str!("../../queries/get_content.sql"))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(ErrorKind::sqlx)?;
    row.map(ContentRecord::try_from).transpose()
}

/// Ids from `ids` that have no content row, in ascending order.
async fn missing_content(conn: &mut SqliteConnection, ids: &[ContentId]) -> Result<Vec<ContentId>> {
    let wanted: BTreeSet<ContentId> = ids.iter().copied().collect();
    let wanted: Vec<ContentId> = wanted.into_iter().collect();
    let mut found = BTreeSet::new();
    for chunk in wanted.chunks(MAX_BIND_PARAMS) {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id FROM content WHERE id IN (");
        let mut list = query.separated(", ");
        for id in chunk {
            list.push_bind(*id);
        }
        list.push_unseparated(")");
        let rows: Vec<(ContentId,)> = query.build_query_as().fetch_all(&mut *conn).await.map_err(ErrorKind::sqlx)?;
        found.extend(rows.into_iter().map(|(id,)| id));
    }
    Ok(wanted.into_iter().filter(|id| !found.contains(id)).collect())
}

impl Store {
    /// Saved content of `content_type` whose natural key equals one of `keys`.
    ///
    /// An empty `keys` slice returns nothing without touching the database.
    pub async fn find_by_natural_keys(&self, content_type: &str, keys: &[NaturalKey]) -> Result<Vec<ContentRecord>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        find_by_natural_keys(&mut *self.conn().await?, content_type, keys).await
    }

    pub async fn get_content(&self, id: ContentId) -> Result<Option<ContentRecord>> {
        get_content(&mut *self.conn().await?, id).await
    }

    pub async fn count_content(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(include_str!("../../queries/count_content.sql"))
            .fetch_one(&self.pool)
            .await
            .map_err(ErrorKind::sqlx)?;
        crate::rows::unsigned(count, "content count")
    }
}

impl StoreTransaction {
    /// Insert a new content unit.
    ///
    /// Returns `None` when a unit with the same type and natural key already
    /// exists (for instance because a concurrent run saved it first); nothing
    /// is written in that case.
    pub async fn insert_content(&mut self, unit: &dyn Content) -> Result<Option<ContentRecord>> {
        insert_content(self.conn(), unit).await
    }

    pub async fn find_by_natural_keys(&mut self, content_type: &str, keys: &[NaturalKey]) -> Result<Vec<ContentRecord>> {
        find_by_natural_keys(self.conn(), content_type, keys).await
    }

    pub async fn missing_content(&mut self, ids: &[ContentId]) -> Result<Vec<ContentId>> {
        missing_content(self.conn(), ids).await
    }
}
