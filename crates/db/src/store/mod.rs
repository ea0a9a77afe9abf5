//! Queries against the content store.
//!
//! Every query is written once as a function over a bare
//! [`SqliteConnection`]. [`Store`] runs them on a pooled connection (one
//! statement, autocommit), while [`StoreTransaction`] runs them inside a single
//! transaction for writes that must become visible together.

mod artifact;
mod content;
mod repository;

use crate::Database;
use crate::error::{ErrorKind, Result};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use time::UtcDateTime;

/// SQLite caps the number of bound parameters per statement; bulk statements
/// are split so that no chunk gets close.
const MAX_BIND_PARAMS: usize = 900;

/// Pooled access to content, artifacts and repository versions.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}
impl From<&Database> for Store {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}
impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool.acquire().await.map_err(ErrorKind::sqlx)
    }

    /// Start a transaction. Nothing written through it is visible to anyone
    /// else until [`StoreTransaction::commit`]; dropping it rolls back.
    pub async fn begin(&self) -> Result<StoreTransaction> {
        let tx = self.pool.begin().await.map_err(ErrorKind::sqlx)?;
        Ok(StoreTransaction { tx })
    }
}

/// A unit of atomic work against the store.
pub struct StoreTransaction {
    tx: Transaction<'static, Sqlite>,
}
impl StoreTransaction {
    fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(ErrorKind::sqlx)
    }

    /// Explicit rollback; equivalent to dropping the transaction but surfaces
    /// errors.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(ErrorKind::sqlx)
    }
}

fn now() -> i64 {
    UtcDateTime::now().unix_timestamp()
}

/// Rows per bulk statement for a table with `columns` bound values per row.
fn rows_per_chunk(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns).max(1)
}
