//! Repository version management.
//!
//! Versions are immutable once complete. Content changes always produce a new
//! version, and deleting a version folds its changes into its successor so
//! that every other version keeps its content set.

use crate::context::Context;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use ferry_db::{ContentId, Repository, RepositoryId, RepositoryVersion, RepositoryVersionId};
use std::collections::BTreeSet;
use tracing::{info, instrument};

/// Content to remove in [`add_and_remove`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSelection {
    /// Everything in the latest version, resolved when the call runs.
    All,
    Ids(Vec<ContentId>),
}

impl ContentSelection {
    /// Parse ids as given by a user; `"*"` anywhere selects everything.
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Result<Self> {
        if values.iter().any(|value| value.as_ref().trim() == "*") {
            return Ok(Self::All);
        }
        let mut ids = Vec::with_capacity(values.len());
        for value in values {
            let value = value.as_ref().trim();
            let id = value.parse::<i64>().or_raise(|| ErrorKind::InvalidContentId(value.to_string()))?;
            ids.push(ContentId(id));
        }
        Ok(Self::Ids(ids))
    }
}

impl From<Vec<ContentId>> for ContentSelection {
    fn from(ids: Vec<ContentId>) -> Self {
        Self::Ids(ids)
    }
}

/// Create a repository with an empty version 0.
#[instrument(skip(ctx))]
pub async fn create_repository(ctx: &Context, name: &str) -> Result<(Repository, RepositoryVersion)> {
    ctx.store.create_repository(name).await.or_raise(|| ErrorKind::Store)
}

/// Delete a repository version.
///
/// Deleting a version that does not exist succeeds, so retries are safe. The
/// last complete version of a repository cannot be deleted.
#[instrument(skip(ctx), fields(version = %version_id))]
pub async fn delete_version(ctx: &Context, version_id: RepositoryVersionId) -> Result<()> {
    let mut tx = ctx.store.begin().await.or_raise(|| ErrorKind::Store)?;
    let Some(version) = tx.get_version(version_id).await.or_raise(|| ErrorKind::Store)? else {
        info!("repository version not found, nothing to delete");
        return Ok(());
    };
    if version.complete {
        let complete = tx.count_complete_versions(version.repository_id).await.or_raise(|| ErrorKind::Store)?;
        if complete <= 1 {
            exn::bail!(ErrorKind::LastVersion);
        }
    }
    info!(repository = %version.repository_id, number = version.number, "deleting repository version");
    tx.delete_version(&version).await.or_raise(|| ErrorKind::Store)?;
    tx.commit().await.or_raise(|| ErrorKind::Store)
}

/// Create a new version of `repository`: start from `base` (the latest
/// version when `None`), remove `remove`, then add `add`.
///
/// Removing before adding means an id in both ends up in the new version.
/// Every referenced content id must exist; on any validation failure nothing
/// is written.
#[instrument(skip(ctx, add, remove), fields(repository = %repository, add = add.len()))]
pub async fn add_and_remove(
    ctx: &Context,
    repository: RepositoryId,
    add: &[ContentId],
    remove: ContentSelection,
    base: Option<RepositoryVersionId>,
) -> Result<RepositoryVersion> {
    let mut tx = ctx.store.begin().await.or_raise(|| ErrorKind::Store)?;
    let repo = tx
        .get_repository(repository)
        .await
        .or_raise(|| ErrorKind::Store)?
        .ok_or_raise(|| ErrorKind::RepositoryNotFound(repository.to_string()))?;
    let latest = tx.latest_version(repo.id).await.or_raise(|| ErrorKind::Store)?;
    let base = match base {
        Some(id) => match tx.get_version(id).await.or_raise(|| ErrorKind::Store)? {
            Some(version) if version.repository_id == repo.id && version.complete => Some(version),
            _ => exn::bail!(ErrorKind::InvalidBaseVersion(id)),
        },
        None => latest.clone(),
    };

    let remove = match remove {
        ContentSelection::Ids(ids) => ids,
        ContentSelection::All => match &latest {
            Some(latest) => tx.version_content(latest).await.or_raise(|| ErrorKind::Store)?,
            None => Vec::new(),
        },
    };
    let referenced: Vec<ContentId> = add.iter().chain(&remove).copied().collect();
    let unknown = tx.missing_content(&referenced).await.or_raise(|| ErrorKind::Store)?;
    if !unknown.is_empty() {
        exn::bail!(ErrorKind::UnknownContent(unknown));
    }

    let version = tx.create_version(repo.id, base.as_ref().map(|v| v.id)).await.or_raise(|| ErrorKind::Store)?;
    if let Some(base) = &base {
        if latest.as_ref().is_some_and(|latest| latest.id != base.id) {
            // Changes apply on top of the current content set; rewind it to
            // the base first.
            let current: BTreeSet<ContentId> =
                tx.current_content(repo.id).await.or_raise(|| ErrorKind::Store)?.into_iter().collect();
            let wanted: BTreeSet<ContentId> =
                tx.version_content(base).await.or_raise(|| ErrorKind::Store)?.into_iter().collect();
            let stale: Vec<ContentId> = current.difference(&wanted).copied().collect();
            let restored: Vec<ContentId> = wanted.difference(&current).copied().collect();
            tx.remove_content(&version, &stale).await.or_raise(|| ErrorKind::Store)?;
            tx.add_content(&version, &restored).await.or_raise(|| ErrorKind::Store)?;
        }
    }
    tx.remove_content(&version, &remove).await.or_raise(|| ErrorKind::Store)?;
    tx.add_content(&version, add).await.or_raise(|| ErrorKind::Store)?;
    tx.finish_version(version.id).await.or_raise(|| ErrorKind::Store)?;
    tx.commit().await.or_raise(|| ErrorKind::Store)?;

    info!(number = version.number, "created repository version");
    Ok(RepositoryVersion { complete: true, ..version })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::MockDownloader;
    use ferry_db::{Database, FileContent, Store};
    use ferry_storage::backend::MockBackend;
    use rstest::rstest;
    use std::sync::Arc;

    async fn context() -> Context {
        let store = Store::from(&Database::connect_in_memory().await.unwrap());
        Context::new(store, Arc::new(MockBackend::default()), Arc::new(MockDownloader::new()))
    }

    async fn content(ctx: &Context, count: usize) -> Vec<ContentId> {
        let mut tx = ctx.store.begin().await.unwrap();
        let mut ids = Vec::new();
        for i in 0..count {
            let unit = FileContent::new(format!("{i}.txt"), format!("digest-{i}"));
            ids.push(tx.insert_content(&unit).await.unwrap().unwrap().id);
        }
        tx.commit().await.unwrap();
        ids
    }

    async fn content_of(ctx: &Context, version: &RepositoryVersion) -> Vec<ContentId> {
        ctx.store.version_content(version.id).await.unwrap()
    }

    #[rstest]
    #[case::star(&["*"], ContentSelection::All)]
    #[case::star_among_ids(&["1", "*"], ContentSelection::All)]
    #[case::ids(&["1", " 2 "], ContentSelection::Ids(vec![ContentId(1), ContentId(2)]))]
    #[case::empty(&[], ContentSelection::Ids(vec![]))]
    fn test_parse_selection(#[case] values: &[&str], #[case] expected: ContentSelection) {
        assert_eq!(ContentSelection::parse(values).unwrap(), expected);
    }

    #[test]
    fn test_parse_invalid_id() {
        let err = ContentSelection::parse(&["12", "abc"]).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidContentId(id) if id == "abc"));
    }

    #[tokio::test]
    async fn test_deleted_version_numbers_are_not_reused() {
        let ctx = context().await;
        let c = content(&ctx, 3).await;
        let (repo, _) = create_repository(&ctx, "docs").await.unwrap();
        let v1 = add_and_remove(&ctx, repo.id, &[c[0]], vec![].into(), None).await.unwrap();
        let v2 = add_and_remove(&ctx, repo.id, &[c[1]], vec![].into(), None).await.unwrap();
        let v3 = add_and_remove(&ctx, repo.id, &[c[2]], vec![c[0]].into(), None).await.unwrap();

        delete_version(&ctx, v2.id).await.unwrap();

        let numbers: Vec<u64> = ctx.store.versions(repo.id).await.unwrap().iter().map(|v| v.number).collect();
        assert_eq!(numbers, [0, 1, 3]);
        assert_eq!(content_of(&ctx, &v1).await, vec![c[0]]);
        assert_eq!(content_of(&ctx, &v3).await, vec![c[1], c[2]]);

        let v4 = add_and_remove(&ctx, repo.id, &[], vec![].into(), None).await.unwrap();
        assert_eq!(v4.number, 4);
        assert_eq!(content_of(&ctx, &v4).await, vec![c[1], c[2]]);
    }

    #[tokio::test]
    async fn test_deleting_missing_version_is_a_no_op() {
        let ctx = context().await;
        delete_version(&ctx, RepositoryVersionId(404)).await.unwrap();
        delete_version(&ctx, RepositoryVersionId(404)).await.unwrap();
    }

    #[tokio::test]
    async fn test_last_version_cannot_be_deleted() {
        let ctx = context().await;
        let (repo, v0) = create_repository(&ctx, "docs").await.unwrap();
        let err = delete_version(&ctx, v0.id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::LastVersion));
        assert_eq!(ctx.store.versions(repo.id).await.unwrap(), vec![v0]);
    }

    #[tokio::test]
    async fn test_remove_happens_before_add() {
        let ctx = context().await;
        let c = content(&ctx, 1).await;
        let (repo, _) = create_repository(&ctx, "docs").await.unwrap();
        add_and_remove(&ctx, repo.id, &[c[0]], vec![].into(), None).await.unwrap();

        let version = add_and_remove(&ctx, repo.id, &[c[0]], vec![c[0]].into(), None).await.unwrap();
        assert_eq!(content_of(&ctx, &version).await, vec![c[0]]);

        // Also when the content was not there to begin with.
        let (other, _) = create_repository(&ctx, "other").await.unwrap();
        let version = add_and_remove(&ctx, other.id, &[c[0]], vec![c[0]].into(), None).await.unwrap();
        assert_eq!(content_of(&ctx, &version).await, vec![c[0]]);
    }

    #[tokio::test]
    async fn test_remove_all() {
        let ctx = context().await;
        let c = content(&ctx, 3).await;
        let (repo, _) = create_repository(&ctx, "docs").await.unwrap();
        let before = add_and_remove(&ctx, repo.id, &[c[0], c[1]], vec![].into(), None).await.unwrap();
        let after = add_and_remove(&ctx, repo.id, &[c[2]], ContentSelection::All, None).await.unwrap();
        assert_eq!(content_of(&ctx, &after).await, vec![c[2]]);
        assert_eq!(content_of(&ctx, &before).await, vec![c[0], c[1]]);
    }

    #[tokio::test]
    async fn test_unknown_content_changes_nothing() {
        let ctx = context().await;
        let c = content(&ctx, 1).await;
        let (repo, v0) = create_repository(&ctx, "docs").await.unwrap();
        let err = add_and_remove(&ctx, repo.id, &[c[0], ContentId(999)], vec![].into(), None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownContent(ids) if *ids == [ContentId(999)]));

        assert_eq!(ctx.store.versions(repo.id).await.unwrap(), vec![v0]);
        assert_eq!(ctx.store.get_repository(repo.id).await.unwrap().unwrap().next_version, 1);
    }

    #[tokio::test]
    async fn test_unknown_repository() {
        let ctx = context().await;
        let err = add_and_remove(&ctx, RepositoryId(7), &[], vec![].into(), None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::RepositoryNotFound(_)));
    }

    #[tokio::test]
    async fn test_new_version_from_older_base() {
        let ctx = context().await;
        let c = content(&ctx, 3).await;
        let (repo, _) = create_repository(&ctx, "docs").await.unwrap();
        let v1 = add_and_remove(&ctx, repo.id, &[c[0]], vec![].into(), None).await.unwrap();
        let v2 = add_and_remove(&ctx, repo.id, &[c[1]], vec![c[0]].into(), None).await.unwrap();

        let v3 = add_and_remove(&ctx, repo.id, &[c[2]], vec![].into(), Some(v1.id)).await.unwrap();
        assert_eq!(v3.base_version_id, Some(v1.id));
        assert_eq!(content_of(&ctx, &v3).await, vec![c[0], c[2]]);
        assert_eq!(content_of(&ctx, &v2).await, vec![c[1]]);
    }

    #[tokio::test]
    async fn test_base_from_another_repository_is_rejected() {
        let ctx = context().await;
        let (repo, _) = create_repository(&ctx, "docs").await.unwrap();
        let (_, foreign) = create_repository(&ctx, "other").await.unwrap();
        let err = add_and_remove(&ctx, repo.id, &[], vec![].into(), Some(foreign.id)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidBaseVersion(id) if *id == foreign.id));
    }
}
