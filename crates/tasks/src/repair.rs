//! Artifact repair.
//!
//! Every stored artifact in scope is checked for existence and, optionally,
//! for a sha256 mismatch. Missing or corrupted files are downloaded again from
//! the remotes that provided them. A file no remote can restore is removed
//! from storage.

use crate::context::Context;
use crate::download::Download;
use crate::error::{ErrorKind, Result};
use crate::progress::{ProgressReport, ProgressState};
use exn::{OptionExt, ResultExt};
use ferry_db::checksum::sha256_reader;
use ferry_db::{Artifact, ArtifactScope, LinkedArtifact, RepositoryVersionId};
use ferry_storage::StorageBackend;
use futures::{StreamExt, stream};
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, instrument, warn};

/// Counts reported by a repair run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepairSummary {
    pub missing: u64,
    pub corrupted: u64,
    pub repaired: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Valid,
    Missing,
    Corrupted,
}

/// Check and repair every stored artifact.
pub async fn repair_all_artifacts(ctx: &Context, verify_checksums: bool) -> Result<RepairSummary> {
    repair(ctx, ArtifactScope::All, verify_checksums).await
}

/// Check and repair the artifacts of content in one repository version.
pub async fn repair_version(
    ctx: &Context,
    version_id: RepositoryVersionId,
    verify_checksums: bool,
) -> Result<RepairSummary> {
    ctx.store
        .get_version(version_id)
        .await
        .or_raise(|| ErrorKind::Store)?
        .ok_or_raise(|| ErrorKind::VersionNotFound(version_id))?;
    repair(ctx, ArtifactScope::Version(version_id), verify_checksums).await
}

#[instrument(skip(ctx), fields(storage = ctx.storage.name()))]
async fn repair(ctx: &Context, scope: ArtifactScope, verify_checksums: bool) -> Result<RepairSummary> {
    let artifacts = ctx.store.repairable_artifacts(scope).await.or_raise(|| ErrorKind::Store)?;
    debug!(count = artifacts.len(), "checking artifacts");

    let missing = ProgressReport::open(ctx.progress.clone(), "repair.missing", "Identify missing units");
    let corrupted = ProgressReport::open(ctx.progress.clone(), "repair.corrupted", "Identify corrupted units");
    let repaired = ProgressReport::open(ctx.progress.clone(), "repair.repaired", "Repair corrupted units");

    let storage = &*ctx.storage;
    let mut checks = stream::iter(artifacts)
        .map(|linked| async move {
            let health = classify(storage, &linked.artifact, verify_checksums).await;
            (linked, health)
        })
        .buffer_unordered(ctx.repair.checksum_workers.max(1));

    // Checks keep running while repairs wait for a free slot.
    let max_repairs = ctx.repair.max_concurrent_repairs.max(1);
    let mut invalid = VecDeque::new();
    let mut repairs = JoinSet::new();
    let mut checked = false;
    loop {
        tokio::select! {
            next = checks.next(), if !checked => match next {
                Some((_, Health::Valid)) => {},
                Some((linked, Health::Missing)) => {
                    missing.increment();
                    invalid.push_back(linked);
                },
                Some((linked, Health::Corrupted)) => {
                    corrupted.increment();
                    invalid.push_back(linked);
                },
                None => checked = true,
            },
            Some(joined) = repairs.join_next(), if !repairs.is_empty() => record(joined, &repaired),
            else => break,
        }
        while repairs.len() < max_repairs {
            let Some(linked) = invalid.pop_front() else {
                break;
            };
            let ctx = ctx.clone();
            repairs.spawn(async move { repair_content_artifact(&ctx, &linked).await });
        }
    }

    let summary = RepairSummary {
        missing: missing.done(),
        corrupted: corrupted.done(),
        repaired: repaired.done(),
    };
    for report in [&missing, &corrupted, &repaired] {
        report.close(ProgressState::Completed);
    }
    info!(summary.missing, summary.corrupted, summary.repaired, "repair finished");
    Ok(summary)
}

/// Count a finished repair. A failed repair leaves its artifact unrepaired
/// and never stops the run.
fn record(joined: std::result::Result<Result<bool>, JoinError>, repaired: &ProgressReport) {
    match joined {
        Ok(Ok(true)) => {
            repaired.increment();
        },
        Ok(Ok(false)) => {},
        Ok(Err(err)) => warn!(error = ?err, "artifact repair failed"),
        Err(err) => warn!(error = ?err, "artifact repair task did not finish"),
    }
}

/// A file that cannot be checked is treated as corrupted, so that a repair
/// is attempted.
async fn classify(storage: &dyn StorageBackend, artifact: &Artifact, verify_checksums: bool) -> Health {
    let file = artifact.file.display();
    match storage.exists(&artifact.file).await {
        Ok(true) => {},
        Ok(false) => return Health::Missing,
        Err(err) => {
            warn!(%file, error = ?err, "cannot check artifact file");
            return Health::Corrupted;
        },
    }
    if !verify_checksums {
        return Health::Valid;
    }
    let reader = match storage.reader(&artifact.file).await {
        Ok(reader) => reader,
        // Removed between the two calls.
        Err(err) if err.is_not_found() => return Health::Missing,
        Err(err) => {
            warn!(%file, error = ?err, "cannot open artifact file");
            return Health::Corrupted;
        },
    };
    let sha256 = match tokio::task::spawn_blocking(move || sha256_reader(reader)).await {
        Ok(Ok(sha256)) => sha256,
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => return Health::Missing,
        Ok(Err(err)) => {
            warn!(%file, error = ?err, "cannot read artifact file");
            return Health::Corrupted;
        },
        Err(err) => {
            warn!(%file, error = ?err, "hashing artifact file did not finish");
            return Health::Corrupted;
        },
    };
    if sha256 == artifact.sha256() {
        Health::Valid
    } else {
        debug!(%file, expected = artifact.sha256(), actual = %sha256, "checksum mismatch");
        Health::Corrupted
    }
}

/// Restore one artifact from the first remote that serves the expected bytes.
///
/// Remotes are tried in the order their provenance was recorded. Returns
/// `false` when none of them worked, after removing whatever is left of the
/// file.
#[instrument(skip_all, fields(path = %linked.relative_path, sha256 = linked.artifact.sha256()))]
async fn repair_content_artifact(ctx: &Context, linked: &LinkedArtifact) -> Result<bool> {
    let sources = ctx.store.remote_artifacts(linked.content_artifact_id).await.or_raise(|| ErrorKind::Store)?;
    for source in &sources {
        let Some(remote) = ctx.store.get_remote(source.remote_id).await.or_raise(|| ErrorKind::Store)? else {
            warn!(remote = %source.remote_id, "remote no longer exists");
            continue;
        };
        let download = match ctx.downloader.fetch(&source.url, &remote).await {
            Ok(download) => download,
            Err(err) => {
                warn!(url = %source.url, error = ?err, "download failed, trying the next source");
                continue;
            },
        };
        if download.checksums.sha256 != linked.artifact.sha256() {
            warn!(
                url = %source.url,
                actual = %download.checksums.sha256,
                "downloaded file does not match, trying the next source"
            );
            continue;
        }
        if let Err(err) = store_download(&*ctx.storage, &linked.artifact.file, download).await {
            warn!(url = %source.url, error = ?err, "storing the download failed, trying the next source");
            continue;
        }
        info!(url = %source.url, remote = %remote.name, "artifact repaired");
        return Ok(true);
    }

    match ctx.storage.delete(&linked.artifact.file).await {
        Ok(()) => {},
        Err(err) if err.is_not_found() => {},
        Err(err) => warn!(error = ?err, "cannot remove unrepairable artifact file"),
    }
    warn!(sources = sources.len(), "no source could repair the artifact");
    Ok(false)
}

async fn store_download(storage: &dyn StorageBackend, path: &Path, download: Download) -> Result<()> {
    let mut writer = storage.writer(path).await.or_raise(|| ErrorKind::Storage)?;
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut file = std::fs::File::open(&download.path)?;
        std::io::copy(&mut file, &mut writer)?;
        writer.flush()
    })
    .await
    .or_raise(|| ErrorKind::Panicked)?
    .or_raise(|| ErrorKind::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RepairOptions;
    use crate::download::MockDownloader;
    use crate::progress::{ProgressEvent, RecordingSink};
    use crate::repository::{add_and_remove, create_repository};
    use ferry_db::checksum::checksums;
    use ferry_db::{
        ContentId, Database, FileContent, NewArtifact, NewContentArtifact, NewRemote, NewRemoteArtifact, Store,
    };
    use async_trait::async_trait;
    use ferry_storage::backend::{BoxSyncRead, BoxSyncWrite, MockBackend};
    use ferry_storage::error::{ErrorKind as StorageErrorKind, Result as StorageResult};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness<S = MockBackend> {
        ctx: Context,
        storage: Arc<S>,
        downloader: Arc<MockDownloader>,
        sink: Arc<RecordingSink>,
    }

    async fn harness(downloader: MockDownloader) -> Harness {
        harness_on(MockBackend::default(), downloader).await
    }

    async fn harness_on<S: StorageBackend + 'static>(storage: S, downloader: MockDownloader) -> Harness<S> {
        let store = Store::from(&Database::connect_in_memory().await.unwrap());
        let storage = Arc::new(storage);
        let downloader = Arc::new(downloader);
        let sink = Arc::new(RecordingSink::default());
        let ctx = Context::new(store, storage.clone(), downloader.clone()).with_progress(sink.clone());
        Harness {
            ctx,
            storage,
            downloader,
            sink,
        }
    }

    /// Storage that refuses to open one path for reading and another for
    /// writing.
    #[derive(Default)]
    struct Unreliable {
        inner: MockBackend,
        unreadable: Option<PathBuf>,
        unwritable: Option<PathBuf>,
    }

    #[async_trait]
    impl StorageBackend for Unreliable {
        fn name(&self) -> &str {
            "unreliable"
        }

        async fn exists(&self, path: &Path) -> StorageResult<bool> {
            self.inner.exists(path).await
        }

        async fn read(&self, path: &Path) -> StorageResult<Vec<u8>> {
            self.inner.read(path).await
        }

        async fn reader(&self, path: &Path) -> StorageResult<BoxSyncRead> {
            if self.unreadable.as_deref() == Some(path) {
                exn::bail!(StorageErrorKind::PermissionDenied(path.to_path_buf()));
            }
            self.inner.reader(path).await
        }

        async fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
            self.inner.write(path, data).await
        }

        async fn writer(&self, path: &Path) -> StorageResult<BoxSyncWrite> {
            if self.unwritable.as_deref() == Some(path) {
                exn::bail!(StorageErrorKind::PermissionDenied(path.to_path_buf()));
            }
            self.inner.writer(path).await
        }

        async fn delete(&self, path: &Path) -> StorageResult<()> {
            self.inner.delete(path).await
        }
    }

    /// Record a content unit owning one artifact with `body`, downloadable
    /// from each of `urls` in order.
    async fn artifact(ctx: &Context, name: &str, body: &[u8], urls: &[&str]) -> (ContentId, Artifact) {
        let store = &ctx.store;
        let new = NewArtifact::content_addressed(body.len() as u64, checksums(body)).unwrap();
        let artifact = store.save_artifact(&new).await.unwrap();
        let mut remotes = Vec::new();
        for url in urls {
            let host = url.trim_start_matches("https://").split('/').next().unwrap();
            remotes.push(store.save_remote(&NewRemote::new(host, format!("https://{host}/"))).await.unwrap());
        }

        let mut tx = store.begin().await.unwrap();
        let content = tx.insert_content(&FileContent::new(name, artifact.sha256())).await.unwrap().unwrap();
        let link = NewContentArtifact {
            content_id: content.id,
            artifact_id: Some(artifact.id),
            relative_path: name.to_string(),
        };
        let ca = tx.bulk_insert_content_artifacts(vec![link]).await.unwrap().remove(0);
        let provenance = urls
            .iter()
            .zip(&remotes)
            .map(|(url, remote)| NewRemoteArtifact {
                content_artifact_id: ca.id,
                remote_id: remote.id,
                url: url.to_string(),
                size: Some(body.len() as u64),
                digests: checksums(body).into(),
            })
            .collect();
        tx.bulk_insert_remote_artifacts(provenance).await.unwrap();
        tx.commit().await.unwrap();
        (content.id, artifact)
    }

    #[tokio::test]
    async fn test_later_source_repairs_corrupted_file() {
        let h = harness(
            MockDownloader::new()
                .with_failure("https://a/hello")
                .with_body("https://b/hello", "tampered")
                .with_body("https://c/hello", "hello"),
        )
        .await;
        let urls = ["https://a/hello", "https://b/hello", "https://c/hello"];
        let (_, artifact) = artifact(&h.ctx, "hello.txt", b"hello", &urls).await;
        h.storage.write(&artifact.file, b"hellx").await.unwrap();

        let summary = repair_all_artifacts(&h.ctx, true).await.unwrap();
        assert_eq!(summary, RepairSummary { missing: 0, corrupted: 1, repaired: 1 });
        assert_eq!(h.storage.contents(&artifact.file).unwrap(), b"hello");
        assert_eq!(h.downloader.requests(), ["https://a/hello", "https://b/hello", "https://c/hello"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_restored() {
        let h = harness(MockDownloader::new().with_body("https://a/hello", "hello")).await;
        let (_, artifact) = artifact(&h.ctx, "hello.txt", b"hello", &["https://a/hello"]).await;

        let summary = repair_all_artifacts(&h.ctx, true).await.unwrap();
        assert_eq!(summary, RepairSummary { missing: 1, corrupted: 0, repaired: 1 });
        assert_eq!(h.storage.contents(&artifact.file).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_missing_file_without_sources() {
        let h = harness(MockDownloader::new()).await;
        artifact(&h.ctx, "hello.txt", b"hello", &[]).await;

        let summary = repair_all_artifacts(&h.ctx, true).await.unwrap();
        assert_eq!(summary, RepairSummary { missing: 1, corrupted: 0, repaired: 0 });
        assert!(h.downloader.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unrepairable_corrupted_file_is_removed() {
        let h = harness(MockDownloader::new().with_failure("https://a/hello")).await;
        let (_, artifact) = artifact(&h.ctx, "hello.txt", b"hello", &["https://a/hello"]).await;
        h.storage.write(&artifact.file, b"hellx").await.unwrap();

        let summary = repair_all_artifacts(&h.ctx, true).await.unwrap();
        assert_eq!(summary, RepairSummary { missing: 0, corrupted: 1, repaired: 0 });
        assert_eq!(h.storage.contents(&artifact.file), None);
    }

    #[tokio::test]
    async fn test_corruption_is_ignored_without_verification() {
        let h = harness(MockDownloader::new().with_body("https://a/hello", "hello")).await;
        let (_, artifact) = artifact(&h.ctx, "hello.txt", b"hello", &["https://a/hello"]).await;
        h.storage.write(&artifact.file, b"hellx").await.unwrap();

        let summary = repair_all_artifacts(&h.ctx, false).await.unwrap();
        assert_eq!(summary, RepairSummary::default());
        assert_eq!(h.storage.contents(&artifact.file).unwrap(), b"hellx");
        assert!(h.downloader.requests().is_empty());
    }

    #[tokio::test]
    async fn test_intact_files_are_left_alone() {
        let h = harness(MockDownloader::new()).await;
        let (_, artifact) = artifact(&h.ctx, "hello.txt", b"hello", &["https://a/hello"]).await;
        h.storage.write(&artifact.file, b"hello").await.unwrap();

        assert_eq!(repair_all_artifacts(&h.ctx, true).await.unwrap(), RepairSummary::default());
        assert!(h.downloader.requests().is_empty());
    }

    #[tokio::test]
    async fn test_version_scope() {
        let h = harness(MockDownloader::new()).await;
        let (inside, _) = artifact(&h.ctx, "in.txt", b"in", &[]).await;
        artifact(&h.ctx, "out.txt", b"out", &[]).await;
        let (repo, _) = create_repository(&h.ctx, "docs").await.unwrap();
        let version = add_and_remove(&h.ctx, repo.id, &[inside], vec![].into(), None).await.unwrap();

        let summary = repair_version(&h.ctx, version.id, true).await.unwrap();
        assert_eq!(summary.missing, 1);
        assert_eq!(repair_all_artifacts(&h.ctx, true).await.unwrap().missing, 2);
    }

    #[tokio::test]
    async fn test_unknown_version() {
        let h = harness(MockDownloader::new()).await;
        let err = repair_version(&h.ctx, RepositoryVersionId(42), true).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::VersionNotFound(_)));
        assert!(h.sink.closes().is_empty());
    }

    #[tokio::test]
    async fn test_progress_reports_are_completed() {
        let h = harness(MockDownloader::new().with_body("https://a/two", "two")).await;
        artifact(&h.ctx, "one.txt", b"one", &[]).await;
        artifact(&h.ctx, "two.txt", b"two", &["https://a/two"]).await;

        repair_all_artifacts(&h.ctx, true).await.unwrap();
        let mut closes = h.sink.closes();
        closes.sort();
        assert_eq!(
            closes,
            vec![
                ("repair.corrupted", 0, ProgressState::Completed),
                ("repair.missing", 2, ProgressState::Completed),
                ("repair.repaired", 1, ProgressState::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_unreadable_file_does_not_stop_the_run() {
        let downloader = MockDownloader::new().with_body("https://a/good", "good");
        let bad = NewArtifact::content_addressed(3, checksums(b"bad")).unwrap().file;
        let storage = Unreliable {
            unreadable: Some(bad.clone()),
            ..Unreliable::default()
        };
        let h = harness_on(storage, downloader).await;
        artifact(&h.ctx, "bad.txt", b"bad", &[]).await;
        let (_, good) = artifact(&h.ctx, "good.txt", b"good", &["https://a/good"]).await;
        h.storage.inner.write(&bad, b"bad").await.unwrap();

        let summary = repair_all_artifacts(&h.ctx, true).await.unwrap();
        assert_eq!(summary, RepairSummary { missing: 1, corrupted: 1, repaired: 1 });
        assert_eq!(h.storage.inner.contents(&good.file).unwrap(), b"good");
    }

    #[tokio::test]
    async fn test_failed_write_back_does_not_stop_the_run() {
        let downloader =
            MockDownloader::new().with_body("https://a/bad", "bad").with_body("https://a/good", "good");
        let bad = NewArtifact::content_addressed(3, checksums(b"bad")).unwrap().file;
        let storage = Unreliable {
            unwritable: Some(bad.clone()),
            ..Unreliable::default()
        };
        let h = harness_on(storage, downloader).await;
        artifact(&h.ctx, "bad.txt", b"bad", &["https://a/bad"]).await;
        let (_, good) = artifact(&h.ctx, "good.txt", b"good", &["https://a/good"]).await;

        let summary = repair_all_artifacts(&h.ctx, true).await.unwrap();
        assert_eq!(summary, RepairSummary { missing: 2, corrupted: 0, repaired: 1 });
        assert_eq!(h.storage.inner.contents(&bad), None);
        assert_eq!(h.storage.inner.contents(&good.file).unwrap(), b"good");
        let mut closes = h.sink.closes();
        closes.sort();
        assert!(closes.iter().all(|(_, _, state)| *state == ProgressState::Completed));
    }

    #[tokio::test]
    async fn test_checks_continue_while_repairs_are_capped() {
        let mut downloader = MockDownloader::new().with_delay(Duration::from_millis(20));
        for i in 0..4 {
            downloader = downloader.with_body(format!("https://a/{i}"), format!("file {i}"));
        }
        let h = harness(downloader).await;
        let ctx = h.ctx.clone().with_repair_options(RepairOptions {
            max_concurrent_repairs: 1,
            checksum_workers: 1,
            verify_checksums: true,
        });
        for i in 0..4 {
            let url = format!("https://a/{i}");
            artifact(&ctx, &format!("{i}.txt"), format!("file {i}").as_bytes(), &[url.as_str()]).await;
        }

        let summary = repair_all_artifacts(&ctx, true).await.unwrap();
        assert_eq!(summary, RepairSummary { missing: 4, corrupted: 0, repaired: 4 });
        assert_eq!(h.downloader.max_in_flight(), 1);
        // Every artifact was classified before the first repair could finish.
        let events = h.sink.events.lock().unwrap();
        let last_missing = events
            .iter()
            .rposition(|event| matches!(event, ProgressEvent::Incremented("repair.missing", _)))
            .unwrap();
        let first_repaired = events
            .iter()
            .position(|event| matches!(event, ProgressEvent::Incremented("repair.repaired", _)))
            .unwrap();
        assert!(last_missing < first_repaired);
    }

    #[tokio::test]
    async fn test_concurrent_repairs_are_capped() {
        let mut downloader = MockDownloader::new().with_delay(Duration::from_millis(20));
        for i in 0..6 {
            downloader = downloader.with_body(format!("https://a/{i}"), format!("file {i}"));
        }
        let h = harness(downloader).await;
        let ctx = h.ctx.clone().with_repair_options(RepairOptions {
            max_concurrent_repairs: 2,
            checksum_workers: 3,
            verify_checksums: true,
        });
        for i in 0..6 {
            let url = format!("https://a/{i}");
            artifact(&ctx, &format!("{i}.txt"), format!("file {i}").as_bytes(), &[url.as_str()]).await;
        }

        let summary = repair_all_artifacts(&ctx, true).await.unwrap();
        assert_eq!(summary.repaired, 6);
        assert!(h.downloader.max_in_flight() <= 2);
        assert!(h.downloader.max_in_flight() >= 1);
    }
}
