use crate::declarative::{ArtifactRef, ContentRef, DeclarativeContent};
use crate::error::{ErrorKind, Result};
use crate::stage::Stage;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use ferry_db::checksum::Digests;
use ferry_db::{ContentId, ContentRecord, NewContentArtifact, NewRemoteArtifact, RemoteId, Store};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Saves unsaved candidates together with their content artifacts and
/// provenance.
///
/// Each batch is written in one transaction, so either every new unit of the
/// batch is visible with all of its links, or none is. Units that were
/// already resolved to a stored record pass through without any write.
pub struct ContentSaver {
    store: Store,
}

impl ContentSaver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

/// What happened to the unsaved candidates of one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BatchStats {
    /// New units written by this batch.
    inserted: usize,
    /// Candidates repeating a unit inserted earlier in the same batch.
    repeated: usize,
    /// Units another writer saved after they were resolved.
    concurrent: usize,
}

/// Provenance waiting for the id of the content artifact it describes.
struct PendingProvenance {
    remote_id: RemoteId,
    url: String,
    size: Option<u64>,
    digests: Digests,
}

#[async_trait]
impl Stage for ContentSaver {
    type Item = DeclarativeContent;

    fn name(&self) -> &'static str {
        "content_saver"
    }

    async fn process(&mut self, batch: Vec<DeclarativeContent>) -> Result<Vec<DeclarativeContent>> {
        let (batch, _) = self.save(batch).await?;
        Ok(batch)
    }
}

impl ContentSaver {
    async fn save(&self, mut batch: Vec<DeclarativeContent>) -> Result<(Vec<DeclarativeContent>, BatchStats)> {
        if batch.iter().all(|item| item.content.is_saved()) {
            return Ok((batch, BatchStats::default()));
        }

        let mut tx = self.store.begin().await.or_raise(|| ErrorKind::Store)?;
        let mut stats = BatchStats::default();
        let mut saved: Vec<(usize, ContentRecord)> = Vec::new();
        let mut inserted: HashSet<ContentId> = HashSet::new();
        let mut links = Vec::new();
        let mut pending: HashMap<(ContentId, String), PendingProvenance> = HashMap::new();

        for (index, item) in batch.iter().enumerate() {
            let ContentRef::Unsaved(unit) = &item.content else {
                continue;
            };
            let Some(record) = tx.insert_content(unit.as_ref()).await.or_raise(|| ErrorKind::Store)? else {
                // Already stored: its files are linked by whoever saved it.
                let key = unit.natural_key();
                let record = tx
                    .find_by_natural_keys(unit.content_type(), std::slice::from_ref(&key))
                    .await
                    .or_raise(|| ErrorKind::Store)?
                    .into_iter()
                    .next()
                    .ok_or_raise(|| ErrorKind::Store)?;
                if inserted.contains(&record.id) {
                    debug!(content_type = unit.content_type(), key = %key, "repeated candidate in batch");
                    stats.repeated += 1;
                } else {
                    warn!(content_type = unit.content_type(), key = %key, "content saved concurrently, reusing it");
                    stats.concurrent += 1;
                }
                saved.push((index, record));
                continue;
            };
            stats.inserted += 1;
            inserted.insert(record.id);
            for d_artifact in &item.d_artifacts {
                let artifact_id = match d_artifact.artifact() {
                    ArtifactRef::Stored(artifact) => Some(artifact.id),
                    ArtifactRef::Deferred { .. } => None,
                };
                links.push(NewContentArtifact {
                    content_id: record.id,
                    artifact_id,
                    relative_path: d_artifact.relative_path().to_string(),
                });
                pending.insert(
                    (record.id, d_artifact.relative_path().to_string()),
                    PendingProvenance {
                        remote_id: d_artifact.remote().id,
                        url: d_artifact.url().to_string(),
                        size: d_artifact.artifact().size(),
                        digests: d_artifact.artifact().digests(),
                    },
                );
            }
            saved.push((index, record));
        }

        let content_artifacts = tx.bulk_insert_content_artifacts(links).await.or_raise(|| ErrorKind::Store)?;
        // Inserted rows come back in no particular order; (content,
        // relative_path) is unique, so it identifies each one.
        let provenance: Vec<NewRemoteArtifact> = content_artifacts
            .into_iter()
            .filter_map(|ca| {
                let data = pending.remove(&(ca.content_id, ca.relative_path))?;
                Some(NewRemoteArtifact {
                    content_artifact_id: ca.id,
                    remote_id: data.remote_id,
                    url: data.url,
                    size: data.size,
                    digests: data.digests,
                })
            })
            .collect();
        tx.bulk_insert_remote_artifacts(provenance).await.or_raise(|| ErrorKind::Store)?;
        tx.commit().await.or_raise(|| ErrorKind::Store)?;

        debug!(
            batch = batch.len(),
            saved = stats.inserted,
            repeated = stats.repeated,
            concurrent = stats.concurrent,
            "batch saved"
        );
        for (index, record) in saved {
            batch[index].content = ContentRef::Saved(record);
        }
        Ok((batch, stats))
    }
}
