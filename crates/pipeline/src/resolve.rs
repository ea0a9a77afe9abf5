use crate::declarative::{ContentRef, DeclarativeContent};
use crate::error::{ErrorKind, Result};
use crate::stage::Stage;
use async_trait::async_trait;
use exn::ResultExt;
use ferry_db::{ContentTypes, NaturalKey, Store};
use std::collections::BTreeMap;
use tracing::debug;

/// Swaps candidates that are already stored for the stored record.
///
/// Candidates are grouped by content type and each group is looked up with a
/// single query per batch. Candidates with no stored counterpart are left
/// unsaved for [`ContentSaver`](crate::ContentSaver) to create.
pub struct QueryExistingContent {
    store: Store,
    types: ContentTypes,
}

impl QueryExistingContent {
    pub fn new(store: Store, types: ContentTypes) -> Self {
        Self { store, types }
    }

    /// Candidates to look up, by content type. Validates every candidate
    /// against the registry before anything is queried.
    fn group(&self, batch: &[DeclarativeContent]) -> Result<BTreeMap<String, Group>> {
        let mut groups: BTreeMap<String, Group> = BTreeMap::new();
        for (index, item) in batch.iter().enumerate() {
            let ContentRef::Unsaved(unit) = &item.content else {
                continue;
            };
            let content_type = unit.content_type();
            if !self.types.contains(content_type) {
                exn::bail!(ErrorKind::UnknownContentType(content_type.to_string()));
            }
            let fields = self.types.natural_key_fields(content_type).or_raise(|| ErrorKind::Store)?;
            let key = unit.natural_key();
            if key.is_empty() {
                continue;
            }
            let mut declared: Vec<&str> = key.fields().collect();
            let mut registered = fields.to_vec();
            declared.sort_unstable();
            registered.sort_unstable();
            if declared != registered {
                exn::bail!(ErrorKind::InvalidNaturalKey {
                    content_type: content_type.to_string(),
                    key: key.to_string(),
                });
            }
            groups
                .entry(content_type.to_string())
                .or_insert_with(|| Group { fields, candidates: Vec::new() })
                .candidates
                .push((index, key));
        }
        Ok(groups)
    }
}

struct Group {
    fields: &'static [&'static str],
    candidates: Vec<(usize, NaturalKey)>,
}

#[async_trait]
impl Stage for QueryExistingContent {
    type Item = DeclarativeContent;

    fn name(&self) -> &'static str {
        "query_existing_content"
    }

    async fn process(&mut self, mut batch: Vec<DeclarativeContent>) -> Result<Vec<DeclarativeContent>> {
        let groups = self.group(&batch)?;
        let mut resolved = 0usize;
        for (content_type, group) in groups {
            let keys: Vec<NaturalKey> = group.candidates.iter().map(|(_, key)| key.clone()).collect();
            let existing =
                self.store.find_by_natural_keys(&content_type, &keys).await.or_raise(|| ErrorKind::Store)?;
            for record in existing {
                for (index, key) in &group.candidates {
                    // The lookup may return more than was asked for; only an
                    // exact match on every natural-key field counts.
                    if key.matches_on(&record.natural_key, group.fields) {
                        batch[*index].content = ContentRef::Saved(record.clone());
                        resolved += 1;
                    }
                }
            }
        }
        debug!(batch = batch.len(), resolved, "resolved existing content");
        Ok(batch)
    }
}
