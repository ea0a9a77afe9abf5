//! Declarative content ingestion.
//!
//! Upstream code describes the content it found as [`DeclarativeContent`] and
//! sends it through a [`Pipeline`]. The standard content pipeline
//! ([`Pipeline::content`]) first swaps every unit that is already stored for
//! the stored record ([`QueryExistingContent`]), then saves the rest along
//! with their files and provenance ([`ContentSaver`]).

mod declarative;
pub mod error;
mod resolve;
mod save;
pub mod stage;

pub use crate::declarative::{ArtifactRef, ContentRef, DeclarativeArtifact, DeclarativeContent};
pub use crate::resolve::QueryExistingContent;
pub use crate::save::ContentSaver;
pub use crate::stage::{Message, Pipeline, RunningPipeline, Stage};
use ferry_db::{ContentTypes, Store};

impl Pipeline<DeclarativeContent> {
    /// `QueryExistingContent -> ContentSaver`.
    pub fn content(store: Store, types: ContentTypes) -> Self {
        Self::new()
            .then(QueryExistingContent::new(store.clone(), types))
            .then(ContentSaver::new(store))
    }
}
