//! Long-running operations on repositories and their artifacts.
//!
//! - [`add_and_remove`] and [`delete_version`] manage repository versions.
//! - [`repair_all_artifacts`] and [`repair_version`] find stored files that
//!   are missing or corrupted and download them again.
//!
//! Everything a task needs from the outside world is passed in a
//! [`Context`], built either by hand or from a [`ferry_config::Config`].

mod context;
pub mod download;
pub mod error;
pub mod progress;
mod repair;
mod repository;

pub use crate::context::{Context, RepairOptions};
pub use crate::repair::{RepairSummary, repair_all_artifacts, repair_version};
pub use crate::repository::{ContentSelection, add_and_remove, create_repository, delete_version};
