//! Layered configuration.
//!
//! Values are resolved in order, later sources overriding earlier ones:
//! 1. Built-in defaults ([`Config::default`]).
//! 2. An optional configuration file, parsed according to its extension
//!    (`.toml`, `.yaml`/`.yml` or `.json`; anything else is read as TOML).
//! 3. Environment variables prefixed with `FERRY_`. Nested keys are separated
//!    by a double underscore, e.g. `FERRY_REPAIR__MAX_CONCURRENT_REPAIRS=8`.

mod error;

pub use crate::error::{Error, ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const ENV_PREFIX: &str = "FERRY_";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "ferry")
}

/// Directory for the database and stored artifacts when nothing else is
/// configured.
fn data_dir() -> PathBuf {
    project_dirs().map_or_else(|| std::env::temp_dir().join("ferry"), |dirs| dirs.data_dir().to_path_buf())
}

/// `<config dir>/ferry.toml`, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("ferry.toml"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub download: DownloadConfig,
    pub repair: RepairConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file; created on first use.
    pub path: PathBuf,
    /// Upper bound on pooled connections. Unset uses the store's default.
    pub max_connections: Option<u32>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("ferry.sqlite3"),
            max_connections: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of artifact storage. Must be absolute.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("media"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Where downloads are staged before they are verified. Defaults to the
    /// system temporary directory.
    pub temp_dir: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            connect_timeout_secs: 30,
            user_agent: concat!("ferry/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Repairs (each a download) allowed in flight at once.
    pub max_concurrent_repairs: usize,
    /// Files hashed at once while looking for corruption.
    pub checksum_workers: usize,
    pub verify_checksums: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_concurrent_repairs: 5,
            checksum_workers: 2,
            verify_checksums: true,
        }
    }
}

impl Config {
    /// Resolve the configuration from defaults, `file` (if given) and the
    /// environment, then validate it.
    ///
    /// A file that is given explicitly must exist.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = file {
            if !path.is_file() {
                exn::bail!(ErrorKind::FileNotFound(path.to_path_buf()));
            }
            debug!(path = %path.display(), "loading configuration file");
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the rest of ferry cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.storage.root.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!(
                "storage.root must be an absolute path, got {}",
                self.storage.root.display()
            )));
        }
        if self.repair.max_concurrent_repairs == 0 {
            exn::bail!(ErrorKind::Invalid("repair.max_concurrent_repairs must be at least 1".to_string()));
        }
        if self.repair.checksum_workers == 0 {
            exn::bail!(ErrorKind::Invalid("repair.checksum_workers must be at least 1".to_string()));
        }
        if self.database.max_connections == Some(0) {
            exn::bail!(ErrorKind::Invalid("database.max_connections must be at least 1".to_string()));
        }
        Ok(())
    }
}
