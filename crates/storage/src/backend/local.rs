//! Local filesystem storage backend.
//!
//! Files are stored below a configured root directory and accessed using
//! `tokio::fs` for async I/O.

use crate::backend::{BoxSyncRead, BoxSyncWrite};
use crate::error::{ErrorKind, Result};
use crate::{StorageBackend, path::validate as validate_path};
use async_trait::async_trait;
use std::fs::create_dir_all as sync_create_dir;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Writes into a hidden sibling of the destination and renames it into place
/// on the first `flush()`. Dropping an unflushed writer discards the data, and
/// an existing file stays untouched until then.
struct StagedWriter {
    file: std::fs::File,
    staging: PathBuf,
    destination: PathBuf,
    published: bool,
}

impl Write for StagedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if !self.published {
            self.file.sync_all()?;
            std::fs::rename(&self.staging, &self.destination)?;
            self.published = true;
        }
        Ok(())
    }
}

impl Drop for StagedWriter {
    fn drop(&mut self) {
        if !self.published {
            let _ = std::fs::remove_file(&self.staging);
        }
    }
}

/// Local filesystem storage backend.
///
/// All paths are relative to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use ferry_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("default", "/var/lib/ferry/media")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory that every artifact path is resolved against
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is not absolute or exists but is not a
    /// directory. A missing root directory is created.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Happens once during start-up, not worth an async constructor.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    /// Validates the relative path and joins it with the root directory.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn create_parent(&self, absolute: &Path, path: &Path) -> Result<()> {
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        let abs_path = self.absolute_path(path)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::new(file.into_std().await))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        self.create_parent(&abs_path, path).await?;
        Ok(fs::write(&abs_path, data).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite> {
        let abs_path = self.absolute_path(path)?;
        let Some(file_name) = abs_path.file_name().and_then(|name| name.to_str()) else {
            exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
        };
        let n = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
        let staging = abs_path.with_file_name(format!(".{file_name}.{}-{n}.partial", std::process::id()));
        self.create_parent(&abs_path, path).await?;
        let file = fs::File::create(&staging).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::new(StagedWriter {
            file: file.into_std().await,
            staging,
            destination: abs_path,
            published: false,
        }))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        tracing::debug!(backend = %self.name, path = %path.display(), "Deleting stored file");
        Ok(fs::remove_file(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }
}
