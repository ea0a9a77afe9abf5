//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, the byte-level interface
//! that artifact files are read from and written to. Only the local
//! filesystem ships as a real backend; other object stores can implement the
//! same trait.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::Result;
use async_trait::async_trait;
use std::io::{Read, Write};
use std::path::Path;

pub type BoxSyncRead = Box<dyn Read + Send + 'static>;
pub type BoxSyncWrite = Box<dyn Write + Send + 'static>;

/// Unified interface for artifact storage.
///
/// All storage operations are asynchronous so that network-backed stores can
/// implement them without blocking. Streaming access is offered through
/// synchronous [`Read`]/[`Write`] handles intended for
/// [`spawn_blocking`](tokio::task::spawn_blocking), which is where checksum
/// hashing happens anyway.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations should
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use ferry_storage::{backend::StorageBackend, error::Result};
///
/// async fn stored_size(backend: &dyn StorageBackend, path: &Path) -> Result<u64> {
///     if backend.exists(path).await? {
///         Ok(backend.read(path).await?.len() as u64)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Open a file for streaming reads.
    ///
    /// Returns a `'static` boxed [`Read`] suitable for use inside
    /// [`spawn_blocking`](tokio::task::spawn_blocking). The async setup
    /// (opening the file/connection) happens before returning. Returns
    /// [`NotFound`](crate::error::ErrorKind::NotFound) if the file does not
    /// exist.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::io::Read;
    /// use std::path::Path;
    /// # use ferry_storage::{backend::StorageBackend, error::{ErrorKind, Result}};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut reader = backend.reader(Path::new("artifact/ab/cdef")).await?;
    /// let total = tokio::task::spawn_blocking(move || {
    ///     let mut buffer = vec![0; 1024 * 1024];
    ///     let mut total = 0;
    ///     loop {
    ///         match reader.read(&mut buffer)? {
    ///             0 => return Ok::<_, std::io::Error>(total),
    ///             n => total += n,
    ///         }
    ///     }
    /// }).await.unwrap().map_err(ErrorKind::Io)?;
    /// println!("{total} bytes");
    /// # Ok(())
    /// # }
    /// ```
    async fn reader(&self, path: &Path) -> Result<BoxSyncRead>;

    /// Write file contents.
    ///
    /// Creates a new file or overwrites an existing file with the provided
    /// data. Implementations should create parent directories as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Open a file for streaming writes.
    ///
    /// Returns a `'static` boxed [`Write`] suitable for use inside
    /// [`spawn_blocking`](tokio::task::spawn_blocking). Existing files are
    /// truncated.
    ///
    /// # Notes
    /// - Implementations should create parent directories as needed.
    /// - Callers must call `flush()` before dropping so that errors are
    ///   propagated. Some backends only persist the data on `flush()`.
    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;
}
