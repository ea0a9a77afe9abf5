//! In-memory storage backend for testing.

use crate::StorageBackend;
use crate::backend::{BoxSyncRead, BoxSyncWrite};
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

type Files = Arc<RwLock<HashMap<PathBuf, Vec<u8>>>>;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`] that is never held
/// across an await point, so the synchronous writers handed out by
/// [`writer()`](StorageBackend::writer) can commit into the same map.
///
/// # Examples
///
/// ```
/// use ferry_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("artifact/ab/cdef", b"bytes")]);
/// assert!(backend.exists(Path::new("artifact/ab/cdef")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    files: Files,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, data.into());
        }
        Self {
            name: "mock".to_string(),
            files: Arc::new(RwLock::new(map)),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Snapshot of a stored file, bypassing path validation errors.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let path = validate_path(path.as_ref()).ok()?;
        self.files.read().ok()?.get(&path).cloned()
    }

    fn poisoned() -> exn::Exn<ErrorKind> {
        exn::Exn::from(ErrorKind::BackendError("mock storage lock poisoned".to_string()))
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &[u8]); 0] = [];
        Self::with_files(files)
    }
}

/// Buffers writes and publishes them into the backend on `flush()`.
struct MockWriter {
    path: PathBuf,
    buffer: Vec<u8>,
    files: Files,
}
impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut files = self.files.write().map_err(|_| io::Error::other("mock storage lock poisoned"))?;
        files.insert(self.path.clone(), self.buffer.clone());
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.files.read().map_err(|_| Self::poisoned())?.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let files = self.files.read().map_err(|_| Self::poisoned())?;
        files.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        let data = self.read(path).await?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.files.write().map_err(|_| Self::poisoned())?.insert(path, data.to_vec());
        Ok(())
    }

    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite> {
        let path = validate_path(path)?;
        Ok(Box::new(MockWriter {
            path,
            buffer: Vec::new(),
            files: Arc::clone(&self.files),
        }))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        let mut files = self.files.write().map_err(|_| Self::poisoned())?;
        files.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[tokio::test]
    async fn test_write_and_read() {
        let backend = MockBackend::default();
        backend.write(Path::new("test.bin"), b"hello").await.unwrap();
        assert_eq!(backend.read(Path::new("test.bin")).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_writer_publishes_on_flush() {
        let backend = MockBackend::default();
        let mut writer = backend.writer(Path::new("a/b.bin")).await.unwrap();
        writer.write_all(b"buffered").unwrap();
        assert!(!backend.exists(Path::new("a/b.bin")).await.unwrap());
        writer.flush().unwrap();
        assert_eq!(backend.contents("a/b.bin").unwrap(), b"buffered");
    }

    #[tokio::test]
    async fn test_reader() {
        let backend = MockBackend::with_files([("file.bin", b"0123456789")]);
        let mut reader = backend.reader(Path::new("file.bin")).await.unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"0123456789");
    }

    #[tokio::test]
    async fn test_not_found() {
        let backend = MockBackend::default();
        let err = backend.read(Path::new("missing.bin")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = backend.delete(Path::new("missing.bin")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = MockBackend::with_files([("file.bin", b"data")]);
        backend.delete(Path::new("file.bin")).await.unwrap();
        assert!(!backend.exists(Path::new("file.bin")).await.unwrap());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let backend = MockBackend::default();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape"), b"bad").await.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape", b"bad")]);
    }
}
