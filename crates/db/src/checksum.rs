//! Artifact digests.
//!
//! Every artifact records all six supported digests; sha256 is the identity
//! used for content addressing and integrity checks.

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::io::{self, Read};

/// Chunk size used for streaming hashes (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Every digest of a fully-known artifact, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub md5: String,
    pub sha1: String,
    pub sha224: String,
    pub sha256: String,
    pub sha384: String,
    pub sha512: String,
}

/// Digests a remote claims for a file. Any of them may be unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digests {
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha224: Option<String>,
    pub sha256: Option<String>,
    pub sha384: Option<String>,
    pub sha512: Option<String>,
}
impl From<Checksums> for Digests {
    fn from(c: Checksums) -> Self {
        Self {
            md5: Some(c.md5),
            sha1: Some(c.sha1),
            sha224: Some(c.sha224),
            sha256: Some(c.sha256),
            sha384: Some(c.sha384),
            sha512: Some(c.sha512),
        }
    }
}
impl From<&Checksums> for Digests {
    fn from(c: &Checksums) -> Self {
        Self::from(c.clone())
    }
}

/// Incremental multi-digest hasher.
///
/// ```
/// use ferry_db::checksum::Hasher;
///
/// let mut hasher = Hasher::new();
/// hasher.update(b"hello ");
/// hasher.update(b"world");
/// let (checksums, size) = hasher.finalize();
/// assert_eq!(size, 11);
/// assert_eq!(checksums.md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");
/// ```
#[derive(Clone)]
pub struct Hasher {
    md5: md5::Context,
    sha1: Sha1,
    sha224: Sha224,
    sha256: Sha256,
    sha384: Sha384,
    sha512: Sha512,
    size: u64,
}
impl Hasher {
    pub fn new() -> Self {
        Self {
            md5: md5::Context::new(),
            sha1: Sha1::new(),
            sha224: Sha224::new(),
            sha256: Sha256::new(),
            sha384: Sha384::new(),
            sha512: Sha512::new(),
            size: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.md5.consume(data);
        self.sha1.update(data);
        self.sha224.update(data);
        self.sha256.update(data);
        self.sha384.update(data);
        self.sha512.update(data);
        self.size += data.len() as u64;
    }

    /// Consume the hasher, returning the digests and the number of bytes hashed.
    pub fn finalize(self) -> (Checksums, u64) {
        let checksums = Checksums {
            md5: format!("{:x}", self.md5.compute()),
            sha1: hex::encode(self.sha1.finalize()),
            sha224: hex::encode(self.sha224.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
            sha384: hex::encode(self.sha384.finalize()),
            sha512: hex::encode(self.sha512.finalize()),
        };
        (checksums, self.size)
    }
}
impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash everything a reader yields, in [`CHUNK_SIZE`] chunks.
pub fn hash_reader(mut reader: impl Read) -> io::Result<(Checksums, u64)> {
    let mut hasher = Hasher::new();
    let mut buffer = vec![0; CHUNK_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return Ok(hasher.finalize()),
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Only the sha256 of a reader, which is all an integrity check needs.
pub fn sha256_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; CHUNK_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return Ok(hex::encode(hasher.finalize())),
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Hash an in-memory buffer.
pub fn checksums(data: &[u8]) -> Checksums {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize().0
}
