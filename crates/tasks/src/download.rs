//! Fetching files from remotes.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use ferry_config::DownloadConfig;
use ferry_db::Remote;
use ferry_db::checksum::{Checksums, Hasher};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// A downloaded file, staged in a temporary location until it is accepted.
///
/// The file is deleted when `path` is dropped.
#[derive(Debug)]
pub struct Download {
    pub path: TempPath,
    pub checksums: Checksums,
    pub size: u64,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` using the settings of `remote`.
    async fn fetch(&self, url: &str, remote: &Remote) -> Result<Download>;
}

/// Downloads over HTTP(S), hashing while the body streams to disk.
pub struct HttpDownloader {
    client: reqwest::Client,
    temp_dir: Option<PathBuf>,
}

impl HttpDownloader {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .or_raise(|| ErrorKind::Config)?;
        Ok(Self {
            client,
            temp_dir: config.temp_dir.clone(),
        })
    }

    fn temp_file(&self) -> std::io::Result<NamedTempFile> {
        match &self.temp_dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    #[instrument(skip(self, remote), fields(remote = %remote.name))]
    async fn fetch(&self, url: &str, remote: &Remote) -> Result<Download> {
        let failed = || ErrorKind::Download(url.to_string());
        let mut request = self.client.get(url);
        if let Some(timeout) = remote.total_timeout {
            request = request.timeout(timeout);
        }
        if let Some(username) = &remote.username {
            request = request.basic_auth(username, remote.password.as_deref());
        }
        let response = request.send().await.or_raise(failed)?.error_for_status().or_raise(failed)?;

        let (file, path) = self.temp_file().or_raise(failed)?.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut hasher = Hasher::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.or_raise(failed)?;
            hasher.update(&chunk);
            file.write_all(&chunk).await.or_raise(failed)?;
        }
        file.flush().await.or_raise(failed)?;

        let (checksums, size) = hasher.finalize();
        debug!(size, sha256 = %checksums.sha256, "download finished");
        Ok(Download { path, checksums, size })
    }
}

#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockDownloader;

#[cfg(any(test, feature = "mock"))]
mod mock {
    use super::{Download, Downloader};
    use crate::error::{ErrorKind, Result};
    use async_trait::async_trait;
    use exn::ResultExt;
    use ferry_db::Remote;
    use ferry_db::checksum::checksums;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    /// Serves canned responses by URL. Unknown URLs fail like a 404 would.
    #[derive(Default)]
    pub struct MockDownloader {
        bodies: HashMap<String, Option<Vec<u8>>>,
        delay: Option<Duration>,
        requests: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockDownloader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_body(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
            self.bodies.insert(url.into(), Some(body.into()));
            self
        }

        pub fn with_failure(mut self, url: impl Into<String>) -> Self {
            self.bodies.insert(url.into(), None);
            self
        }

        /// Hold every download open for `delay`.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// URLs fetched so far, in order.
        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }

        /// Most downloads that were ever running at the same time.
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        fn respond(&self, url: &str) -> Result<Download> {
            let Some(Some(body)) = self.bodies.get(url) else {
                exn::bail!(ErrorKind::Download(url.to_string()));
            };
            let failed = || ErrorKind::Download(url.to_string());
            let mut file = NamedTempFile::new().or_raise(failed)?;
            file.write_all(body).or_raise(failed)?;
            file.flush().or_raise(failed)?;
            Ok(Download {
                path: file.into_temp_path(),
                checksums: checksums(body),
                size: body.len() as u64,
            })
        }
    }

    #[async_trait]
    impl Downloader for MockDownloader {
        async fn fetch(&self, url: &str, _remote: &Remote) -> Result<Download> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(url.to_string());
            }
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let response = self.respond(url);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_db::RemoteId;
    use ferry_db::checksum::checksums;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote(server: &MockServer) -> Remote {
        Remote {
            id: RemoteId(1),
            name: "upstream".to_string(),
            url: server.uri(),
            total_timeout: None,
            username: None,
            password: None,
        }
    }

    #[tokio::test]
    async fn test_download_is_hashed_and_staged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let downloader = HttpDownloader::new(&DownloadConfig::default()).unwrap();
        let url = format!("{}/hello.txt", server.uri());
        let download = downloader.fetch(&url, &remote(&server)).await.unwrap();

        assert_eq!(download.size, 5);
        assert_eq!(download.checksums, checksums(b"hello"));
        assert_eq!(std::fs::read(&download.path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_error_status_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let downloader = HttpDownloader::new(&DownloadConfig::default()).unwrap();
        let url = format!("{}/missing", server.uri());
        let err = downloader.fetch(&url, &remote(&server)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Download(u) if *u == url));
    }

    #[tokio::test]
    async fn test_remote_credentials_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"secret".to_vec()))
            .mount(&server)
            .await;
        let mut remote = remote(&server);
        remote.username = Some("user".to_string());
        remote.password = Some("pass".to_string());

        let downloader = HttpDownloader::new(&DownloadConfig::default()).unwrap();
        let download = downloader.fetch(&format!("{}/private", server.uri()), &remote).await.unwrap();
        assert_eq!(download.size, 6);
    }

    #[tokio::test]
    async fn test_remote_timeout_applies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;
        let mut remote = remote(&server);
        remote.total_timeout = Some(Duration::from_millis(50));

        let downloader = HttpDownloader::new(&DownloadConfig::default()).unwrap();
        let err = downloader.fetch(&format!("{}/slow", server.uri()), &remote).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Download(_)));
    }

    #[tokio::test]
    async fn test_mock_downloader() {
        let downloader = MockDownloader::new().with_body("https://a/1", "one").with_failure("https://a/2");
        let remote = Remote {
            id: RemoteId(1),
            name: "mock".to_string(),
            url: "https://a/".to_string(),
            total_timeout: None,
            username: None,
            password: None,
        };
        assert_eq!(downloader.fetch("https://a/1", &remote).await.unwrap().size, 3);
        assert!(downloader.fetch("https://a/2", &remote).await.is_err());
        assert!(downloader.fetch("https://a/3", &remote).await.is_err());
        assert_eq!(downloader.requests(), ["https://a/1", "https://a/2", "https://a/3"]);
    }
}
