//! File operations used by the materialization strategies.
//!
//! Each operation makes a single attempt and reports a typed error; retry
//! and failure policy belong to the caller. Blocking filesystem work runs
//! on the blocking pool.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use loadout_cas::{CasError, CasStorage};
use loadout_config::{log_workspace_debug, log_workspace_info};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::link::{self, LinkMethod};

/// Errors from a single file operation
#[derive(Error, Debug)]
pub enum FileOpError {
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Download of {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Hash mismatch for {}: expected {expected}, got {actual}", path.display())]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("CAS error: {0}")]
    Cas(#[from] CasError),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type FileOpResult<T> = std::result::Result<T, FileOpError>;

/// Download progress callback: `(bytes_received, content_length)`.
pub type DownloadProgress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// How to link a CAS object into a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Symlink,
    Hardlink,
}

#[async_trait]
pub trait FileOperations: Send + Sync {
    /// Clone or copy `source` to `target`.
    async fn copy_file(&self, source: &Path, target: &Path) -> FileOpResult<LinkMethod>;

    /// Symlink `target` → `source`. The source must exist.
    async fn create_symlink(&self, source: &Path, target: &Path) -> FileOpResult<LinkMethod>;

    /// Symlink a whole directory. The source must be a directory.
    async fn create_directory_symlink(
        &self,
        source: &Path,
        target: &Path,
    ) -> FileOpResult<LinkMethod>;

    /// Hard link `target` to `source`, copying across devices.
    async fn create_hardlink(&self, source: &Path, target: &Path) -> FileOpResult<LinkMethod>;

    /// Mark a workspace-owned file as executable.
    async fn set_executable(&self, path: &Path) -> FileOpResult<()>;

    /// `Ok` when the file's SHA-256 is `expected`, `HashMismatch` otherwise.
    async fn verify_file_hash(&self, path: &Path, expected: &str) -> FileOpResult<()>;

    /// Stream `url` into `target`. Returns the byte count.
    async fn download_file(
        &self,
        url: &str,
        target: &Path,
        progress: Option<DownloadProgress<'_>>,
        cancel: &CancellationToken,
    ) -> FileOpResult<u64>;

    /// Download `url` straight into the CAS. Skips the download when
    /// `expected_hash` is already stored.
    async fn download_to_cas(
        &self,
        url: &str,
        expected_hash: Option<&str>,
        cancel: &CancellationToken,
    ) -> FileOpResult<String>;

    async fn cas_object_exists(&self, hash: &str) -> bool;

    /// Writable copy of a CAS object.
    async fn copy_from_cas(&self, hash: &str, target: &Path) -> FileOpResult<LinkMethod>;

    async fn link_from_cas(
        &self,
        hash: &str,
        target: &Path,
        kind: LinkKind,
    ) -> FileOpResult<LinkMethod>;

    /// Store a file, returning its hash.
    async fn store_in_cas(&self, source: &Path, expected_hash: Option<&str>)
        -> FileOpResult<String>;
}

/// [`FileOperations`] backed by a [`CasStorage`] and an HTTP client.
#[derive(Debug, Clone)]
pub struct FileOperationsService {
    storage: Arc<CasStorage>,
    http: reqwest::Client,
}

impl FileOperationsService {
    pub fn new(storage: Arc<CasStorage>) -> Self {
        Self::with_client(storage, reqwest::Client::new())
    }

    pub fn with_client(storage: Arc<CasStorage>, http: reqwest::Client) -> Self {
        Self { storage, http }
    }

    pub fn storage(&self) -> &Arc<CasStorage> {
        &self.storage
    }

    async fn require_source(source: &Path) -> FileOpResult<()> {
        match tokio::fs::metadata(source).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(FileOpError::SourceNotFound(source.to_path_buf()))
            }
            Err(source_err) => Err(FileOpError::Io {
                op: "stat",
                path: source.to_path_buf(),
                source: source_err,
            }),
        }
    }

    async fn object_source(&self, hash: &str) -> FileOpResult<PathBuf> {
        let path = self.storage.object_path(hash)?;
        if !self.storage.object_exists(hash).await {
            return Err(CasError::ObjectNotFound {
                hash: hash.to_string(),
            }
            .into());
        }
        Ok(path)
    }
}

/// Run a blocking filesystem operation, creating `target`'s parent first.
async fn blocking<F>(op: &'static str, target: &Path, f: F) -> FileOpResult<LinkMethod>
where
    F: FnOnce() -> io::Result<LinkMethod> + Send + 'static,
{
    let path = target.to_path_buf();
    let io_err = |source| FileOpError::Io {
        op,
        path: path.clone(),
        source,
    };
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)
        .and_then(|r| r)
        .map_err(io_err)
}

fn absolute(path: &Path) -> FileOpResult<PathBuf> {
    std::path::absolute(path).map_err(|source| FileOpError::Io {
        op: "resolve",
        path: path.to_path_buf(),
        source,
    })
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

#[async_trait]
impl FileOperations for FileOperationsService {
    async fn copy_file(&self, source: &Path, target: &Path) -> FileOpResult<LinkMethod> {
        Self::require_source(source).await?;
        let (src, dst) = (source.to_path_buf(), target.to_path_buf());
        blocking("copy", target, move || link::clone_or_copy(&src, &dst)).await
    }

    async fn create_symlink(&self, source: &Path, target: &Path) -> FileOpResult<LinkMethod> {
        Self::require_source(source).await?;
        let (src, dst) = (absolute(source)?, target.to_path_buf());
        blocking("symlink", target, move || link::symlink_file(&src, &dst)).await
    }

    async fn create_directory_symlink(
        &self,
        source: &Path,
        target: &Path,
    ) -> FileOpResult<LinkMethod> {
        if !tokio::fs::metadata(source)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(FileOpError::SourceNotFound(source.to_path_buf()));
        }
        let (src, dst) = (absolute(source)?, target.to_path_buf());
        blocking("symlink directory", target, move || link::symlink_dir(&src, &dst)).await
    }

    async fn create_hardlink(&self, source: &Path, target: &Path) -> FileOpResult<LinkMethod> {
        Self::require_source(source).await?;
        let (src, dst) = (source.to_path_buf(), target.to_path_buf());
        blocking("hard link", target, move || link::hard_link_or_copy(&src, &dst)).await
    }

    async fn set_executable(&self, path: &Path) -> FileOpResult<()> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || link::make_executable(&owned))
            .await
            .map_err(io::Error::other)
            .and_then(|r| r)
            .map_err(|source| FileOpError::Io {
                op: "chmod",
                path: path.to_path_buf(),
                source,
            })
    }

    async fn verify_file_hash(&self, path: &Path, expected: &str) -> FileOpResult<()> {
        let actual = loadout_cas::hash_file(path).await?;
        if actual.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(FileOpError::HashMismatch {
                path: path.to_path_buf(),
                expected: expected.to_ascii_lowercase(),
                actual,
            })
        }
    }

    #[instrument(skip(self, progress, cancel), level = "debug")]
    async fn download_file(
        &self,
        url: &str,
        target: &Path,
        progress: Option<DownloadProgress<'_>>,
        cancel: &CancellationToken,
    ) -> FileOpResult<u64> {
        let download_err = |source| FileOpError::Download {
            url: url.to_string(),
            source,
        };
        let io_err = |op: &'static str, path: &Path| {
            let path = path.to_path_buf();
            move |source| FileOpError::Io { op, path, source }
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(FileOpError::Cancelled),
            r = self.http.get(url).send() => r.map_err(download_err)?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(FileOpError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let total = response.content_length();

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err("create directory", parent))?;
        }
        let part = part_path(target);

        let result: FileOpResult<u64> = async {
            let mut file = tokio::fs::File::create(&part)
                .await
                .map_err(io_err("create", &part))?;
            let mut received = 0u64;
            let mut stream = response.bytes_stream();
            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => return Err(FileOpError::Cancelled),
                    next = stream.next() => next,
                };
                let Some(chunk) = chunk else { break };
                let chunk = chunk.map_err(download_err)?;
                file.write_all(&chunk).await.map_err(io_err("write", &part))?;
                received += chunk.len() as u64;
                if let Some(report) = progress {
                    report(received, total);
                }
            }
            file.flush().await.map_err(io_err("flush", &part))?;
            drop(file);
            tokio::fs::rename(&part, target)
                .await
                .map_err(io_err("rename", target))?;
            Ok(received)
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&part).await;
        }
        if let Ok(bytes) = result {
            log_workspace_info!("Downloaded file", url, bytes);
        }
        result
    }

    async fn download_to_cas(
        &self,
        url: &str,
        expected_hash: Option<&str>,
        cancel: &CancellationToken,
    ) -> FileOpResult<String> {
        if let Some(hash) = expected_hash {
            if self.storage.object_exists(hash).await {
                log_workspace_debug!("Download already in CAS", url, hash);
                return Ok(hash.to_ascii_lowercase());
            }
        }

        let staging = self
            .storage
            .temp_dir()
            .join(format!("{}.download", uuid::Uuid::new_v4().simple()));
        let result = async {
            self.download_file(url, &staging, None, cancel).await?;
            self.store_in_cas(&staging, expected_hash).await
        }
        .await;
        let _ = tokio::fs::remove_file(&staging).await;
        result
    }

    async fn cas_object_exists(&self, hash: &str) -> bool {
        self.storage.object_exists(hash).await
    }

    async fn copy_from_cas(&self, hash: &str, target: &Path) -> FileOpResult<LinkMethod> {
        let src = self.object_source(hash).await?;
        let dst = target.to_path_buf();
        blocking("copy from CAS", target, move || {
            let method = link::clone_or_copy(&src, &dst)?;
            link::make_writable(&dst)?;
            Ok(method)
        })
        .await
    }

    async fn link_from_cas(
        &self,
        hash: &str,
        target: &Path,
        kind: LinkKind,
    ) -> FileOpResult<LinkMethod> {
        let src = absolute(&self.object_source(hash).await?)?;
        let dst = target.to_path_buf();
        match kind {
            LinkKind::Symlink => {
                blocking("symlink from CAS", target, move || link::symlink_file(&src, &dst)).await
            }
            LinkKind::Hardlink => {
                blocking("hard link from CAS", target, move || {
                    let method = link::hard_link_or_copy(&src, &dst)?;
                    if method.is_copy() {
                        link::make_writable(&dst)?;
                    }
                    Ok(method)
                })
                .await
            }
        }
    }

    async fn store_in_cas(
        &self,
        source: &Path,
        expected_hash: Option<&str>,
    ) -> FileOpResult<String> {
        Self::require_source(source).await?;
        let (hash, _) = self.storage.store_file(source, expected_hash).await?;
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadout_cas::{hash_bytes, CasOptions};
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> FileOperationsService {
        let storage = CasStorage::new(dir.path().join("cas"), CasOptions::default()).unwrap();
        FileOperationsService::new(Arc::new(storage))
    }

    #[tokio::test]
    async fn test_copy_creates_parents() {
        let dir = TempDir::new().unwrap();
        let ops = service(&dir);
        let src = dir.path().join("game.exe");
        std::fs::write(&src, b"MZ").unwrap();
        let dst = dir.path().join("ws/bin/game.exe");

        let method = ops.copy_file(&src, &dst).await.unwrap();
        assert!(method.is_copy());
        assert_eq!(std::fs::read(&dst).unwrap(), b"MZ");
    }

    #[tokio::test]
    async fn test_symlink_requires_source() {
        let dir = TempDir::new().unwrap();
        let ops = service(&dir);
        let err = ops
            .create_symlink(&dir.path().join("missing"), &dir.path().join("link"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileOpError::SourceNotFound(_)));
        assert!(std::fs::symlink_metadata(dir.path().join("link")).is_err());
    }

    #[tokio::test]
    async fn test_verify_file_hash() {
        let dir = TempDir::new().unwrap();
        let ops = service(&dir);
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();

        ops.verify_file_hash(&path, &hash_bytes(b"abc")).await.unwrap();
        let err = ops
            .verify_file_hash(&path, &hash_bytes(b"xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileOpError::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn test_cas_copy_is_writable_and_link_points_into_cas() {
        let dir = TempDir::new().unwrap();
        let ops = service(&dir);
        let src = dir.path().join("map.big");
        std::fs::write(&src, b"map").unwrap();
        let hash = ops.store_in_cas(&src, None).await.unwrap();
        assert!(ops.cas_object_exists(&hash).await);

        let copy = dir.path().join("ws/copy.big");
        ops.copy_from_cas(&hash, &copy).await.unwrap();
        assert!(!std::fs::metadata(&copy).unwrap().permissions().readonly());

        let linked = dir.path().join("ws/link.big");
        let method = ops
            .link_from_cas(&hash, &linked, LinkKind::Symlink)
            .await
            .unwrap();
        assert_eq!(method, LinkMethod::Symlink);
        assert_eq!(std::fs::read(&linked).unwrap(), b"map");
    }

    #[tokio::test]
    async fn test_missing_cas_object() {
        let dir = TempDir::new().unwrap();
        let ops = service(&dir);
        let err = ops
            .copy_from_cas(&hash_bytes(b"absent"), &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FileOpError::Cas(CasError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_download_to_cas_skips_known_object() {
        let dir = TempDir::new().unwrap();
        let ops = service(&dir);
        let hash = hash_bytes(b"patch");
        ops.storage()
            .store_bytes(b"patch", &hash)
            .await
            .unwrap();

        // Unroutable URL: only succeeds because no request is made.
        let got = ops
            .download_to_cas(
                "http://127.0.0.1:9/patch.big",
                Some(&hash.to_uppercase()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(got, hash);
    }

    #[tokio::test]
    async fn test_cancelled_download() {
        let dir = TempDir::new().unwrap();
        let ops = service(&dir);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let target = dir.path().join("dl.bin");
        let err = ops
            .download_file("http://127.0.0.1:9/x", &target, None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FileOpError::Cancelled));
        assert!(!target.exists());
    }
}
