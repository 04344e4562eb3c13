//! Object storage: atomic, verified, lock-protected writes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use loadout_config::{log_cas_debug, log_cas_info, log_cas_warn, CasSettings};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use walkdir::WalkDir;

use crate::hash::{hash_file, validate_hash, HASH_HEX_LEN};
use crate::lock::HashLocks;
use crate::{layout, protection, CasError, Result};

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Tunables for [`CasStorage`].
#[derive(Debug, Clone)]
pub struct CasOptions {
    /// Hash every incoming stream and refuse content that does not match
    pub verify_integrity: bool,
    pub lock_retry_attempts: u32,
    pub lock_retry_delay: Duration,
}

impl Default for CasOptions {
    fn default() -> Self {
        Self::from(&CasSettings::default())
    }
}

impl From<&CasSettings> for CasOptions {
    fn from(settings: &CasSettings) -> Self {
        Self {
            verify_integrity: settings.verify_integrity,
            lock_retry_attempts: settings.lock_retry_attempts,
            lock_retry_delay: settings.lock_retry_delay(),
        }
    }
}

/// Object count and size of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CasStats {
    pub object_count: u64,
    pub total_bytes: u64,
}

/// Content-addressable object store rooted at one directory.
///
/// Safe to share across tasks behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct CasStorage {
    root: PathBuf,
    objects_dir: PathBuf,
    temp_dir: PathBuf,
    locks: HashLocks,
    options: CasOptions,
}

impl CasStorage {
    /// Open (creating if needed) a store at `root`.
    pub fn new(root: impl AsRef<Path>, options: CasOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let objects_dir = root.join(layout::OBJECTS);
        let temp_dir = root.join(layout::TEMP);
        let locks_dir = root.join(layout::LOCKS);
        for dir in [&objects_dir, &temp_dir, &locks_dir] {
            std::fs::create_dir_all(dir)?;
        }

        Ok(Self {
            locks: HashLocks::new(
                locks_dir,
                options.lock_retry_attempts,
                options.lock_retry_delay,
            ),
            root,
            objects_dir,
            temp_dir,
            options,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &CasOptions {
        &self.options
    }

    /// Staging area for partial writes. Entries older than an hour are
    /// purged by maintenance.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Where the object `hash` lives: `objects/<first two hex>/<hash>`.
    pub fn object_path(&self, hash: &str) -> Result<PathBuf> {
        let hash = validate_hash(hash)?;
        Ok(self.objects_dir.join(&hash[..2]).join(hash))
    }

    /// Whether an object is present. Malformed hashes are simply absent.
    pub async fn object_exists(&self, hash: &str) -> bool {
        match self.object_path(hash) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Stream `reader` into the store under `hash`.
    ///
    /// A no-op returning the existing path when the object is already
    /// present. The bytes land in `temp/` first and are renamed into place
    /// only after verification, so a failed store never leaves a partial
    /// object behind.
    #[instrument(skip(self, reader), level = "debug")]
    pub async fn store_object<R>(&self, mut reader: R, hash: &str) -> Result<PathBuf>
    where
        R: AsyncRead + Unpin + Send,
    {
        let hash = validate_hash(hash)?;
        let dest = self.object_path(&hash)?;
        let _lock = self.locks.acquire(&hash).await?;

        if fs::try_exists(&dest).await.unwrap_or(false) {
            log_cas_debug!("Object already stored", hash = %hash);
            return Ok(dest);
        }

        let temp = TempFile::new(
            self.temp_dir
                .join(format!("{}.tmp", uuid::Uuid::new_v4().simple())),
        );
        let mut file = fs::File::create(temp.path()).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut written = 0u64;
        loop {
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
            file.write_all(&buf[..read]).await?;
            written += read as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if self.options.verify_integrity {
            let actual = hex::encode(hasher.finalize());
            if actual != hash {
                log_cas_warn!("Rejected object with mismatched content", expected = %hash, actual = %actual);
                return Err(CasError::IntegrityMismatch {
                    expected: hash,
                    actual,
                });
            }
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(temp.path(), &dest).await?;
        temp.disarm();

        if let Err(e) = protection::protect(&dest) {
            log_cas_warn!("Could not make object read-only", hash = %hash, error = %e);
        }
        log_cas_info!("Object stored", hash = %hash, bytes = written);
        Ok(dest)
    }

    pub async fn store_bytes(&self, bytes: &[u8], hash: &str) -> Result<PathBuf> {
        self.store_object(bytes, hash).await
    }

    /// Store the file at `path`. The hash is computed when none is declared.
    pub async fn store_file(
        &self,
        path: impl AsRef<Path>,
        expected_hash: Option<&str>,
    ) -> Result<(String, PathBuf)> {
        let path = path.as_ref();
        let hash = match expected_hash {
            Some(h) => validate_hash(h)?,
            None => hash_file(path).await?,
        };
        let file = fs::File::open(path).await?;
        let stored = self.store_object(file, &hash).await?;
        Ok((hash, stored))
    }

    /// Open an object for reading.
    pub async fn open_object(&self, hash: &str) -> Result<fs::File> {
        let path = self.object_path(hash)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CasError::ObjectNotFound {
                hash: hash.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an object. Returns `false` when it was already gone.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete_object(&self, hash: &str) -> Result<bool> {
        let hash = validate_hash(hash)?;
        let path = self.object_path(&hash)?;
        let _lock = self.locks.acquire(&hash).await?;

        match protection::unprotect(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = path.parent() {
            // Only succeeds once the prefix directory is empty.
            let _ = fs::remove_dir(parent).await;
        }
        log_cas_debug!("Object deleted", hash = %hash);
        Ok(true)
    }

    /// Every well-formed object hash in the store, sorted.
    pub async fn all_object_hashes(&self) -> Result<Vec<String>> {
        let objects_dir = self.objects_dir.clone();
        let hashes = tokio::task::spawn_blocking(move || scan_objects(&objects_dir))
            .await
            .map_err(std::io::Error::other)??;
        Ok(hashes.into_iter().map(|(hash, _)| hash).collect())
    }

    /// When the object was written. Falls back to mtime where the platform
    /// does not record creation time.
    pub async fn object_creation_time(&self, hash: &str) -> Result<DateTime<Utc>> {
        let meta = self.object_metadata(hash).await?;
        let time = meta.created().or_else(|_| meta.modified())?;
        Ok(DateTime::<Utc>::from(time))
    }

    pub async fn object_size(&self, hash: &str) -> Result<u64> {
        Ok(self.object_metadata(hash).await?.len())
    }

    async fn object_metadata(&self, hash: &str) -> Result<std::fs::Metadata> {
        let path = self.object_path(hash)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CasError::ObjectNotFound {
                hash: hash.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn stats(&self) -> Result<CasStats> {
        let objects_dir = self.objects_dir.clone();
        let objects = tokio::task::spawn_blocking(move || scan_objects(&objects_dir))
            .await
            .map_err(std::io::Error::other)??;
        Ok(CasStats {
            object_count: objects.len() as u64,
            total_bytes: objects.iter().map(|(_, size)| size).sum(),
        })
    }

    /// Remove files in `temp/` older than `older_than`, left behind by
    /// crashed writers. Returns how many were removed.
    pub async fn purge_temp(&self, older_than: Duration) -> Result<usize> {
        let mut removed = 0;
        let mut entries = match fs::read_dir(&self.temp_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            let age = meta.modified().ok().and_then(|m| m.elapsed().ok());
            if meta.is_file() && age.is_some_and(|age| age >= older_than) {
                if fs::remove_file(entry.path()).await.is_ok() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            log_cas_info!("Purged abandoned temp files", count = removed);
        }
        Ok(removed)
    }
}

/// Walk `objects/` and return `(hash, size)` for every well-formed object.
fn scan_objects(objects_dir: &Path) -> std::io::Result<Vec<(String, u64)>> {
    let mut out = Vec::new();
    if !objects_dir.exists() {
        return Ok(out);
    }
    for entry in WalkDir::new(objects_dir).min_depth(2).max_depth(2) {
        let entry = entry.map_err(std::io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let prefix_ok = entry
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|p| p.to_str())
            .is_some_and(|p| name.len() == HASH_HEX_LEN && p == &name[..2]);
        let is_canonical = validate_hash(name).is_ok_and(|h| h == name);
        if !(prefix_ok && is_canonical) {
            continue;
        }
        let size = entry.metadata().map_err(std::io::Error::other)?.len();
        out.push((name.to_string(), size));
    }
    out.sort();
    Ok(out)
}

/// Temp file removed on drop unless disarmed after a successful rename.
struct TempFile {
    path: Option<PathBuf>,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
