//! Per-hash write locks.
//!
//! Two layers: an in-process async mutex per hash, so tasks in one process
//! queue without touching the filesystem, and an exclusively created
//! `locks/<hash>.lock` file that keeps other processes out. Writers of
//! different hashes never contend.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{CasError, Result};

/// A lock file older than this is assumed to belong to a dead process.
const STALE_LOCK_AGE: Duration = Duration::from_secs(10 * 60);

type LockMap = DashMap<String, Arc<Mutex<()>>>;

#[derive(Debug)]
pub(crate) struct HashLocks {
    in_process: Arc<LockMap>,
    locks_dir: PathBuf,
    attempts: u32,
    delay: Duration,
}

impl HashLocks {
    pub(crate) fn new(locks_dir: impl Into<PathBuf>, attempts: u32, delay: Duration) -> Self {
        Self {
            in_process: Arc::new(DashMap::new()),
            locks_dir: locks_dir.into(),
            attempts: attempts.max(1),
            delay,
        }
    }

    fn lock_path(&self, hash: &str) -> PathBuf {
        self.locks_dir.join(format!("{hash}.lock"))
    }

    /// Acquire both lock layers for an already validated hash.
    pub(crate) async fn acquire(&self, hash: &str) -> Result<HashLockGuard> {
        let mutex = self
            .in_process
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let local = mutex.lock_owned().await;

        let path = self.lock_path(hash);
        for attempt in 1..=self.attempts {
            match try_create(&path).await {
                Ok(()) => {
                    return Ok(HashLockGuard {
                        local: Some(local),
                        map: Arc::clone(&self.in_process),
                        hash: hash.to_string(),
                        file: path,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if break_if_stale(&path).await {
                        continue;
                    }
                    tracing::trace!(component = "CAS", hash, attempt, "Lock file busy");
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tokio::fs::create_dir_all(&self.locks_dir).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CasError::LockAcquisitionTimeout {
            hash: hash.to_string(),
            attempts: self.attempts,
            waited: self.delay * self.attempts,
        })
    }
}

async fn try_create(path: &Path) -> std::io::Result<()> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map(drop)
}

async fn break_if_stale(path: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        // Released between our attempt and now.
        return true;
    };
    let age = meta
        .modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok());
    match age {
        Some(age) if age > STALE_LOCK_AGE => {
            loadout_config::log_cas_warn!(
                "Breaking stale lock file",
                path = %path.display(),
                age_secs = age.as_secs()
            );
            tokio::fs::remove_file(path).await.is_ok()
        }
        _ => false,
    }
}

/// Holds a hash's lock; the lock file is removed on drop.
#[derive(Debug)]
pub(crate) struct HashLockGuard {
    local: Option<OwnedMutexGuard<()>>,
    map: Arc<LockMap>,
    hash: String,
    file: PathBuf,
}

impl Drop for HashLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.file);
        drop(self.local.take());
        // Forget the mutex once no other task holds or waits on it.
        self.map
            .remove_if(&self.hash, |_, m| Arc::strong_count(m) == 1);
    }
}
