//! # Garbage Collection
//!
//! Mark-and-sweep over the object store: the reference tracker's records are
//! the mark set, everything else older than the grace period is swept.
//! The grace period protects objects stored moments ago whose manifest has
//! not been tracked yet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use loadout_config::{log_cas_debug, log_cas_info, log_cas_warn};
use serde::Serialize;

use crate::refs::CasReferenceTracker;
use crate::storage::CasStorage;
use crate::Result;

/// Outcome of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcStats {
    pub scanned: u64,
    pub referenced: u64,
    /// Deleted objects, or deletion candidates in a dry run
    pub deleted: u64,
    pub bytes_freed: u64,
    pub skipped_grace_period: u64,
    pub failures: u64,
    pub dry_run: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct GarbageCollector {
    storage: Arc<CasStorage>,
    tracker: Arc<CasReferenceTracker>,
    grace_period: Duration,
}

impl GarbageCollector {
    pub fn new(
        storage: Arc<CasStorage>,
        tracker: Arc<CasReferenceTracker>,
        grace_period: Duration,
    ) -> Self {
        Self {
            storage,
            tracker,
            grace_period,
        }
    }

    /// Delete unreferenced objects. `force` ignores the grace period.
    pub async fn collect(&self, force: bool) -> Result<GcStats> {
        self.run(force, false).await
    }

    /// Report what [`collect`](Self::collect) would delete without deleting.
    pub async fn dry_run(&self, force: bool) -> Result<GcStats> {
        self.run(force, true).await
    }

    async fn run(&self, force: bool, dry_run: bool) -> Result<GcStats> {
        let started = Instant::now();
        let refs = self.tracker.all_references().await?;
        let hashes = self.storage.all_object_hashes().await?;
        let grace = chrono::Duration::from_std(self.grace_period)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));

        let mut stats = GcStats {
            scanned: hashes.len() as u64,
            dry_run,
            ..GcStats::default()
        };

        let mut candidates = Vec::new();
        for hash in hashes {
            if refs.contains(&hash) {
                stats.referenced += 1;
                continue;
            }

            if !force {
                match self.storage.object_creation_time(&hash).await {
                    Ok(created) if Utc::now().signed_duration_since(created) < grace => {
                        stats.skipped_grace_period += 1;
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log_cas_warn!("Could not read object age", hash = %hash, error = %e);
                        stats.failures += 1;
                        continue;
                    }
                }
            }
            candidates.push(hash);
        }

        // Records written during the scan (a workspace being prepared) still
        // protect their objects.
        if !candidates.is_empty() {
            let latest = self.tracker.all_references().await?;
            candidates.retain(|hash| {
                let pinned = latest.contains(hash);
                if pinned {
                    stats.referenced += 1;
                }
                !pinned
            });
        }

        for hash in candidates {
            let size = self.storage.object_size(&hash).await.unwrap_or(0);
            if dry_run {
                stats.deleted += 1;
                stats.bytes_freed += size;
                continue;
            }

            match self.storage.delete_object(&hash).await {
                Ok(true) => {
                    log_cas_debug!("Collected object", hash = %hash, bytes = size);
                    stats.deleted += 1;
                    stats.bytes_freed += size;
                }
                Ok(false) => {}
                Err(e) => {
                    log_cas_warn!("Failed to delete object", hash = %hash, error = %e);
                    stats.failures += 1;
                }
            }
        }

        stats.elapsed = started.elapsed();
        log_cas_info!(
            "Garbage collection finished",
            scanned = stats.scanned,
            referenced = stats.referenced,
            deleted = stats.deleted,
            bytes_freed = stats.bytes_freed,
            skipped = stats.skipped_grace_period,
            failures = stats.failures,
            dry_run
        );
        Ok(stats)
    }
}
