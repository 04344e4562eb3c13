//! Background CAS upkeep: periodic garbage collection, abandoned temp file
//! cleanup and a slower integrity audit.
//!
//! The time of the last audit is kept in `<cas_root>/maintenance.json` so a
//! restarted process (or a one-shot `loadout maintain`) does not re-audit
//! a store that was checked recently.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use loadout_config::{
    log_maintenance_error, log_maintenance_info, log_maintenance_warn, CasSettings,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::gc::{GarbageCollector, GcStats};
use crate::integrity::{validate_integrity, IntegrityReport};
use crate::refs::CasReferenceTracker;
use crate::storage::CasStorage;

const STATE_FILE: &str = "maintenance.json";

/// Temp files untouched for this long belong to writers that died.
const TEMP_FILE_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Upper bound on the timer period; tokio deadlines overflow past this.
const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MaintenanceState {
    last_gc_at: Option<DateTime<Utc>>,
    last_integrity_check_at: Option<DateTime<Utc>>,
}

/// What one maintenance cycle did.
#[derive(Debug, Default)]
pub struct MaintenanceReport {
    /// `None` when GC is disabled or failed
    pub gc: Option<GcStats>,
    /// `None` when the audit was not due or failed
    pub integrity: Option<IntegrityReport>,
    pub temp_files_purged: usize,
}

pub struct CasMaintenanceService {
    storage: Arc<CasStorage>,
    gc: GarbageCollector,
    enable_gc: bool,
    interval: Duration,
    integrity_interval: Duration,
    state_path: PathBuf,
}

impl CasMaintenanceService {
    pub fn new(
        storage: Arc<CasStorage>,
        tracker: Arc<CasReferenceTracker>,
        settings: &CasSettings,
    ) -> Self {
        let state_path = storage.root().join(STATE_FILE);
        Self {
            gc: GarbageCollector::new(Arc::clone(&storage), tracker, settings.gc_grace_period()),
            storage,
            enable_gc: settings.enable_gc,
            interval: settings.maintenance_interval().min(MAX_INTERVAL),
            integrity_interval: settings.integrity_check_interval(),
            state_path,
        }
    }

    /// Run maintenance every interval until `cancel` fires. The first cycle
    /// starts one interval after spawning.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            log_maintenance_info!("Maintenance service started", interval_secs = self.interval.as_secs());
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log_maintenance_info!("Maintenance service shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        })
    }

    /// One maintenance cycle. Failures are logged and left for the next cycle.
    pub async fn run_once(&self) -> MaintenanceReport {
        let mut state = self.load_state().await;
        let mut report = MaintenanceReport::default();

        match self.storage.purge_temp(TEMP_FILE_MAX_AGE).await {
            Ok(n) => report.temp_files_purged = n,
            Err(e) => log_maintenance_warn!("Temp cleanup failed", error = %e),
        }

        if self.enable_gc {
            match self.gc.collect(false).await {
                Ok(stats) => {
                    state.last_gc_at = Some(Utc::now());
                    report.gc = Some(stats);
                }
                Err(e) => log_maintenance_error!("Garbage collection failed", error = %e),
            }
        }

        if self.integrity_due(&state) {
            match validate_integrity(&self.storage).await {
                Ok(integrity) => {
                    if !integrity.is_clean() {
                        log_maintenance_error!(
                            "Integrity audit found damaged objects",
                            corrupted = integrity.corrupted.len(),
                            unreadable = integrity.unreadable.len()
                        );
                    }
                    state.last_integrity_check_at = Some(Utc::now());
                    report.integrity = Some(integrity);
                }
                Err(e) => log_maintenance_error!("Integrity audit failed", error = %e),
            }
        }

        self.save_state(&state).await;
        report
    }

    fn integrity_due(&self, state: &MaintenanceState) -> bool {
        let Some(last) = state.last_integrity_check_at else {
            return true;
        };
        let since = Utc::now().signed_duration_since(last);
        since
            .to_std()
            .map_or(false, |since| since >= self.integrity_interval)
    }

    async fn load_state(&self) -> MaintenanceState {
        match tokio::fs::read(&self.state_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                log_maintenance_warn!("Ignoring unreadable maintenance state", error = %e);
                MaintenanceState::default()
            }),
            Err(_) => MaintenanceState::default(),
        }
    }

    async fn save_state(&self, state: &MaintenanceState) {
        let result = async {
            let json = serde_json::to_vec_pretty(state)?;
            let tmp = self.state_path.with_extension("json.tmp");
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, &self.state_path).await?;
            Ok::<_, crate::CasError>(())
        }
        .await;
        if let Err(e) = result {
            log_maintenance_warn!("Could not persist maintenance state", error = %e);
        }
    }
}
