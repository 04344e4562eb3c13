//! Integrity audit: recompute every object's hash and compare it with its
//! name. Read-only; corrupted objects are reported, never repaired.

use std::time::{Duration, Instant};

use loadout_config::{log_cas_error, log_cas_info};
use serde::Serialize;

use crate::hash::hash_file;
use crate::storage::CasStorage;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorruptObject {
    pub hash: String,
    pub actual: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub checked: u64,
    pub corrupted: Vec<CorruptObject>,
    /// Objects that vanished or could not be read during the audit
    pub unreadable: Vec<String>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.corrupted.is_empty() && self.unreadable.is_empty()
    }
}

pub async fn validate_integrity(storage: &CasStorage) -> Result<IntegrityReport> {
    let started = Instant::now();
    let mut report = IntegrityReport::default();

    for hash in storage.all_object_hashes().await? {
        let path = storage.object_path(&hash)?;
        report.checked += 1;
        match hash_file(&path).await {
            Ok(actual) if actual == hash => {}
            Ok(actual) => {
                log_cas_error!("Corrupted object", hash = %hash, actual = %actual);
                report.corrupted.push(CorruptObject { hash, actual });
            }
            Err(e) => {
                log_cas_error!("Unreadable object", hash = %hash, error = %e);
                report.unreadable.push(hash);
            }
        }
    }

    report.elapsed = started.elapsed();
    log_cas_info!(
        "Integrity audit finished",
        checked = report.checked,
        corrupted = report.corrupted.len(),
        unreadable = report.unreadable.len()
    );
    Ok(report)
}
