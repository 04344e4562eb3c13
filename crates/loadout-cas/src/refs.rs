//! # Reference Tracking
//!
//! Records which manifests and workspaces hold which objects, so garbage
//! collection only ever removes content nothing points at.
//!
//! ## Layout
//!
//! ```text
//! <cas_root>/refs/
//! ├── manifests/<manifest id>.refs.json
//! └── workspaces/<workspace id>.refs.json
//! ```
//!
//! One record per owner, replaced wholesale on every track call. An
//! unreadable record aborts [`CasReferenceTracker::all_references`] rather
//! than being skipped: treating it as empty could let GC delete live objects.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loadout_config::{log_cas_debug, log_cas_error, log_cas_warn};
use loadout_manifest::{ContentManifest, ManifestReferenceSink};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::hash::validate_hash;
use crate::{layout, CasError, Result};

const MANIFESTS: &str = "manifests";
const WORKSPACES: &str = "workspaces";
const RECORD_SUFFIX: &str = ".refs.json";

/// Who holds a reference record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceOwner {
    Manifest,
    Workspace,
}

impl ReferenceOwner {
    fn dir_name(self) -> &'static str {
        match self {
            ReferenceOwner::Manifest => MANIFESTS,
            ReferenceOwner::Workspace => WORKSPACES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceRecord {
    owner: ReferenceOwner,
    id: String,
    hashes: Vec<String>,
    updated_at: DateTime<Utc>,
}

/// Union of all tracked references.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    pub hashes: HashSet<String>,
    pub manifest_records: usize,
    pub workspace_records: usize,
}

impl ReferenceSet {
    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.contains(&hash.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Persistent manifest/workspace → object reference records.
#[derive(Debug)]
pub struct CasReferenceTracker {
    refs_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl CasReferenceTracker {
    /// Tracker whose records live under `<cas_root>/refs`.
    pub fn new(cas_root: impl AsRef<Path>) -> Self {
        Self {
            refs_dir: cas_root.as_ref().join(layout::REFS),
            write_lock: Mutex::new(()),
        }
    }

    pub fn refs_dir(&self) -> &Path {
        &self.refs_dir
    }

    fn record_path(&self, owner: ReferenceOwner, id: &str) -> Result<PathBuf> {
        ContentManifest::validate_id(id)
            .map_err(|_| CasError::InvalidReferenceId(id.to_string()))?;
        Ok(self
            .refs_dir
            .join(owner.dir_name())
            .join(format!("{id}{RECORD_SUFFIX}")))
    }

    /// Record the CAS objects a manifest's files point at.
    pub async fn track_manifest(&self, manifest: &ContentManifest) -> Result<()> {
        self.write_record(ReferenceOwner::Manifest, &manifest.id, manifest.cas_hashes())
            .await
    }

    pub async fn untrack_manifest(&self, manifest_id: &str) -> Result<bool> {
        self.remove_record(ReferenceOwner::Manifest, manifest_id).await
    }

    /// Record the CAS objects a prepared workspace links to or was copied from.
    pub async fn track_workspace<I, S>(&self, workspace_id: &str, hashes: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hashes = hashes
            .into_iter()
            .map(|h| h.as_ref().to_string())
            .collect();
        self.write_record(ReferenceOwner::Workspace, workspace_id, hashes)
            .await
    }

    pub async fn untrack_workspace(&self, workspace_id: &str) -> Result<bool> {
        self.remove_record(ReferenceOwner::Workspace, workspace_id)
            .await
    }

    async fn write_record(
        &self,
        owner: ReferenceOwner,
        id: &str,
        hashes: Vec<String>,
    ) -> Result<()> {
        let path = self.record_path(owner, id)?;

        let mut seen = HashSet::new();
        let mut valid = Vec::with_capacity(hashes.len());
        for raw in hashes {
            match validate_hash(&raw) {
                Ok(hash) => {
                    if seen.insert(hash.clone()) {
                        valid.push(hash);
                    }
                }
                Err(_) => log_cas_warn!("Ignoring malformed hash in reference record", id, hash = %raw),
            }
        }

        let record = ReferenceRecord {
            owner,
            id: id.to_string(),
            hashes: valid,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&record)?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, &json).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        log_cas_debug!("References tracked", owner = ?owner, id, count = record.hashes.len());
        Ok(())
    }

    async fn remove_record(&self, owner: ReferenceOwner, id: &str) -> Result<bool> {
        let path = self.record_path(owner, id)?;
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => {
                log_cas_debug!("References released", owner = ?owner, id);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Union of every record's hashes.
    pub async fn all_references(&self) -> Result<ReferenceSet> {
        let mut set = ReferenceSet::default();
        for owner in [ReferenceOwner::Manifest, ReferenceOwner::Workspace] {
            let records = self.read_records(owner).await?;
            match owner {
                ReferenceOwner::Manifest => set.manifest_records = records.len(),
                ReferenceOwner::Workspace => set.workspace_records = records.len(),
            }
            for record in records {
                set.hashes.extend(record.hashes);
            }
        }
        Ok(set)
    }

    pub async fn is_referenced(&self, hash: &str) -> Result<bool> {
        Ok(self.all_references().await?.contains(hash))
    }

    async fn read_records(&self, owner: ReferenceOwner) -> Result<Vec<ReferenceRecord>> {
        let dir = self.refs_dir.join(owner.dir_name());
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(RECORD_SUFFIX));
            if !is_record {
                continue;
            }
            let bytes = fs::read(&path).await?;
            let record: ReferenceRecord = serde_json::from_slice(&bytes).map_err(|e| {
                log_cas_error!("Unreadable reference record", path = %path.display(), error = %e);
                CasError::Json(e)
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl ManifestReferenceSink for CasReferenceTracker {
    async fn track_manifest(&self, manifest: &ContentManifest) -> anyhow::Result<()> {
        CasReferenceTracker::track_manifest(self, manifest).await?;
        Ok(())
    }

    async fn untrack_manifest(&self, manifest_id: &str) -> anyhow::Result<()> {
        CasReferenceTracker::untrack_manifest(self, manifest_id).await?;
        Ok(())
    }
}
