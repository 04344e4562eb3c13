//! Workspace lifecycle: strategy selection, metadata persistence and
//! reference tracking.
//!
//! Prepared workspaces are listed in one JSON file (`workspaces.json` under
//! the content root). Writers in this process are serialized by a mutex and
//! every write replaces the file atomically.
//!
//! A workspace's CAS references are recorded before its files are placed
//! and narrowed to the objects actually used once it is persisted; a failed
//! run releases them again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use loadout_cas::{CasReferenceTracker, CasStorage};
use loadout_config::{
    log_workspace_debug, log_workspace_error, log_workspace_info, log_workspace_warn, Config,
    ConfigurationProvider,
};
use loadout_manifest::{ContentManifest, ContentSourceType};
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::file_ops::FileOperationsService;
use crate::link;
use crate::model::{ProgressReporter, WorkspaceConfiguration, WorkspaceInfo};
use crate::strategy::{default_strategies, flatten_files, MaterializationStrategy, StrategyOptions};
use crate::validation::WorkspaceValidator;
use crate::{Result, WorkspaceError};

pub struct WorkspaceManager {
    strategies: Vec<Arc<dyn MaterializationStrategy>>,
    metadata_path: PathBuf,
    metadata_lock: Mutex<()>,
    references: Option<Arc<CasReferenceTracker>>,
    validator: WorkspaceValidator,
}

impl WorkspaceManager {
    /// Strategies are consulted in order; the first that can handle a
    /// configuration wins.
    pub fn new(
        strategies: Vec<Arc<dyn MaterializationStrategy>>,
        provider: &dyn ConfigurationProvider,
    ) -> Self {
        Self {
            strategies,
            metadata_path: provider.workspace_metadata_path(),
            metadata_lock: Mutex::new(()),
            references: None,
            validator: WorkspaceValidator::new(),
        }
    }

    /// Record each successful workspace's CAS objects with `tracker`.
    pub fn with_references(mut self, tracker: Arc<CasReferenceTracker>) -> Self {
        self.references = Some(tracker);
        self
    }

    /// Every strategy over `storage`, tuned by `config`, recording
    /// references with `tracker`.
    pub fn with_defaults(
        config: &Config,
        storage: Arc<CasStorage>,
        tracker: Arc<CasReferenceTracker>,
    ) -> Self {
        let ops = Arc::new(FileOperationsService::new(storage));
        let strategies = default_strategies(ops, StrategyOptions::from(&config.workspace));
        Self::new(strategies, config).with_references(tracker)
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    fn select(&self, config: &WorkspaceConfiguration) -> Result<&Arc<dyn MaterializationStrategy>> {
        self.strategies
            .iter()
            .find(|s| s.can_handle(config))
            .ok_or(WorkspaceError::NoStrategyFound(config.strategy))
    }

    /// Build the workspace described by `config`.
    ///
    /// Content problems produce `Ok` with `success == false`. Cancellation
    /// and configuration problems are `Err`. Either way nothing about the id
    /// survives a failed run: the directory, any earlier metadata entry and
    /// its references are all removed.
    pub async fn prepare_workspace(
        &self,
        config: &WorkspaceConfiguration,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceInfo> {
        let strategy = self.select(config)?;
        ContentManifest::validate_id(&config.id)
            .map_err(|e| WorkspaceError::InvalidConfiguration(e.to_string()))?;
        if cancel.is_cancelled() {
            return Err(WorkspaceError::Cancelled);
        }

        // Pin the declared objects while files are placed so a concurrent
        // collection cannot delete them from under the workspace.
        if let Some(tracker) = &self.references {
            tracker
                .track_workspace(&config.id, declared_hashes(config))
                .await?;
        }

        let mut info = match strategy.prepare(config, progress, cancel).await {
            Ok(info) if info.success => info,
            Ok(info) => {
                self.forget(&config.id).await;
                return Ok(info);
            }
            Err(err) => {
                self.forget(&config.id).await;
                return Err(err);
            }
        };

        if config.validate_after_preparation {
            let issues = self.validator.validate(config, &info).await;
            if !issues.is_empty() {
                log_workspace_warn!("Validation reported issues", id = %info.id, count = issues.len());
            }
            info.validation_issues.extend(issues);
        }

        if let Err(err) = self.commit(&info).await {
            log_workspace_error!("Failed to record workspace", id = %info.id, error = %err);
            remove_dir(&info.workspace_path).await;
            self.forget(&info.id).await;
            return Err(err);
        }
        Ok(info)
    }

    /// Persist a successful workspace, then narrow its references to the
    /// objects it actually used.
    async fn commit(&self, info: &WorkspaceInfo) -> Result<()> {
        self.upsert(info.clone()).await?;
        if let Some(tracker) = &self.references {
            tracker
                .track_workspace(&info.id, &info.referenced_objects)
                .await?;
        }
        Ok(())
    }

    /// Drop any metadata entry and references for `id`. Best effort.
    async fn forget(&self, id: &str) {
        let removed = async {
            let _guard = self.metadata_lock.lock().await;
            let mut workspaces = self.load().await?;
            let before = workspaces.len();
            workspaces.retain(|w| w.id != id);
            if workspaces.len() != before {
                self.save(&workspaces).await?;
            }
            Ok::<_, WorkspaceError>(())
        }
        .await;
        if let Err(e) = removed {
            log_workspace_warn!("Failed to drop workspace entry", id, error = %e);
        }

        if let Some(tracker) = &self.references {
            if let Err(e) = tracker.untrack_workspace(id).await {
                log_workspace_warn!("Failed to release workspace references", id, error = %e);
            }
        }
    }

    /// Remove a workspace's directory, metadata entry and references.
    /// `false` when the id is unknown.
    pub async fn cleanup_workspace(&self, id: &str) -> Result<bool> {
        let _guard = self.metadata_lock.lock().await;
        let mut workspaces = self.load().await?;
        let Some(index) = workspaces.iter().position(|w| w.id == id) else {
            log_workspace_debug!("Cleanup of unknown workspace", id);
            return Ok(false);
        };
        let info = workspaces.remove(index);

        remove_path(&info.workspace_path).await?;
        self.save(&workspaces).await?;

        if let Some(tracker) = &self.references {
            tracker.untrack_workspace(id).await?;
        }
        log_workspace_info!("Workspace removed", id, path = %info.workspace_path.display());
        Ok(true)
    }

    pub async fn get_all_workspaces(&self) -> Result<Vec<WorkspaceInfo>> {
        self.load().await
    }

    pub async fn get_workspace(&self, id: &str) -> Result<Option<WorkspaceInfo>> {
        Ok(self.load().await?.into_iter().find(|w| w.id == id))
    }

    /// Disk usage the selected strategy would need. Touches no files.
    pub fn estimate_disk_usage(&self, config: &WorkspaceConfiguration) -> Result<u64> {
        Ok(self.select(config)?.estimate_disk_usage(config))
    }

    async fn upsert(&self, info: WorkspaceInfo) -> Result<()> {
        let _guard = self.metadata_lock.lock().await;
        let mut workspaces = self.load().await?;
        match workspaces.iter_mut().find(|w| w.id == info.id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = WorkspaceInfo { created_at, ..info };
            }
            None => workspaces.push(info),
        }
        self.save(&workspaces).await
    }

    async fn load(&self) -> Result<Vec<WorkspaceInfo>> {
        match fs::read(&self.metadata_path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, workspaces: &[WorkspaceInfo]) -> Result<()> {
        if let Some(parent) = self.metadata_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(workspaces)?;
        let tmp = self
            .metadata_path
            .with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, &json).await?;
        if let Err(e) = fs::rename(&tmp, &self.metadata_path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// CAS objects the manifests name up front: CAS entries and downloads that
/// declare their hash.
fn declared_hashes(config: &WorkspaceConfiguration) -> Vec<String> {
    flatten_files(&config.manifests)
        .into_iter()
        .filter(|f| {
            matches!(
                f.source_type,
                ContentSourceType::ContentAddressable | ContentSourceType::Download
            )
        })
        .filter_map(|f| loadout_cas::validate_hash(&f.hash).ok())
        .collect()
}

async fn remove_path(path: &Path) -> Result<()> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || link::remove_existing(&owned))
        .await
        .map_err(std::io::Error::other)??;
    Ok(())
}

async fn remove_dir(path: &Path) {
    if let Err(e) = remove_path(path).await {
        log_workspace_warn!("Failed to remove workspace directory", path = %path.display(), error = %e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NoProgress;
    use loadout_config::testing::TestEnvironment;
    use loadout_manifest::WorkspaceStrategy;

    fn config_for(env: &TestEnvironment, id: &str) -> WorkspaceConfiguration {
        WorkspaceConfiguration::new(
            id,
            WorkspaceStrategy::FullCopy,
            &env.base_installation,
            &env.workspace_root,
        )
    }

    #[tokio::test]
    async fn test_no_strategies() {
        let env = TestEnvironment::new().unwrap();
        let manager = WorkspaceManager::new(Vec::new(), &env);
        let config = config_for(&env, "ws");

        let err = manager
            .prepare_workspace(&config, &NoProgress, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::NoStrategyFound(WorkspaceStrategy::FullCopy)
        ));
        assert!(err.is_configuration_error());
        assert!(matches!(
            manager.estimate_disk_usage(&config),
            Err(WorkspaceError::NoStrategyFound(_))
        ));
    }

    #[tokio::test]
    async fn test_metadata_absent_means_empty() {
        let env = TestEnvironment::new().unwrap();
        let manager = WorkspaceManager::new(Vec::new(), &env);
        assert!(manager.get_all_workspaces().await.unwrap().is_empty());
        assert!(manager.get_workspace("nope").await.unwrap().is_none());
        assert!(!manager.cleanup_workspace("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_keeps_creation_time() {
        let env = TestEnvironment::new().unwrap();
        let manager = WorkspaceManager::new(Vec::new(), &env);
        let config = config_for(&env, "ws");

        let mut first = WorkspaceInfo::for_config(&config);
        first.success = true;
        manager.upsert(first.clone()).await.unwrap();

        let mut second = WorkspaceInfo::for_config(&config);
        second.success = true;
        second.file_count = 7;
        manager.upsert(second).await.unwrap();

        let all = manager.get_all_workspaces().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].file_count, 7);
        assert_eq!(all[0].created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_corrupt_metadata_is_an_error() {
        let env = TestEnvironment::new().unwrap();
        std::fs::write(env.metadata_path(), b"not json").unwrap();
        let manager = WorkspaceManager::new(Vec::new(), &env);
        assert!(matches!(
            manager.get_all_workspaces().await,
            Err(WorkspaceError::Json(_))
        ));
    }

    #[test]
    fn test_declared_hashes_skip_local_and_malformed() {
        use loadout_manifest::{ContentManifest, ManifestFile};

        let env = TestEnvironment::new().unwrap();
        let cas = loadout_cas::hash_bytes(b"cas");
        let remote = loadout_cas::hash_bytes(b"remote");
        let mut download = ManifestFile::local("b.big", 6);
        download.source_type = ContentSourceType::Download;
        download.hash = remote.to_ascii_uppercase();

        let mut manifest = ContentManifest::new("m", "M", "1.0");
        manifest.files = vec![
            ManifestFile::cas("a.big", 3, &cas),
            download,
            ManifestFile::cas("c.big", 1, "xyz"),
            ManifestFile::local("d.ini", 1),
        ];
        let config = config_for(&env, "ws").with_manifest(manifest);

        assert_eq!(declared_hashes(&config), vec![cas, remote]);
    }

    #[tokio::test]
    async fn test_forget_drops_entry_and_references() {
        let env = TestEnvironment::new().unwrap();
        let tracker = Arc::new(CasReferenceTracker::new(&env.cas_root));
        let manager = WorkspaceManager::new(Vec::new(), &env).with_references(tracker.clone());
        let hash = loadout_cas::hash_bytes(b"x");

        let mut info = WorkspaceInfo::for_config(&config_for(&env, "ws"));
        info.success = true;
        info.referenced_objects = vec![hash.clone()];
        manager.commit(&info).await.unwrap();
        assert!(tracker.is_referenced(&hash).await.unwrap());

        manager.forget("ws").await;
        assert!(manager.get_workspace("ws").await.unwrap().is_none());
        assert!(!tracker.is_referenced(&hash).await.unwrap());

        // Unknown ids are a no-op.
        manager.forget("ws").await;
    }
}
