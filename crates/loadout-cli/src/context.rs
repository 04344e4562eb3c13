//! Shared handles every command works with.

use std::sync::Arc;

use anyhow::{Context, Result};
use loadout_cas::{CasOptions, CasReferenceTracker, CasStorage};
use loadout_config::{log_cli_debug, Config, ConfigurationProvider};
use loadout_manifest::ContentManifestPool;
use loadout_workspace::WorkspaceManager;

pub struct AppContext {
    pub config: Config,
    pub storage: Arc<CasStorage>,
    pub tracker: Arc<CasReferenceTracker>,
    pub pool: ContentManifestPool,
    pub workspaces: WorkspaceManager,
}

impl AppContext {
    /// Open the store and pool described by `config`, creating directories
    /// as needed.
    pub fn open(config: Config) -> Result<Self> {
        let cas_root = config.cas_root();
        log_cli_debug!("Opening content store", content_root = %config.content_storage_root().display(), cas_root = %cas_root.display());

        let storage = Arc::new(
            CasStorage::new(&cas_root, CasOptions::from(&config.cas))
                .with_context(|| format!("Failed to open CAS at {}", cas_root.display()))?,
        );
        let tracker = Arc::new(CasReferenceTracker::new(&cas_root));
        let pool = ContentManifestPool::new(config.content_storage_root())
            .with_references(tracker.clone());
        let workspaces = WorkspaceManager::with_defaults(&config, storage.clone(), tracker.clone());

        Ok(Self {
            config,
            storage,
            tracker,
            pool,
            workspaces,
        })
    }
}
