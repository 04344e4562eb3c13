//! # loadout-config
//!
//! Configuration management for Loadout.
//!
//! Loads configuration from:
//! 1. `~/.loadout/config.toml` (global)
//! 2. `.loadout/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod path;
pub mod testing;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{RwLock, RwLockReadGuard};
use std::time::Duration;

use loadout_manifest::WorkspaceStrategy;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default content storage root (tilde-expanded on load)
pub const DEFAULT_CONTENT_ROOT: &str = "~/.loadout/content";

/// Default root under which workspaces are materialized
pub const DEFAULT_WORKSPACE_ROOT: &str = "~/.loadout/workspaces";

/// Name of the workspace metadata file under the content root
pub const WORKSPACE_METADATA_FILE: &str = "workspaces.json";

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| {
    RwLock::new(Config::load().unwrap_or_else(|e| {
        warn!(component = "CONFIG", error = %e, "Falling back to default config");
        Config::default()
    }))
});

/// Get global config (read-only)
pub fn config() -> RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Source of the filesystem locations and defaults the core needs.
///
/// The core never reads the environment or config files itself; it is handed
/// something implementing this trait.
pub trait ConfigurationProvider: Send + Sync {
    fn content_storage_root(&self) -> PathBuf;
    fn cas_root(&self) -> PathBuf;
    fn workspace_root(&self) -> PathBuf;
    fn default_strategy(&self) -> WorkspaceStrategy;

    /// Path of the workspace metadata JSON list.
    fn workspace_metadata_path(&self) -> PathBuf {
        self.content_storage_root().join(WORKSPACE_METADATA_FILE)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub cas: CasSettings,
    pub workspace: WorkspaceSettings,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.loadout/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        // 2. Load project config (.loadout/config.toml) - overrides global
        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let contents = std::fs::read_to_string(&project_path)?;
            let table: toml::Table = toml::from_str(&contents)?;
            let project_config: Config = toml::from_str(&contents)?;
            config.merge(project_config, &table);
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();
        config.expand_paths();

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.expand_paths();
        Ok(config)
    }

    /// Global config path: ~/.loadout/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".loadout/config.toml"))
    }

    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".loadout/config.toml")
    }

    /// Merge a project config over this one. Only sections present in the
    /// project file (`raw`) replace the global values.
    fn merge(&mut self, other: Config, raw: &toml::Table) {
        if raw.contains_key("storage") {
            self.storage = other.storage;
        }
        if raw.contains_key("cas") {
            self.cas = other.cas;
        }
        if raw.contains_key("workspace") {
            self.workspace = other.workspace;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("LOADOUT_CONTENT_ROOT") {
            self.storage.content_root = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("LOADOUT_CAS_ROOT") {
            self.storage.cas_root = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("LOADOUT_WORKSPACE_ROOT") {
            self.storage.workspace_root = PathBuf::from(path);
        }
        if let Ok(strategy) = std::env::var("LOADOUT_STRATEGY") {
            match WorkspaceStrategy::from_str(&strategy) {
                Ok(s) => self.workspace.default_strategy = s,
                Err(e) => warn!(component = "CONFIG", error = %e, "Ignoring LOADOUT_STRATEGY"),
            }
        }
    }

    fn expand_paths(&mut self) {
        self.storage.content_root = path::expand_tilde(&self.storage.content_root);
        self.storage.workspace_root = path::expand_tilde(&self.storage.workspace_root);
        if let Some(cas) = &self.storage.cas_root {
            self.storage.cas_root = Some(path::expand_tilde(cas));
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Config::default().to_toml()
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl ConfigurationProvider for Config {
    fn content_storage_root(&self) -> PathBuf {
        self.storage.content_root.clone()
    }

    fn cas_root(&self) -> PathBuf {
        self.storage
            .cas_root
            .clone()
            .unwrap_or_else(|| self.storage.content_root.join("cas"))
    }

    fn workspace_root(&self) -> PathBuf {
        self.storage.workspace_root.clone()
    }

    fn default_strategy(&self) -> WorkspaceStrategy {
        self.workspace.default_strategy
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for manifests and workspace metadata
    pub content_root: PathBuf,
    /// CAS root; `<content_root>/cas` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cas_root: Option<PathBuf>,
    /// Directory under which workspaces are created
    pub workspace_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from(DEFAULT_CONTENT_ROOT),
            cas_root: None,
            workspace_root: PathBuf::from(DEFAULT_WORKSPACE_ROOT),
        }
    }
}

/// CAS behaviour: locking, verification, GC cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CasSettings {
    /// Recompute the hash of every stored object before committing it
    pub verify_integrity: bool,
    pub lock_retry_attempts: u32,
    pub lock_retry_delay_ms: u64,
    pub enable_gc: bool,
    /// Unreferenced objects younger than this survive GC
    pub gc_grace_period_hours: u64,
    pub maintenance_interval_minutes: u64,
    pub integrity_check_interval_days: u64,
}

impl Default for CasSettings {
    fn default() -> Self {
        Self {
            verify_integrity: true,
            lock_retry_attempts: 50,
            lock_retry_delay_ms: 100,
            enable_gc: true,
            gc_grace_period_hours: 24,
            maintenance_interval_minutes: 60,
            integrity_check_interval_days: 7,
        }
    }
}

impl CasSettings {
    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }

    pub fn gc_grace_period(&self) -> Duration {
        Duration::from_secs(self.gc_grace_period_hours.saturating_mul(3600))
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_minutes.max(1).saturating_mul(60))
    }

    pub fn integrity_check_interval(&self) -> Duration {
        Duration::from_secs(self.integrity_check_interval_days.saturating_mul(24 * 3600))
    }
}

/// What to do when a copied file's hash does not match its manifest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashMismatchPolicy {
    /// Record a warning issue and keep the file
    #[default]
    Warn,
    /// Abort the preparation
    Fail,
}

/// Workspace materialization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    pub default_strategy: WorkspaceStrategy,
    /// Files smaller than this are always copied by the hybrid strategy
    pub essential_size_threshold: u64,
    /// Disk usage charged per link when estimating
    pub link_overhead_bytes: u64,
    /// Hash-check copied files that declare a hash
    pub verify_copied_files: bool,
    pub hash_mismatch_policy: HashMismatchPolicy,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            default_strategy: WorkspaceStrategy::HybridCopySymlink,
            essential_size_threshold: 1024 * 1024,
            link_overhead_bytes: 1024,
            verify_copied_files: true,
            hash_mismatch_policy: HashMismatchPolicy::Warn,
        }
    }
}
