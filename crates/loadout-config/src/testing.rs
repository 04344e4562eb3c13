//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Temporary content, CAS and workspace roots
//! - A fake base game installation to materialize from
//!
//! # Usage
//!
//! ```ignore
//! use loadout_config::testing::TestEnvironment;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     env.create_base_file("game.exe", b"MZ...").unwrap();
//!     // env.cas_root, env.workspace_root, ... are all isolated
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use loadout_manifest::WorkspaceStrategy;
use tempfile::TempDir;

use crate::path::safe_join;
use crate::{Config, ConfigurationProvider};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Manifests and workspace metadata
    pub content_root: PathBuf,
    /// Isolated CAS root directory
    pub cas_root: PathBuf,
    /// Where workspaces are created
    pub workspace_root: PathBuf,
    /// Fake base game installation
    pub base_installation: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let content_root = root.join("content");
        let cas_root = content_root.join("cas");
        let workspace_root = root.join("workspaces");
        let base_installation = root.join("base");

        std::fs::create_dir_all(&content_root)?;
        std::fs::create_dir_all(&cas_root)?;
        std::fs::create_dir_all(&workspace_root)?;
        std::fs::create_dir_all(&base_installation)?;

        Ok(Self {
            _temp_dir: temp_dir,
            content_root,
            cas_root,
            workspace_root,
            base_installation,
            test_id,
        })
    }

    /// Workspace metadata file path
    pub fn metadata_path(&self) -> PathBuf {
        self.content_root.join(crate::WORKSPACE_METADATA_FILE)
    }

    /// Create a file in the base installation
    pub fn create_base_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = safe_join(&self.base_installation, relative_path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Create a directory in the base installation
    pub fn create_base_dir(&self, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = safe_join(&self.base_installation, relative_path)?;
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// A `Config` pointing at this environment's directories.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.storage.content_root = self.content_root.clone();
        cfg.storage.cas_root = Some(self.cas_root.clone());
        cfg.storage.workspace_root = self.workspace_root.clone();
        cfg.cas.lock_retry_delay_ms = 10;
        cfg
    }
}

impl ConfigurationProvider for TestEnvironment {
    fn content_storage_root(&self) -> PathBuf {
        self.content_root.clone()
    }

    fn cas_root(&self) -> PathBuf {
        self.cas_root.clone()
    }

    fn workspace_root(&self) -> PathBuf {
        self.workspace_root.clone()
    }

    fn default_strategy(&self) -> WorkspaceStrategy {
        WorkspaceStrategy::HybridCopySymlink
    }
}
