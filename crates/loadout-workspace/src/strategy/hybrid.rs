use std::sync::Arc;

use async_trait::async_trait;
use loadout_manifest::{ManifestFile, WorkspaceStrategy};

use super::{MaterializationStrategy, Placement, StrategyOptions};
use crate::file_ops::FileOperations;

/// Copies essential files and symlinks the rest.
///
/// Placement goes through the same classifier call as estimation, so the
/// estimate always describes the split preparation performs.
pub struct HybridCopySymlinkStrategy {
    ops: Arc<dyn FileOperations>,
    options: StrategyOptions,
}

impl HybridCopySymlinkStrategy {
    pub fn new(ops: Arc<dyn FileOperations>, options: StrategyOptions) -> Self {
        Self { ops, options }
    }
}

#[async_trait]
impl MaterializationStrategy for HybridCopySymlinkStrategy {
    fn kind(&self) -> WorkspaceStrategy {
        WorkspaceStrategy::HybridCopySymlink
    }

    fn placement(&self, file: &ManifestFile) -> Placement {
        if self
            .options
            .classifier
            .is_essential(&file.relative_path, file.size)
        {
            Placement::Copy
        } else {
            Placement::Symlink
        }
    }

    fn file_ops(&self) -> &dyn FileOperations {
        self.ops.as_ref()
    }

    fn options(&self) -> &StrategyOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkspaceConfiguration;
    use crate::FileOperationsService;
    use loadout_cas::{CasOptions, CasStorage};
    use loadout_manifest::ContentManifest;

    #[test]
    fn test_estimate_matches_classification() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CasStorage::new(dir.path().join("cas"), CasOptions::default()).unwrap();
        let ops = Arc::new(FileOperationsService::new(Arc::new(storage)));
        let strategy = HybridCopySymlinkStrategy::new(ops, StrategyOptions::default());

        let mut manifest = ContentManifest::new("game", "Game", "1.0");
        manifest.files = vec![
            ManifestFile::local("game.exe", 1_000_000),
            ManifestFile::local("config.ini", 1_000),
            ManifestFile::local("textures/large.tga", 5_000_000),
            ManifestFile::local("sounds/music.wav", 10_000_000),
        ];
        let config = WorkspaceConfiguration::new(
            "ws",
            WorkspaceStrategy::HybridCopySymlink,
            dir.path().join("base"),
            dir.path().join("workspaces"),
        )
        .with_manifest(manifest.clone());

        assert_eq!(strategy.estimate_disk_usage(&config), 1_003_048);
        let placements: Vec<_> = manifest.files.iter().map(|f| strategy.placement(f)).collect();
        assert_eq!(
            placements,
            [
                Placement::Copy,
                Placement::Copy,
                Placement::Symlink,
                Placement::Symlink
            ]
        );
        // Nothing was created by estimating.
        assert!(!dir.path().join("workspaces").exists());
    }
}
