use std::sync::Arc;

use async_trait::async_trait;
use loadout_manifest::{ManifestFile, WorkspaceStrategy};

use super::{MaterializationStrategy, Placement, StrategyOptions};
use crate::file_ops::FileOperations;

/// Every file is a symlink to its source.
pub struct SymlinkOnlyStrategy {
    ops: Arc<dyn FileOperations>,
    options: StrategyOptions,
}

impl SymlinkOnlyStrategy {
    pub fn new(ops: Arc<dyn FileOperations>, options: StrategyOptions) -> Self {
        Self { ops, options }
    }
}

#[async_trait]
impl MaterializationStrategy for SymlinkOnlyStrategy {
    fn kind(&self) -> WorkspaceStrategy {
        WorkspaceStrategy::SymlinkOnly
    }

    fn placement(&self, _file: &ManifestFile) -> Placement {
        Placement::Symlink
    }

    fn file_ops(&self) -> &dyn FileOperations {
        self.ops.as_ref()
    }

    fn options(&self) -> &StrategyOptions {
        &self.options
    }
}
