use std::sync::Arc;

use async_trait::async_trait;
use loadout_manifest::{ManifestFile, WorkspaceStrategy};

use super::{MaterializationStrategy, Placement, StrategyOptions};
use crate::file_ops::FileOperations;

/// Every file is the workspace's own copy. Largest on disk, fully isolated
/// from the base installation.
pub struct FullCopyStrategy {
    ops: Arc<dyn FileOperations>,
    options: StrategyOptions,
}

impl FullCopyStrategy {
    pub fn new(ops: Arc<dyn FileOperations>, options: StrategyOptions) -> Self {
        Self { ops, options }
    }
}

#[async_trait]
impl MaterializationStrategy for FullCopyStrategy {
    fn kind(&self) -> WorkspaceStrategy {
        WorkspaceStrategy::FullCopy
    }

    fn placement(&self, _file: &ManifestFile) -> Placement {
        Placement::Copy
    }

    fn file_ops(&self) -> &dyn FileOperations {
        self.ops.as_ref()
    }

    fn options(&self) -> &StrategyOptions {
        &self.options
    }
}
