use std::sync::Arc;

use async_trait::async_trait;
use loadout_manifest::{ManifestFile, WorkspaceStrategy};

use super::{MaterializationStrategy, Placement, StrategyOptions};
use crate::file_ops::FileOperations;

/// Hard links every file to its source. When the workspace is on another
/// device the link degrades to a copy, so the estimate is a lower bound
/// there.
///
/// CAS objects are read-only; hard links to them share that mode.
pub struct HardLinkStrategy {
    ops: Arc<dyn FileOperations>,
    options: StrategyOptions,
}

impl HardLinkStrategy {
    pub fn new(ops: Arc<dyn FileOperations>, options: StrategyOptions) -> Self {
        Self { ops, options }
    }
}

#[async_trait]
impl MaterializationStrategy for HardLinkStrategy {
    fn kind(&self) -> WorkspaceStrategy {
        WorkspaceStrategy::HardLink
    }

    fn placement(&self, _file: &ManifestFile) -> Placement {
        Placement::HardLink
    }

    fn file_ops(&self) -> &dyn FileOperations {
        self.ops.as_ref()
    }

    fn options(&self) -> &StrategyOptions {
        &self.options
    }
}
