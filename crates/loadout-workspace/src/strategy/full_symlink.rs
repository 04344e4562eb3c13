use std::sync::Arc;

use async_trait::async_trait;
use loadout_manifest::{ManifestFile, WorkspaceStrategy};

use super::{MaterializationStrategy, Placement, StrategyOptions};
use crate::file_ops::FileOperations;

/// Symlinks every file, and links each required directory present in the
/// base installation as a single directory link.
///
/// A directory is only linked wholesale when every manifest file beneath it
/// is that directory's own base file; otherwise placing an override there
/// would write into the base installation. Such directories are created
/// normally and their files linked one by one.
pub struct FullSymlinkStrategy {
    ops: Arc<dyn FileOperations>,
    options: StrategyOptions,
}

impl FullSymlinkStrategy {
    pub fn new(ops: Arc<dyn FileOperations>, options: StrategyOptions) -> Self {
        Self { ops, options }
    }
}

#[async_trait]
impl MaterializationStrategy for FullSymlinkStrategy {
    fn kind(&self) -> WorkspaceStrategy {
        WorkspaceStrategy::FullSymlink
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

    fn links_required_directories(&self) -> bool {
        true
    }
}
