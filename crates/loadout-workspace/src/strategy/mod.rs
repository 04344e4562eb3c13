//! Materialization strategies.
//!
//! A strategy decides, per manifest file, whether the workspace gets its own
//! copy or a link back to the source. The preparation loop itself
//! ([`prepare::run_preparation`]) is shared; variants differ only in their
//! [`Placement`] policy and in whether required directories are linked
//! wholesale.
//!
//! | Strategy              | Placement                                  |
//! |-----------------------|--------------------------------------------|
//! | [`FullCopyStrategy`]  | copy (reflink when supported)              |
//! | [`SymlinkOnlyStrategy`] | symlink                                  |
//! | [`HybridCopySymlinkStrategy`] | copy essential files, symlink others |
//! | [`FullSymlinkStrategy`] | symlink, plus whole-directory links      |
//! | [`HardLinkStrategy`]  | hard link, copy across devices             |

mod full_copy;
mod full_symlink;
mod hard_link;
mod hybrid;
pub mod prepare;
mod symlink_only;

pub use full_copy::FullCopyStrategy;
pub use full_symlink::FullSymlinkStrategy;
pub use hard_link::HardLinkStrategy;
pub use hybrid::HybridCopySymlinkStrategy;
pub use symlink_only::SymlinkOnlyStrategy;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use loadout_config::{HashMismatchPolicy, WorkspaceSettings};
use loadout_manifest::{checked_relative, ContentManifest, ContentSourceType, ManifestFile, WorkspaceStrategy};
use tokio_util::sync::CancellationToken;

use crate::classifier::{EssentialFileClassifier, LINK_OVERHEAD_BYTES};
use crate::file_ops::{FileOpError, FileOperations, LinkKind};
use crate::link::LinkMethod;
use crate::model::{ProgressReporter, WorkspaceConfiguration, WorkspaceInfo};
use crate::{Result, WorkspaceError};

/// What a strategy does with one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Copy,
    Symlink,
    HardLink,
}

/// Tunables shared by every strategy.
#[derive(Debug, Clone)]
pub struct StrategyOptions {
    pub classifier: EssentialFileClassifier,
    pub link_overhead_bytes: u64,
    /// Hash-check copied files that declare a hash
    pub verify_copied_files: bool,
    pub hash_mismatch_policy: HashMismatchPolicy,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            classifier: EssentialFileClassifier::default(),
            link_overhead_bytes: LINK_OVERHEAD_BYTES,
            verify_copied_files: true,
            hash_mismatch_policy: HashMismatchPolicy::Warn,
        }
    }
}

impl From<&WorkspaceSettings> for StrategyOptions {
    fn from(settings: &WorkspaceSettings) -> Self {
        Self {
            classifier: EssentialFileClassifier::new(settings.essential_size_threshold),
            link_overhead_bytes: settings.link_overhead_bytes,
            verify_copied_files: settings.verify_copied_files,
            hash_mismatch_policy: settings.hash_mismatch_policy,
        }
    }
}

#[async_trait]
pub trait MaterializationStrategy: Send + Sync {
    fn kind(&self) -> WorkspaceStrategy;

    /// Name for logging
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    fn can_handle(&self, config: &WorkspaceConfiguration) -> bool {
        config.strategy == self.kind()
    }

    fn placement(&self, file: &ManifestFile) -> Placement;

    /// Placement of a file whose bytes come from the CAS. Objects are
    /// stored read-only without execute bits, so executables always get
    /// their own copy.
    fn store_placement(&self, file: &ManifestFile) -> Placement {
        if file.is_executable {
            Placement::Copy
        } else {
            self.placement(file)
        }
    }

    fn file_ops(&self) -> &dyn FileOperations;

    fn options(&self) -> &StrategyOptions;

    /// Link required directories that exist in the base installation as a
    /// whole instead of creating them.
    fn links_required_directories(&self) -> bool {
        false
    }

    /// Bytes the workspace will occupy: full size for copies, a fixed
    /// overhead per link. Touches no files.
    fn estimate_disk_usage(&self, config: &WorkspaceConfiguration) -> u64 {
        let overhead = self.options().link_overhead_bytes;
        flatten_files(&config.manifests)
            .iter()
            .map(|file| match placement_for(self, file) {
                Placement::Copy => file.size,
                Placement::Symlink | Placement::HardLink => overhead,
            })
            .sum()
    }

    /// Place a CAS-backed file at `target`.
    async fn create_cas_link(
        &self,
        file: &ManifestFile,
        hash: &str,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<LinkMethod> {
        if cancel.is_cancelled() {
            return Err(WorkspaceError::Cancelled);
        }
        let ops = self.file_ops();
        let placed = match self.store_placement(file) {
            Placement::Copy => ops.copy_from_cas(hash, target).await,
            Placement::Symlink => ops.link_from_cas(hash, target, LinkKind::Symlink).await,
            Placement::HardLink => ops.link_from_cas(hash, target, LinkKind::Hardlink).await,
        };
        placed.map_err(lift)
    }

    /// Place a base-installation file at `target`.
    async fn process_local_file(
        &self,
        file: &ManifestFile,
        source: &Path,
        target: &Path,
        _config: &WorkspaceConfiguration,
        cancel: &CancellationToken,
    ) -> Result<LinkMethod> {
        if cancel.is_cancelled() {
            return Err(WorkspaceError::Cancelled);
        }
        let ops = self.file_ops();
        let placed = match self.placement(file) {
            Placement::Copy => ops.copy_file(source, target).await,
            Placement::Symlink => ops.create_symlink(source, target).await,
            Placement::HardLink => ops.create_hardlink(source, target).await,
        };
        placed.map_err(lift)
    }

    async fn prepare(
        &self,
        config: &WorkspaceConfiguration,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceInfo> {
        prepare::run_preparation(self, config, progress, cancel).await
    }
}

/// The placement preparation will use for `file`, by source.
fn placement_for<S: MaterializationStrategy + ?Sized>(strategy: &S, file: &ManifestFile) -> Placement {
    match file.source_type {
        ContentSourceType::ContentAddressable | ContentSourceType::Download => {
            strategy.store_placement(file)
        }
        ContentSourceType::LocalFile | ContentSourceType::Unknown => strategy.placement(file),
    }
}

/// File-operation errors at the strategy boundary. Cancellation is never
/// wrapped.
pub(crate) fn lift(err: FileOpError) -> WorkspaceError {
    match err {
        FileOpError::Cancelled => WorkspaceError::Cancelled,
        other => WorkspaceError::FileOp(other),
    }
}

/// All manifests' files in order. A later manifest's entry for a path
/// replaces the earlier entry where that entry stood.
pub fn flatten_files(manifests: &[ContentManifest]) -> Vec<&ManifestFile> {
    let mut files: Vec<&ManifestFile> = Vec::new();
    let mut index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for file in manifests.iter().flat_map(|m| m.files.iter()) {
        match index.get(&path_key(&file.relative_path)) {
            Some(&slot) => files[slot] = file,
            None => {
                index.insert(path_key(&file.relative_path), files.len());
                files.push(file);
            }
        }
    }
    files
}

/// Override key: the sanitized path joined with `/`, so every spelling that
/// places the same file shares one key. Invalid paths keep their raw text
/// and fail later when placed.
fn path_key(relative_path: &str) -> String {
    match checked_relative(relative_path) {
        Ok(path) => path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => relative_path.to_string(),
    }
}

/// The first executable of the first installation or client manifest, else
/// the first executable anywhere.
pub fn resolve_executable(manifests: &[ContentManifest]) -> Option<&ManifestFile> {
    fn first_exe(manifest: &ContentManifest) -> Option<&ManifestFile> {
        manifest.files.iter().find(|f| f.is_executable)
    }
    manifests
        .iter()
        .filter(|m| m.content_type.provides_executable())
        .find_map(first_exe)
        .or_else(|| manifests.iter().find_map(first_exe))
}

/// One instance of every strategy sharing `ops`.
pub fn default_strategies(
    ops: Arc<dyn FileOperations>,
    options: StrategyOptions,
) -> Vec<Arc<dyn MaterializationStrategy>> {
    vec![
        Arc::new(FullCopyStrategy::new(ops.clone(), options.clone())),
        Arc::new(SymlinkOnlyStrategy::new(ops.clone(), options.clone())),
        Arc::new(HybridCopySymlinkStrategy::new(ops.clone(), options.clone())),
        Arc::new(FullSymlinkStrategy::new(ops.clone(), options.clone())),
        Arc::new(HardLinkStrategy::new(ops, options)),
    ]
}
