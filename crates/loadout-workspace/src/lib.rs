//! # loadout-workspace
//!
//! Turns a list of [`ContentManifest`](loadout_manifest::ContentManifest)s
//! into a runnable directory tree.
//!
//! A [`WorkspaceManager`] picks the [`MaterializationStrategy`] matching the
//! requested [`WorkspaceStrategy`](loadout_manifest::WorkspaceStrategy) and
//! lets it place every file: copied, hard linked or symlinked, sourced from
//! the CAS, the base game installation, or a download.
//!
//! ```text
//! WorkspaceConfiguration ──► WorkspaceManager ──► strategy.prepare()
//!                                  │                    │ per file, in order
//!                                  │                    ▼
//!                                  │            FileOperations (copy / link / CAS)
//!                                  ▼
//!                    workspaces.json + CAS reference records
//! ```

pub mod classifier;
pub mod file_ops;
pub mod link;
pub mod manager;
pub mod model;
pub mod strategy;
pub mod validation;

pub use classifier::{EssentialFileClassifier, LINK_OVERHEAD_BYTES};
pub use file_ops::{FileOpError, FileOperations, FileOperationsService, LinkKind};
pub use link::LinkMethod;
pub use manager::WorkspaceManager;
pub use model::{
    ChannelProgress, IssueSeverity, IssueType, NoProgress, ProgressReporter, ValidationIssue,
    WorkspaceConfiguration, WorkspaceInfo, WorkspaceProgress,
};
pub use strategy::{
    default_strategies, FullCopyStrategy, FullSymlinkStrategy, HardLinkStrategy,
    HybridCopySymlinkStrategy, MaterializationStrategy, Placement, StrategyOptions,
    SymlinkOnlyStrategy,
};
pub use validation::WorkspaceValidator;

use std::io;

use loadout_cas::CasError;
use loadout_manifest::WorkspaceStrategy;
use thiserror::Error;

/// Errors that can occur while preparing or managing workspaces
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("No registered strategy handles {0}")]
    NoStrategyFound(WorkspaceStrategy),

    #[error("Invalid workspace configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Workspace preparation cancelled")]
    Cancelled,

    #[error("Source missing for {path}: {reason}")]
    SourceMissing { path: String, reason: String },

    #[error("Invalid path in manifest: {0:?}")]
    InvalidPath(String),

    #[error("Hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("CAS error: {0}")]
    Cas(#[from] CasError),

    #[error(transparent)]
    FileOp(#[from] FileOpError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkspaceError {
    /// Errors in the request itself rather than in the content; these are
    /// returned as `Err` instead of a failed [`WorkspaceInfo`].
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            WorkspaceError::NoStrategyFound(_) | WorkspaceError::InvalidConfiguration(_)
        )
    }

    /// Relative path the error concerns, when known.
    pub fn path(&self) -> Option<&str> {
        match self {
            WorkspaceError::SourceMissing { path, .. }
            | WorkspaceError::HashMismatch { path, .. }
            | WorkspaceError::InvalidPath(path) => Some(path.as_str()),
            _ => None,
        }
    }

    /// Validation issue describing this error in a failed [`WorkspaceInfo`].
    pub fn to_issue(&self) -> ValidationIssue {
        let issue_type = match self {
            WorkspaceError::SourceMissing { .. } => IssueType::MissingSource,
            WorkspaceError::InvalidPath(_) => IssueType::InvalidPath,
            WorkspaceError::HashMismatch { .. } => IssueType::HashMismatch,
            WorkspaceError::Cas(CasError::ObjectNotFound { .. }) => IssueType::MissingSource,
            WorkspaceError::Cas(CasError::IntegrityMismatch { .. }) => IssueType::HashMismatch,
            WorkspaceError::FileOp(FileOpError::SourceNotFound(_)) => IssueType::MissingSource,
            WorkspaceError::FileOp(FileOpError::HashMismatch { .. }) => IssueType::HashMismatch,
            WorkspaceError::FileOp(FileOpError::Cas(CasError::ObjectNotFound { .. })) => {
                IssueType::MissingSource
            }
            WorkspaceError::FileOp(FileOpError::Cas(CasError::IntegrityMismatch { .. })) => {
                IssueType::HashMismatch
            }
            _ => IssueType::PreparationFailed,
        };
        let issue = ValidationIssue::error(issue_type, self.to_string());
        match self.path() {
            Some(path) => issue.at(path),
            None => issue,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;
