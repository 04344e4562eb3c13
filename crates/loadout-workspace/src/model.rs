//! Workspace configuration, results and progress reporting.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use loadout_manifest::{ContentManifest, WorkspaceStrategy};
use serde::{Deserialize, Serialize};

/// Everything needed to prepare one workspace. Transient.
#[derive(Debug, Clone)]
pub struct WorkspaceConfiguration {
    pub id: String,
    pub strategy: WorkspaceStrategy,
    /// Applied in order; later manifests override earlier ones per path
    pub manifests: Vec<ContentManifest>,
    pub base_installation_path: PathBuf,
    pub workspace_root: PathBuf,
    /// Delete an existing workspace directory before preparing
    pub force_recreate: bool,
    pub validate_after_preparation: bool,
}

impl WorkspaceConfiguration {
    pub fn new(
        id: impl Into<String>,
        strategy: WorkspaceStrategy,
        base_installation_path: impl Into<PathBuf>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            strategy,
            manifests: Vec::new(),
            base_installation_path: base_installation_path.into(),
            workspace_root: workspace_root.into(),
            force_recreate: false,
            validate_after_preparation: false,
        }
    }

    pub fn with_manifest(mut self, manifest: ContentManifest) -> Self {
        self.manifests.push(manifest);
        self
    }

    pub fn with_manifests(mut self, manifests: impl IntoIterator<Item = ContentManifest>) -> Self {
        self.manifests.extend(manifests);
        self
    }

    pub fn force_recreate(mut self, force: bool) -> Self {
        self.force_recreate = force;
        self
    }

    pub fn validate_after_preparation(mut self, validate: bool) -> Self {
        self.validate_after_preparation = validate;
        self
    }

    /// `<workspace_root>/<id>`
    pub fn workspace_path(&self) -> PathBuf {
        self.workspace_root.join(&self.id)
    }

    pub fn manifest_ids(&self) -> Vec<String> {
        self.manifests.iter().map(|m| m.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueType {
    MissingFile,
    HashMismatch,
    MissingSource,
    InvalidPath,
    MissingExecutable,
    PreparationFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ValidationIssue {
    pub fn new(issue_type: IssueType, severity: IssueSeverity, message: impl Into<String>) -> Self {
        Self {
            issue_type,
            severity,
            message: message.into(),
            path: None,
        }
    }

    pub fn warning(issue_type: IssueType, message: impl Into<String>) -> Self {
        Self::new(issue_type, IssueSeverity::Warning, message)
    }

    pub fn error(issue_type: IssueType, message: impl Into<String>) -> Self {
        Self::new(issue_type, IssueSeverity::Error, message)
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.message)?;
        if let Some(path) = &self.path {
            write!(f, " ({path})")?;
        }
        Ok(())
    }
}

/// A prepared (or failed) workspace. Successful ones are persisted in the
/// workspace metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub id: String,
    pub workspace_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<PathBuf>,
    pub strategy: WorkspaceStrategy,
    pub manifest_ids: Vec<String>,
    pub success: bool,
    pub file_count: u64,
    pub total_size_bytes: u64,
    #[serde(default)]
    pub validation_issues: Vec<ValidationIssue>,
    /// CAS objects the workspace was built from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_objects: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl WorkspaceInfo {
    /// A fresh record for `config`, not yet successful.
    pub fn for_config(config: &WorkspaceConfiguration) -> Self {
        let now = Utc::now();
        Self {
            id: config.id.clone(),
            workspace_path: config.workspace_path(),
            executable_path: None,
            strategy: config.strategy,
            manifest_ids: config.manifest_ids(),
            success: false,
            file_count: 0,
            total_size_bytes: 0,
            validation_issues: Vec::new(),
            referenced_objects: Vec::new(),
            created_at: now,
            last_accessed: now,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.validation_issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error)
    }
}

/// One progress report from a running preparation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceProgress {
    pub processed: u64,
    pub total: u64,
    /// e.g. "Copying", "Linking"
    pub operation: String,
    pub current_file: String,
}

impl WorkspaceProgress {
    pub fn is_complete(&self) -> bool {
        self.processed == self.total
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Receives progress reports. Implemented for closures.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: WorkspaceProgress);
}

impl<F> ProgressReporter for F
where
    F: Fn(WorkspaceProgress) + Send + Sync,
{
    fn report(&self, progress: WorkspaceProgress) {
        self(progress)
    }
}

/// Discards all reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _progress: WorkspaceProgress) {}
}

/// Forwards reports into an unbounded channel; a closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelProgress(pub tokio::sync::mpsc::UnboundedSender<WorkspaceProgress>);

impl ProgressReporter for ChannelProgress {
    fn report(&self, progress: WorkspaceProgress) {
        let _ = self.0.send(progress);
    }
}
