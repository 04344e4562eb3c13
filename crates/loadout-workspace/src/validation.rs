//! Post-preparation checks of a workspace tree.

use loadout_config::log_workspace_debug;
use loadout_manifest::ManifestFile;

use crate::model::{IssueType, ValidationIssue, WorkspaceConfiguration, WorkspaceInfo};
use crate::strategy::{flatten_files, resolve_executable};

/// Checks that every manifest file resolves inside the workspace (links are
/// followed, so a dangling link counts as missing) and that the executable
/// is present.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkspaceValidator;

impl WorkspaceValidator {
    pub fn new() -> Self {
        Self
    }

    /// Issues found in the prepared workspace. Optional files already
    /// reported by the preparation are not reported again.
    pub async fn validate(
        &self,
        config: &WorkspaceConfiguration,
        info: &WorkspaceInfo,
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if tokio::fs::metadata(&info.workspace_path).await.is_err() {
            issues.push(
                ValidationIssue::error(IssueType::MissingFile, "Workspace directory is missing")
                    .at(info.workspace_path.display().to_string()),
            );
            return issues;
        }

        for file in flatten_files(&config.manifests) {
            if let Some(issue) = self.check_file(info, file).await {
                issues.push(issue);
            }
        }

        if resolve_executable(&config.manifests).is_some() {
            let present = match &info.executable_path {
                Some(path) => tokio::fs::metadata(path).await.is_ok(),
                None => false,
            };
            if !present {
                issues.push(ValidationIssue::error(
                    IssueType::MissingExecutable,
                    "Game executable is not present in the workspace",
                ));
            }
        }

        log_workspace_debug!("Workspace validated", id = %info.id, issues = issues.len());
        issues
    }

    async fn check_file(&self, info: &WorkspaceInfo, file: &ManifestFile) -> Option<ValidationIssue> {
        let Ok(rel) = file.checked_relative_path() else {
            return Some(
                ValidationIssue::error(IssueType::InvalidPath, "Invalid relative path")
                    .at(&file.relative_path),
            );
        };
        if tokio::fs::metadata(info.workspace_path.join(rel)).await.is_ok() {
            return None;
        }
        if file.is_required {
            return Some(
                ValidationIssue::error(IssueType::MissingFile, "Required file is missing")
                    .at(&file.relative_path),
            );
        }
        let already_reported = info
            .validation_issues
            .iter()
            .any(|i| i.path.as_deref() == Some(file.relative_path.as_str()));
        (!already_reported).then(|| {
            ValidationIssue::warning(IssueType::MissingFile, "Optional file is missing")
                .at(&file.relative_path)
        })
    }
}
