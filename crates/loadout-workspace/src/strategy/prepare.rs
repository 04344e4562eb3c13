//! The preparation loop shared by every strategy.
//!
//! Files are processed strictly in flattened manifest order. Any error or
//! cancellation removes the workspace directory again; content errors come
//! back as a failed [`WorkspaceInfo`], cancellation and configuration errors
//! as `Err`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use loadout_config::{
    log_workspace_debug, log_workspace_error, log_workspace_info, log_workspace_warn,
    HashMismatchPolicy,
};
use loadout_manifest::{checked_relative, ContentManifest, ContentSourceType, ManifestFile};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{flatten_files, lift, resolve_executable, MaterializationStrategy};
use crate::file_ops::FileOpError;
use crate::link::{self, LinkMethod};
use crate::model::{
    IssueType, ProgressReporter, ValidationIssue, WorkspaceConfiguration, WorkspaceInfo,
    WorkspaceProgress,
};
use crate::{Result, WorkspaceError};

#[instrument(skip_all, fields(id = %config.id, strategy = %config.strategy), level = "debug")]
pub async fn run_preparation<S>(
    strategy: &S,
    config: &WorkspaceConfiguration,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<WorkspaceInfo>
where
    S: MaterializationStrategy + ?Sized,
{
    if cancel.is_cancelled() {
        return Err(WorkspaceError::Cancelled);
    }
    ContentManifest::validate_id(&config.id)
        .map_err(|e| WorkspaceError::InvalidConfiguration(e.to_string()))?;

    let started = Instant::now();
    let workspace = config.workspace_path();
    log_workspace_info!(
        "Preparing workspace",
        id = %config.id,
        strategy = strategy.name(),
        manifests = config.manifests.len()
    );

    let mut run = Preparation {
        strategy,
        config,
        workspace: workspace.clone(),
        info: WorkspaceInfo::for_config(config),
        linked_dirs: Vec::new(),
        referenced: HashSet::new(),
        reused: false,
    };

    match run.execute(progress, cancel).await {
        Ok(()) => {
            let mut info = run.info;
            info.success = true;
            log_workspace_info!(
                "Workspace ready",
                id = %info.id,
                files = info.file_count,
                bytes = info.total_size_bytes,
                warnings = info.validation_issues.len(),
                elapsed_ms = started.elapsed().as_millis() as u64
            );
            Ok(info)
        }
        Err(err) => {
            remove_workspace_dir(&workspace).await;
            if matches!(err, WorkspaceError::Cancelled) {
                log_workspace_info!("Workspace preparation cancelled", id = %config.id);
                return Err(err);
            }
            if err.is_configuration_error() {
                return Err(err);
            }
            log_workspace_error!("Workspace preparation failed", id = %config.id, error = %err);

            let mut info = run.info;
            info.success = false;
            info.file_count = 0;
            info.total_size_bytes = 0;
            info.executable_path = None;
            info.referenced_objects.clear();
            info.validation_issues.push(err.to_issue());
            Ok(info)
        }
    }
}

struct Preparation<'a, S: ?Sized> {
    strategy: &'a S,
    config: &'a WorkspaceConfiguration,
    workspace: PathBuf,
    info: WorkspaceInfo,
    /// Workspace-relative directories placed as a single link
    linked_dirs: Vec<PathBuf>,
    referenced: HashSet<String>,
    /// The directory existed before this run
    reused: bool,
}

impl<S> Preparation<'_, S>
where
    S: MaterializationStrategy + ?Sized,
{
    async fn execute(
        &mut self,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.config.force_recreate {
            check(cancel)?;
            remove_workspace_dir(&self.workspace).await;
        }

        check(cancel)?;
        self.reused = tokio::fs::symlink_metadata(&self.workspace).await.is_ok();
        tokio::fs::create_dir_all(&self.workspace).await?;

        let config = self.config;
        let files = flatten_files(&config.manifests);
        self.create_required_directories(&files, cancel).await?;

        let total = files.len() as u64;
        for (index, file) in files.iter().enumerate() {
            check(cancel)?;
            let method = self.process_file(file, cancel).await?;
            if method != LinkMethod::Skipped {
                self.info.file_count += 1;
                self.info.total_size_bytes += file.size;
            }
            progress.report(WorkspaceProgress {
                processed: index as u64 + 1,
                total,
                operation: method.label().to_string(),
                current_file: file.relative_path.clone(),
            });
        }
        if total == 0 {
            progress.report(WorkspaceProgress {
                processed: 0,
                total: 0,
                operation: "Complete".to_string(),
                current_file: String::new(),
            });
        }

        if let Some(exe) = resolve_executable(&config.manifests) {
            if let Ok(rel) = exe.checked_relative_path() {
                let path = self.workspace.join(rel);
                if tokio::fs::metadata(&path).await.is_ok() {
                    self.info.executable_path = Some(path);
                }
            }
        }
        Ok(())
    }

    async fn create_required_directories(
        &mut self,
        files: &[&ManifestFile],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let config = self.config;
        let mut seen = HashSet::new();
        let dirs = config
            .manifests
            .iter()
            .flat_map(|m| m.required_directories.iter())
            .filter(|d| seen.insert(d.as_str()));

        for raw in dirs {
            check(cancel)?;
            let rel = checked_relative(raw).map_err(|_| WorkspaceError::InvalidPath(raw.clone()))?;
            if self.under_linked_dir(&rel) {
                continue;
            }

            let source = config.base_installation_path.join(&rel);
            if self.strategy.links_required_directories()
                && only_own_base_files(&rel, files)
                && tokio::fs::metadata(&source).await.is_ok_and(|m| m.is_dir())
            {
                self.detach_symlinked_ancestors(&rel).await?;
                self.strategy
                    .file_ops()
                    .create_directory_symlink(&source, &self.workspace.join(&rel))
                    .await
                    .map_err(lift)?;
                log_workspace_debug!("Linked directory", dir = %raw);
                self.linked_dirs.push(rel);
                continue;
            }

            self.detach_symlinked_ancestors(&rel).await?;
            let target = self.workspace.join(&rel);
            if self.reused && is_symlink(&target).await {
                remove_path(&target).await?;
            }
            tokio::fs::create_dir_all(&target).await?;
        }
        Ok(())
    }

    async fn process_file(
        &mut self,
        file: &ManifestFile,
        cancel: &CancellationToken,
    ) -> Result<LinkMethod> {
        let rel = file
            .checked_relative_path()
            .map_err(|_| WorkspaceError::InvalidPath(file.relative_path.clone()))?;
        if self.under_linked_dir(&rel) {
            return Ok(LinkMethod::DirectoryLink);
        }
        self.detach_symlinked_ancestors(&rel).await?;
        let target = self.workspace.join(&rel);

        let method = match file.source_type {
            ContentSourceType::ContentAddressable => {
                if file.hash.is_empty() {
                    return self.missing(file, "no content hash declared".to_string());
                }
                let hash = match loadout_cas::validate_hash(&file.hash) {
                    Ok(hash) => hash,
                    Err(err) if !file.is_required => return self.missing(file, err.to_string()),
                    Err(err) => return Err(err.into()),
                };
                if !self.strategy.file_ops().cas_object_exists(&hash).await {
                    return self.missing(file, format!("CAS object {hash} is not stored"));
                }
                let method = self
                    .strategy
                    .create_cas_link(file, &hash, &target, cancel)
                    .await?;
                self.reference(hash);
                method
            }
            ContentSourceType::Download => {
                let Some(url) = file.download_url.as_deref().filter(|u| !u.trim().is_empty())
                else {
                    return self.missing(file, "no download URL".to_string());
                };
                let expected = (!file.hash.is_empty()).then_some(file.hash.as_str());
                let downloaded = self
                    .strategy
                    .file_ops()
                    .download_to_cas(url, expected, cancel)
                    .await;
                let hash = match downloaded {
                    Ok(hash) => hash,
                    Err(FileOpError::Cancelled) => return Err(WorkspaceError::Cancelled),
                    Err(err) if !file.is_required => {
                        return self.missing(file, err.to_string());
                    }
                    Err(err) => return Err(lift(err)),
                };
                let method = self
                    .strategy
                    .create_cas_link(file, &hash, &target, cancel)
                    .await?;
                self.reference(hash);
                method
            }
            ContentSourceType::LocalFile | ContentSourceType::Unknown => {
                let source_rel = checked_relative(file.local_source())
                    .map_err(|_| WorkspaceError::InvalidPath(file.local_source().to_string()))?;
                let source = self.config.base_installation_path.join(source_rel);
                if tokio::fs::metadata(&source).await.is_err() {
                    return self.missing(
                        file,
                        format!("{} not found in base installation", source.display()),
                    );
                }
                let method = self
                    .strategy
                    .process_local_file(file, &source, &target, self.config, cancel)
                    .await?;
                if method.is_copy() {
                    self.verify_copy(file, &target).await?;
                }
                method
            }
        };

        if file.is_executable && method.is_copy() {
            self.strategy
                .file_ops()
                .set_executable(&target)
                .await
                .map_err(lift)?;
        }
        Ok(method)
    }

    /// Required → abort; optional → warning and skip.
    fn missing(&mut self, file: &ManifestFile, reason: String) -> Result<LinkMethod> {
        if file.is_required {
            return Err(WorkspaceError::SourceMissing {
                path: file.relative_path.clone(),
                reason,
            });
        }
        log_workspace_warn!("Skipping optional file", path = %file.relative_path, reason = %reason);
        self.info.validation_issues.push(
            ValidationIssue::warning(
                IssueType::MissingSource,
                format!("Optional file skipped: {reason}"),
            )
            .at(&file.relative_path),
        );
        Ok(LinkMethod::Skipped)
    }

    /// Hash-check a copy of a base-installation file. CAS objects are named
    /// by their content and are not re-hashed.
    async fn verify_copy(&mut self, file: &ManifestFile, target: &Path) -> Result<()> {
        if !self.strategy.options().verify_copied_files || file.hash.is_empty() {
            return Ok(());
        }
        match self
            .strategy
            .file_ops()
            .verify_file_hash(target, &file.hash)
            .await
        {
            Ok(()) => Ok(()),
            Err(FileOpError::HashMismatch {
                expected, actual, ..
            }) => {
                let err = WorkspaceError::HashMismatch {
                    path: file.relative_path.clone(),
                    expected,
                    actual,
                };
                match self.strategy.options().hash_mismatch_policy {
                    HashMismatchPolicy::Fail => Err(err),
                    HashMismatchPolicy::Warn => {
                        log_workspace_warn!("Copied file hash mismatch", path = %file.relative_path);
                        self.info.validation_issues.push(
                            ValidationIssue::warning(IssueType::HashMismatch, err.to_string())
                                .at(&file.relative_path),
                        );
                        Ok(())
                    }
                }
            }
            Err(err) => Err(lift(err)),
        }
    }

    fn reference(&mut self, hash: String) {
        if self.referenced.insert(hash.clone()) {
            self.info.referenced_objects.push(hash);
        }
    }

    fn under_linked_dir(&self, rel: &Path) -> bool {
        self.linked_dirs.iter().any(|dir| rel.starts_with(dir))
    }

    /// In a reused workspace a parent directory may still be a directory
    /// link from an earlier run. Writing through it would land in the base
    /// installation, so such links are removed first.
    async fn detach_symlinked_ancestors(&self, rel: &Path) -> Result<()> {
        if !self.reused {
            return Ok(());
        }
        let mut current = self.workspace.clone();
        let Some(parent) = rel.parent() else {
            return Ok(());
        };
        for component in parent.components() {
            current.push(component);
            match tokio::fs::symlink_metadata(&current).await {
                Ok(meta) if meta.file_type().is_symlink() => {
                    log_workspace_debug!("Removing stale directory link", path = %current.display());
                    remove_path(&current).await?;
                    return Ok(());
                }
                Ok(_) => {}
                Err(_) => return Ok(()),
            }
        }
        Ok(())
    }
}

/// Every flattened file under `dir` is the base file at the same path.
fn only_own_base_files(dir: &Path, files: &[&ManifestFile]) -> bool {
    files.iter().all(|file| {
        let Ok(rel) = file.checked_relative_path() else {
            return true;
        };
        if !rel.starts_with(dir) {
            return true;
        }
        matches!(
            file.source_type,
            ContentSourceType::LocalFile | ContentSourceType::Unknown
        ) && checked_relative(file.local_source()).is_ok_and(|src| src == rel)
    })
}

fn check(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(WorkspaceError::Cancelled)
    } else {
        Ok(())
    }
}

async fn is_symlink(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path)
        .await
        .is_ok_and(|m| m.file_type().is_symlink())
}

async fn remove_path(path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || link::remove_existing(&path))
        .await
        .map_err(std::io::Error::other)??;
    Ok(())
}

/// Best effort; failures are logged.
async fn remove_workspace_dir(workspace: &Path) {
    if let Err(e) = remove_path(workspace).await {
        log_workspace_warn!(
            "Failed to remove workspace directory",
            path = %workspace.display(),
            error = %e
        );
    }
}
