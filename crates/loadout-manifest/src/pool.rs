//! # Manifest Pool
//!
//! Persistent store of acquired [`ContentManifest`] records.
//!
//! ## Layout
//!
//! ```text
//! <content_root>/Manifests/
//! ├── 1.08.ea.gameinstallation.zerohour.manifest.json
//! └── 1.0.community.mod.shockwave.manifest.json
//! ```
//!
//! Each file is written with the write-rename pattern, so a crash never
//! leaves a truncated manifest behind. The pool only stores metadata; file
//! bytes live in the CAS, whose reference tracker is notified through
//! [`ManifestReferenceSink`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{ContentDependency, ContentManifest, ContentType, ManifestError, Result};

const MANIFESTS_DIR: &str = "Manifests";
const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Receives manifest lifecycle events so CAS objects stay protected from
/// garbage collection while a manifest references them.
#[async_trait]
pub trait ManifestReferenceSink: Send + Sync {
    async fn track_manifest(&self, manifest: &ContentManifest) -> anyhow::Result<()>;
    async fn untrack_manifest(&self, manifest_id: &str) -> anyhow::Result<()>;
}

/// Filter for [`ContentManifestPool::search`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ManifestQuery {
    pub content_type: Option<ContentType>,
    pub target_game: Option<String>,
    /// Case-insensitive substring of the manifest name
    pub name: Option<String>,
}

impl ManifestQuery {
    fn matches(&self, manifest: &ContentManifest) -> bool {
        if let Some(ct) = self.content_type {
            if manifest.content_type != ct {
                return false;
            }
        }
        if let Some(game) = &self.target_game {
            if !manifest.target_game.eq_ignore_ascii_case(game) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !manifest.name.to_lowercase().contains(&name.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// In-memory index of manifests on disk, loaded on first use.
#[derive(Debug, Default)]
pub struct ManifestCache {
    entries: RwLock<Option<HashMap<String, ContentManifest>>>,
}

impl ManifestCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn ensure_loaded(&self, dir: &Path) -> Result<()> {
        if self.entries.read().await.is_some() {
            return Ok(());
        }
        let mut guard = self.entries.write().await;
        if guard.is_none() {
            let loaded = load_dir(dir).await?;
            debug!(component = "MANIFEST", count = loaded.len(), "Manifest cache loaded");
            *guard = Some(loaded);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Option<ContentManifest> {
        self.entries
            .read()
            .await
            .as_ref()
            .and_then(|m| m.get(id).cloned())
    }

    async fn insert(&self, manifest: ContentManifest) {
        let mut guard = self.entries.write().await;
        guard
            .get_or_insert_with(HashMap::new)
            .insert(manifest.id.clone(), manifest);
    }

    async fn remove(&self, id: &str) -> Option<ContentManifest> {
        self.entries.write().await.as_mut().and_then(|m| m.remove(id))
    }

    async fn snapshot(&self) -> Vec<ContentManifest> {
        let mut all: Vec<_> = self
            .entries
            .read()
            .await
            .as_ref()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Drop the index; the next access reloads from disk.
    pub async fn invalidate(&self) {
        *self.entries.write().await = None;
    }
}

async fn load_dir(dir: &Path) -> Result<HashMap<String, ContentManifest>> {
    let mut out = HashMap::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_manifest = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(MANIFEST_SUFFIX));
        if !is_manifest {
            continue;
        }
        let bytes = fs::read(&path).await?;
        match serde_json::from_slice::<ContentManifest>(&bytes) {
            Ok(manifest) => {
                out.insert(manifest.id.clone(), manifest);
            }
            Err(e) => {
                warn!(component = "MANIFEST", path = %path.display(), error = %e, "Skipping unreadable manifest");
            }
        }
    }
    Ok(out)
}

/// Persistent, indexed collection of acquired manifests.
pub struct ContentManifestPool {
    manifests_dir: PathBuf,
    cache: ManifestCache,
    references: Option<Arc<dyn ManifestReferenceSink>>,
}

impl ContentManifestPool {
    /// Pool rooted at `<content_root>/Manifests`.
    pub fn new(content_root: impl AsRef<Path>) -> Self {
        Self {
            manifests_dir: content_root.as_ref().join(MANIFESTS_DIR),
            cache: ManifestCache::new(),
            references: None,
        }
    }

    pub fn with_references(mut self, sink: Arc<dyn ManifestReferenceSink>) -> Self {
        self.references = Some(sink);
        self
    }

    pub fn manifests_dir(&self) -> &Path {
        &self.manifests_dir
    }

    fn manifest_path(&self, id: &str) -> PathBuf {
        self.manifests_dir.join(format!("{id}{MANIFEST_SUFFIX}"))
    }

    /// Persist a manifest, replacing any previous version with the same id.
    pub async fn add_manifest(&self, manifest: ContentManifest) -> Result<()> {
        ContentManifest::validate_id(&manifest.id)?;
        for file in &manifest.files {
            file.checked_relative_path()?;
        }
        self.cache.ensure_loaded(&self.manifests_dir).await?;

        // Track before persisting: a leaked reference only delays GC, a
        // missing one lets GC delete live objects.
        if let Some(sink) = &self.references {
            sink.track_manifest(&manifest)
                .await
                .map_err(|e| ManifestError::References {
                    id: manifest.id.clone(),
                    message: e.to_string(),
                })?;
        }

        fs::create_dir_all(&self.manifests_dir).await?;
        let path = self.manifest_path(&manifest.id);
        let tmp = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
        let json = serde_json::to_vec_pretty(&manifest)?;
        fs::write(&tmp, &json).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!(
            component = "MANIFEST",
            id = %manifest.id,
            files = manifest.files.len(),
            "Manifest added to pool"
        );
        self.cache.insert(manifest).await;
        Ok(())
    }

    pub async fn get_manifest(&self, id: &str) -> Result<Option<ContentManifest>> {
        self.cache.ensure_loaded(&self.manifests_dir).await?;
        Ok(self.cache.get(id).await)
    }

    /// All manifests, sorted by id.
    pub async fn get_all_manifests(&self) -> Result<Vec<ContentManifest>> {
        self.cache.ensure_loaded(&self.manifests_dir).await?;
        Ok(self.cache.snapshot().await)
    }

    pub async fn search(&self, query: &ManifestQuery) -> Result<Vec<ContentManifest>> {
        Ok(self
            .get_all_manifests()
            .await?
            .into_iter()
            .filter(|m| query.matches(m))
            .collect())
    }

    pub async fn is_acquired(&self, id: &str) -> Result<bool> {
        Ok(self.get_manifest(id).await?.is_some())
    }

    /// Remove a manifest. Returns `false` if it was not in the pool.
    pub async fn remove_manifest(&self, id: &str) -> Result<bool> {
        self.cache.ensure_loaded(&self.manifests_dir).await?;
        if self.cache.remove(id).await.is_none() {
            return Ok(false);
        }

        match fs::remove_file(self.manifest_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(sink) = &self.references {
            sink.untrack_manifest(id)
                .await
                .map_err(|e| ManifestError::References {
                    id: id.to_string(),
                    message: e.to_string(),
                })?;
        }
        info!(component = "MANIFEST", id, "Manifest removed from pool");
        Ok(true)
    }

    /// Required dependencies of `manifest` that are absent from the pool or
    /// present with a version outside the declared bounds.
    pub async fn missing_dependencies(
        &self,
        manifest: &ContentManifest,
    ) -> Result<Vec<ContentDependency>> {
        let mut missing = Vec::new();
        for dep in manifest.dependencies.iter().filter(|d| !d.is_optional) {
            match self.get_manifest(&dep.id).await? {
                Some(found) if dep.is_satisfied_by(&found.version) => {}
                _ => missing.push(dep.clone()),
            }
        }
        Ok(missing)
    }
}
