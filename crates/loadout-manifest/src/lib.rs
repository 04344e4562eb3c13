//! # loadout-manifest
//!
//! Declarative descriptions of acquirable game content.
//!
//! A [`ContentManifest`] lists every file a unit of content (base game, mod,
//! patch, map pack) contributes to a workspace, where each file comes from
//! (the CAS, the base installation, or a download), and which other manifests
//! it depends on. Manifests are immutable once created; the
//! [`ContentManifestPool`] persists them as one JSON file each.

pub mod pool;
pub mod strategy;
pub mod version;

pub use pool::{ContentManifestPool, ManifestCache, ManifestQuery, ManifestReferenceSink};
pub use strategy::WorkspaceStrategy;

use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during manifest operations
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid manifest id: {0:?}")]
    InvalidId(String),

    #[error("Invalid relative path in manifest: {0:?}")]
    InvalidPath(String),

    #[error("Reference tracking failed for manifest {id}: {message}")]
    References { id: String, message: String },
}

pub type Result<T> = std::result::Result<T, ManifestError>;

/// Where the bytes of a [`ManifestFile`] come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ContentSourceType {
    /// Relative to the base installation directory.
    LocalFile,
    /// A CAS object addressed by the file's hash.
    ContentAddressable,
    /// Fetched from `download_url`, then stored in the CAS.
    Download,
    #[default]
    Unknown,
}

/// Kind of content a manifest describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ContentType {
    GameInstallation,
    GameClient,
    Mod,
    Patch,
    Addon,
    MapPack,
    Mission,
    #[default]
    Unknown,
}

impl ContentType {
    /// Whether this content can provide the game executable.
    pub fn provides_executable(self) -> bool {
        matches!(self, ContentType::GameInstallation | ContentType::GameClient)
    }
}

/// One entry in a manifest's file list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ManifestFile {
    /// Workspace-root-relative path, `/` separated
    pub relative_path: String,
    /// File size in bytes
    pub size: u64,
    /// Lowercase hex SHA-256 of the content, empty when unknown
    pub hash: String,
    pub source_type: ContentSourceType,
    pub is_executable: bool,
    pub is_required: bool,
    /// Base-installation relative path when it differs from `relative_path`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl ManifestFile {
    /// A base-installation file at the same relative path in the workspace.
    pub fn local(relative_path: impl Into<String>, size: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            size,
            source_type: ContentSourceType::LocalFile,
            is_required: true,
            ..Default::default()
        }
    }

    /// A file backed by the CAS object `hash`.
    pub fn cas(relative_path: impl Into<String>, size: u64, hash: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            size,
            hash: hash.into(),
            source_type: ContentSourceType::ContentAddressable,
            is_required: true,
            ..Default::default()
        }
    }

    pub fn executable(mut self) -> Self {
        self.is_executable = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_required = false;
        self
    }

    /// Path of the source relative to the base installation.
    pub fn local_source(&self) -> &str {
        self.source_path.as_deref().unwrap_or(&self.relative_path)
    }

    pub fn is_cas_backed(&self) -> bool {
        self.source_type == ContentSourceType::ContentAddressable
    }

    /// The relative path as a platform path, rejecting anything that could
    /// escape the directory it is joined onto.
    pub fn checked_relative_path(&self) -> Result<PathBuf> {
        checked_relative(&self.relative_path)
    }
}

/// Validate a manifest-relative path: not empty, not absolute, no `..`.
pub fn checked_relative(raw: &str) -> Result<PathBuf> {
    let trimmed = raw.trim_start_matches("./");
    if trimmed.is_empty() || trimmed.starts_with(['/', '\\']) {
        return Err(ManifestError::InvalidPath(raw.to_string()));
    }
    let mut out = PathBuf::new();
    for part in trimmed.split(['/', '\\']) {
        if part.is_empty() || part == "." {
            continue;
        }
        let component = Path::new(part).components().next();
        match component {
            Some(Component::Normal(_)) if !part.contains(':') => out.push(part),
            _ => return Err(ManifestError::InvalidPath(raw.to_string())),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(ManifestError::InvalidPath(raw.to_string()));
    }
    Ok(out)
}

/// A required (or optional) link to another manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentDependency {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_version: Option<String>,
    pub is_optional: bool,
}

impl ContentDependency {
    /// Check `version` against the inclusive min/max bounds.
    pub fn is_satisfied_by(&self, version: &str) -> bool {
        let above_min = self
            .min_version
            .as_deref()
            .map_or(true, |min| version::compare(version, min).is_ge());
        let below_max = self
            .max_version
            .as_deref()
            .map_or(true, |max| version::compare(version, max).is_le());
        above_min && below_max
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallationInstructions {
    pub workspace_strategy: WorkspaceStrategy,
}

/// Immutable description of one acquirable unit of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub content_type: ContentType,
    pub target_game: String,
    pub files: Vec<ManifestFile>,
    pub dependencies: Vec<ContentDependency>,
    pub required_directories: Vec<String>,
    pub installation_instructions: InstallationInstructions,
}

impl ContentManifest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Hashes of every CAS-backed file, in file order, without duplicates.
    pub fn cas_hashes(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.files
            .iter()
            .filter(|f| f.is_cas_backed() && !f.hash.is_empty())
            .filter(|f| seen.insert(f.hash.to_ascii_lowercase()))
            .map(|f| f.hash.to_ascii_lowercase())
            .collect()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Manifest ids are used as file names, so they are restricted to a
    /// conservative character set.
    pub fn validate_id(id: &str) -> Result<()> {
        let ok = !id.is_empty()
            && id.len() <= 200
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
            && !id.starts_with('.');
        if ok {
            Ok(())
        } else {
            Err(ManifestError::InvalidId(id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_relative_accepts_nested_paths() {
        let p = checked_relative("Data/INI/GameData.ini").unwrap();
        assert_eq!(p, PathBuf::from("Data").join("INI").join("GameData.ini"));

        let p = checked_relative("./maps\\Alpine.map").unwrap();
        assert_eq!(p, PathBuf::from("maps").join("Alpine.map"));
    }

    #[test]
    fn test_checked_relative_rejects_escapes() {
        assert!(checked_relative("../outside.txt").is_err());
        assert!(checked_relative("data/../../outside.txt").is_err());
        assert!(checked_relative("/etc/passwd").is_err());
        assert!(checked_relative("C:\\Windows\\win.ini").is_err());
        assert!(checked_relative("").is_err());
        assert!(checked_relative("./").is_err());
    }

    #[test]
    fn test_cas_hashes_deduplicated() {
        let mut manifest = ContentManifest::new("mod.one", "Mod One", "1.0");
        let h = "ab".repeat(32);
        manifest.files = vec![
            ManifestFile::cas("a.big", 10, h.clone()),
            ManifestFile::cas("b.big", 10, h.to_uppercase()),
            ManifestFile::local("c.ini", 5),
        ];
        assert_eq!(manifest.cas_hashes(), vec![h]);
        assert_eq!(manifest.total_size(), 25);
    }

    #[test]
    fn test_dependency_version_bounds() {
        let dep = ContentDependency {
            id: "base".into(),
            min_version: Some("1.04".into()),
            max_version: Some("1.10".into()),
            ..Default::default()
        };
        assert!(dep.is_satisfied_by("1.04"));
        assert!(dep.is_satisfied_by("1.8"));
        assert!(!dep.is_satisfied_by("1.03"));
        assert!(!dep.is_satisfied_by("1.11"));
    }

    #[test]
    fn test_validate_id() {
        assert!(ContentManifest::validate_id("1.08.ea.gameinstallation.zerohour").is_ok());
        assert!(ContentManifest::validate_id("../evil").is_err());
        assert!(ContentManifest::validate_id("").is_err());
        assert!(ContentManifest::validate_id("a/b").is_err());
    }

    #[test]
    fn test_json_uses_camel_case() {
        let file = ManifestFile::cas("game.exe", 1, "00".repeat(32)).executable();
        let json = serde_json::to_string(&file).unwrap();
        assert!(json.contains("\"relativePath\""));
        assert!(json.contains("\"sourceType\":\"contentAddressable\""));
        assert!(json.contains("\"isExecutable\":true"));
        assert!(!json.contains("downloadUrl"));
    }
}
