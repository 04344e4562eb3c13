//! Path helpers for configuration and test fixtures.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

/// Join a manifest-relative path onto `root`, rejecting absolute paths and
/// `..` components.
pub fn safe_join(root: impl AsRef<Path>, relative: &str) -> Result<PathBuf> {
    let rel = loadout_manifest::checked_relative(relative)
        .with_context(|| format!("Refusing to join {relative:?} onto {}", root.as_ref().display()))?;
    Ok(root.as_ref().join(rel))
}
