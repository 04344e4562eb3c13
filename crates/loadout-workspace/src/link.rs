//! Filesystem placement primitives.
//!
//! Every function replaces whatever already sits at `target`, so preparing
//! a workspace a second time over an existing tree converges instead of
//! failing with `AlreadyExists`.
//!
//! Copies try a copy-on-write clone first (btrfs, xfs, APFS, ReFS) and fall
//! back to a byte copy. Hard links fall back to a copy when source and
//! target are on different devices.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// How a file ended up in the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkMethod {
    /// Copy-on-write clone, separate inode
    Reflink,
    /// Full data copy
    Copy,
    /// Hard link, shared inode
    Hardlink,
    Symlink,
    /// Covered by a symlinked parent directory
    DirectoryLink,
    /// Optional file whose source was absent
    Skipped,
}

impl LinkMethod {
    /// Whether the workspace holds its own bytes for this file.
    pub fn is_copy(self) -> bool {
        matches!(self, LinkMethod::Reflink | LinkMethod::Copy)
    }

    /// Progress label for this placement.
    pub fn label(self) -> &'static str {
        match self {
            LinkMethod::Reflink => "Cloning",
            LinkMethod::Copy => "Copying",
            LinkMethod::Hardlink => "Hard linking",
            LinkMethod::Symlink => "Linking",
            LinkMethod::DirectoryLink => "Linked via directory",
            LinkMethod::Skipped => "Skipped",
        }
    }
}

impl std::fmt::Display for LinkMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkMethod::Reflink => write!(f, "reflink"),
            LinkMethod::Copy => write!(f, "copy"),
            LinkMethod::Hardlink => write!(f, "hardlink"),
            LinkMethod::Symlink => write!(f, "symlink"),
            LinkMethod::DirectoryLink => write!(f, "directory-link"),
            LinkMethod::Skipped => write!(f, "skipped"),
        }
    }
}

/// Remove a file, symlink or directory at `target`. Missing is fine.
///
/// Symlinks are removed, never followed, so a linked directory's contents
/// in the base installation are never touched.
pub fn remove_existing(target: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(target) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if meta.is_dir() {
        return fs::remove_dir_all(target);
    }

    match fs::remove_file(target) {
        Ok(()) => Ok(()),
        // Windows refuses to delete read-only files, and directory
        // symlinks need remove_dir there.
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            if meta.file_type().is_symlink() {
                fs::remove_dir(target)
            } else {
                make_writable(target)?;
                fs::remove_file(target)
            }
        }
        Err(e) => Err(e),
    }
}

/// Give the owner write access. Copies of read-only CAS objects belong to
/// the workspace and must be editable there.
pub fn make_writable(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    if !perms.readonly() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(perms.mode() | 0o200);
    }
    #[cfg(not(unix))]
    {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
    }
    fs::set_permissions(path, perms)
}

/// Add execute bits wherever read bits are set. No-op off Unix.
pub fn make_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        let mode = perms.mode();
        let exec = (mode & 0o444) >> 2;
        if mode & exec != exec {
            perms.set_mode(mode | exec);
            fs::set_permissions(path, perms)?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Copy-on-write clone, falling back to a byte copy.
pub fn clone_or_copy(source: &Path, target: &Path) -> io::Result<LinkMethod> {
    remove_existing(target)?;
    match reflink_copy::reflink(source, target) {
        Ok(()) => Ok(LinkMethod::Reflink),
        Err(_) => {
            // A failed clone can leave an empty target behind.
            let _ = fs::remove_file(target);
            fs::copy(source, target)?;
            Ok(LinkMethod::Copy)
        }
    }
}

/// Hard link, falling back to [`clone_or_copy`] across devices.
pub fn hard_link_or_copy(source: &Path, target: &Path) -> io::Result<LinkMethod> {
    remove_existing(target)?;
    match fs::hard_link(source, target) {
        Ok(()) => Ok(LinkMethod::Hardlink),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => clone_or_copy(source, target),
        Err(e) => Err(e),
    }
}

/// Symlink `target` → `source` (a file).
pub fn symlink_file(source: &Path, target: &Path) -> io::Result<LinkMethod> {
    remove_existing(target)?;
    #[cfg(unix)]
    std::os::unix::fs::symlink(source, target)?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_file(source, target)?;
    Ok(LinkMethod::Symlink)
}

/// Symlink `target` → `source` (a directory).
pub fn symlink_dir(source: &Path, target: &Path) -> io::Result<LinkMethod> {
    remove_existing(target)?;
    #[cfg(unix)]
    std::os::unix::fs::symlink(source, target)?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_dir(source, target)?;
    Ok(LinkMethod::DirectoryLink)
}
