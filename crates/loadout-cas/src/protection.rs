//! Read-only protection for stored objects.
//!
//! Objects are immutable once renamed into `objects/`. Stripping the write
//! bits turns an accidental write through a workspace hardlink or symlink
//! into a permission error instead of silent corruption of shared content.

use std::fs;
use std::io;
use std::path::Path;

/// Read-only, never executable.
#[cfg(unix)]
pub const CAS_READ_ONLY_PERM: u32 = 0o444;

/// Make `path` read-only.
pub fn protect(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(CAS_READ_ONLY_PERM))
    }

    #[cfg(not(unix))]
    {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(path, perms)
    }
}

/// Restore owner write access so the object can be deleted or replaced.
///
/// Deleting a read-only file is allowed on Unix but not on Windows.
pub fn unprotect(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644))
    }

    #[cfg(not(unix))]
    {
        let mut perms = fs::metadata(path)?.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)
    }
}

/// Whether `path` carries no write bits.
pub fn is_protected(path: &Path) -> io::Result<bool> {
    Ok(fs::metadata(path)?.permissions().readonly())
}
