//! Essential-file classification for the hybrid strategy.
//!
//! A file is essential when the game is likely to write to it, load it as
//! code, or resolve it relative to its own location: small files,
//! executables and libraries, and configuration. Essential files are copied;
//! everything else (archives, textures, audio) is linked.
//!
//! Estimation and preparation both call [`EssentialFileClassifier::is_essential`],
//! so the estimated copy/link split is exactly the one preparation performs.

use std::path::Path;

/// Disk usage charged for a link when estimating.
pub const LINK_OVERHEAD_BYTES: u64 = 1024;

/// Files below this size are always essential.
pub const DEFAULT_ESSENTIAL_SIZE_THRESHOLD: u64 = 1024 * 1024;

/// Extensions (lowercase, no dot) that are always essential.
pub const ESSENTIAL_EXTENSIONS: &[&str] = &[
    // executables and libraries
    "exe", "dll", "so", "dylib", "bat", "cmd", "sh",
    // configuration
    "ini", "cfg", "conf", "json", "xml", "toml", "yaml", "yml", "txt",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EssentialFileClassifier {
    size_threshold: u64,
}

impl Default for EssentialFileClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_ESSENTIAL_SIZE_THRESHOLD)
    }
}

impl EssentialFileClassifier {
    pub fn new(size_threshold: u64) -> Self {
        Self { size_threshold }
    }

    pub fn size_threshold(&self) -> u64 {
        self.size_threshold
    }

    pub fn is_essential(&self, relative_path: &str, size: u64) -> bool {
        size < self.size_threshold || has_essential_extension(relative_path)
    }
}

fn has_essential_extension(relative_path: &str) -> bool {
    // Manifests use '/' but may come from Windows tooling.
    let name = relative_path.rsplit(['/', '\\']).next().unwrap_or(relative_path);
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            ESSENTIAL_EXTENSIONS
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(ext))
        })
}
