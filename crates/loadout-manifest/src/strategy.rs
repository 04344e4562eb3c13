//! Workspace materialization strategy selector.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How manifest files are placed into a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum WorkspaceStrategy {
    /// Every file is an independent copy
    FullCopy,
    /// Every file is a symlink to its source
    SymlinkOnly,
    /// Essential files copied, everything else symlinked
    #[default]
    HybridCopySymlink,
    /// Symlinks, with required directories linked wholesale
    FullSymlink,
    /// Hardlinks, copying across devices
    HardLink,
}

impl WorkspaceStrategy {
    pub const ALL: [WorkspaceStrategy; 5] = [
        WorkspaceStrategy::FullCopy,
        WorkspaceStrategy::SymlinkOnly,
        WorkspaceStrategy::HybridCopySymlink,
        WorkspaceStrategy::FullSymlink,
        WorkspaceStrategy::HardLink,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkspaceStrategy::FullCopy => "full-copy",
            WorkspaceStrategy::SymlinkOnly => "symlink-only",
            WorkspaceStrategy::HybridCopySymlink => "hybrid-copy-symlink",
            WorkspaceStrategy::FullSymlink => "full-symlink",
            WorkspaceStrategy::HardLink => "hard-link",
        }
    }
}

impl fmt::Display for WorkspaceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStrategy(pub String);

impl fmt::Display for UnknownStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown workspace strategy: {:?}", self.0)
    }
}

impl std::error::Error for UnknownStrategy {}

impl FromStr for WorkspaceStrategy {
    type Err = UnknownStrategy;

    /// Accepts `full-copy`, `full_copy`, `FullCopy`, `fullcopy` and so on.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "fullcopy" | "copy" => Ok(WorkspaceStrategy::FullCopy),
            "symlinkonly" | "symlink" => Ok(WorkspaceStrategy::SymlinkOnly),
            "hybridcopysymlink" | "hybrid" => Ok(WorkspaceStrategy::HybridCopySymlink),
            "fullsymlink" => Ok(WorkspaceStrategy::FullSymlink),
            "hardlink" => Ok(WorkspaceStrategy::HardLink),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}
