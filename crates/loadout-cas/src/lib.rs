//! # loadout-cas
//!
//! Content-Addressable Storage (CAS) for acquired game content.
//!
//! Objects are keyed by the SHA-256 of their bytes and laid out with a
//! single 2-character fan-out:
//!
//! ```text
//! <cas_root>/
//! ├── objects/
//! │   └── ab/
//! │       └── ab3f...e9      # 64 lowercase hex, read-only
//! ├── temp/                  # in-flight writes, renamed into objects/
//! ├── locks/                 # <hash>.lock, cross-process write locks
//! └── refs/
//!     ├── manifests/<id>.refs.json
//!     └── workspaces/<id>.refs.json
//! ```
//!
//! Objects are written once and never modified. Only the garbage collector
//! removes them, and only when no manifest or workspace references them.

pub mod gc;
pub mod hash;
pub mod integrity;
mod lock;
pub mod maintenance;
pub mod protection;
pub mod refs;
pub mod storage;

pub use gc::{GarbageCollector, GcStats};
pub use hash::{hash_bytes, hash_file, validate_hash};
pub use integrity::{validate_integrity, CorruptObject, IntegrityReport};
pub use maintenance::{CasMaintenanceService, MaintenanceReport};
pub use refs::{CasReferenceTracker, ReferenceOwner, ReferenceSet};
pub use storage::{CasOptions, CasStats, CasStorage};

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during CAS operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("Invalid object hash: {0:?}")]
    InvalidHash(String),

    #[error("Object not found: {hash}")]
    ObjectNotFound { hash: String },

    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Timed out acquiring lock for {hash} after {attempts} attempts ({waited:?})")]
    LockAcquisitionTimeout {
        hash: String,
        attempts: u32,
        waited: Duration,
    },

    #[error("Invalid reference owner id: {0:?}")]
    InvalidReferenceId(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Directory names under the CAS root.
pub(crate) mod layout {
    pub const OBJECTS: &str = "objects";
    pub const TEMP: &str = "temp";
    pub const LOCKS: &str = "locks";
    pub const REFS: &str = "refs";
}
