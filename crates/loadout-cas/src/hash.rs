//! SHA-256 helpers and hash validation.
//!
//! A valid object hash is exactly 64 hex digits. Uppercase input is accepted
//! and normalized; anything else (path separators, dots, short strings) is
//! rejected before it can be turned into a path.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::{CasError, Result};

pub const HASH_HEX_LEN: usize = 64;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Validate `hash` and return its lowercase form.
pub fn validate_hash(hash: &str) -> Result<String> {
    if hash.len() == HASH_HEX_LEN && hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(hash.to_ascii_lowercase())
    } else {
        Err(CasError::InvalidHash(hash.to_string()))
    }
}

/// Hex SHA-256 of `data`.
#[inline]
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex SHA-256 of everything `reader` yields.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Blocking file hash. Use [`hash_file`] from async code.
pub fn hash_file_blocking(path: &Path) -> io::Result<String> {
    hash_reader(File::open(path)?)
}

/// Hash a file on the blocking pool.
#[instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()))]
pub async fn hash_file(path: impl AsRef<Path>) -> Result<String> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let digest = tokio::task::spawn_blocking(move || hash_file_blocking(&path))
        .await
        .map_err(io::Error::other)??;
    Ok(digest)
}
