//! Collision-proof working files for the download pipeline.
//!
//! A working file is named `<prefix><random>.<file name>` and created
//! atomically inside the destination directory, so concurrent downloads of
//! the same file never share a path and the extension stays the original one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::Builder;
use tracing::warn;

use crate::error::{Error, FileSystemError, Result};

/// Default prefix of working file names.
pub const DEFAULT_TEMP_PREFIX: &str = "camport-";

const RANDOM_LEN: usize = 8;

/// Create an empty working file for `file_name` inside `dir`.
///
/// The file is kept on disk; the caller owns its removal.
pub fn create_temp_file(dir: &Path, prefix: &str, file_name: &str) -> Result<PathBuf> {
    let create_failed = |reason: String| {
        Error::FileSystem(FileSystemError::CreateFailed {
            path: dir.join(file_name),
            reason,
        })
    };

    Builder::new()
        .prefix(prefix)
        .suffix(&format!(".{file_name}"))
        .rand_bytes(RANDOM_LEN)
        .tempfile_in(dir)
        .map_err(|e| create_failed(e.to_string()))?
        .into_temp_path()
        .keep()
        .map_err(|e| create_failed(e.to_string()))
}

/// File name a working file stands for, i.e. everything after
/// `<prefix><random>.`.
///
/// Returns `None` for paths that are not working files.
pub fn final_name(temp: &Path, prefix: &str) -> Option<String> {
    let name = temp.file_name()?.to_str()?;
    let rest = name.strip_prefix(prefix)?;
    let (random, original) = rest.split_once('.')?;

    if random.is_empty() || original.is_empty() {
        return None;
    }
    Some(original.to_string())
}

/// Remove a working file, ignoring files that are already gone.
pub fn remove_temp_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temp file {}: {}", path.display(), e),
    }
}
