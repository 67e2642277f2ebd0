//! Atomic file writes via a temp file in the target directory plus rename.
//!
//! Readers never observe a partially written file: bytes land in a
//! `NamedTempFile` next to the destination, are synced, and only then
//! renamed into place.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::StoreError;

/// Highest numeric suffix tried before giving up on a free archive name.
pub(crate) const MAX_NAME_SUFFIX: u32 = 1_000;

/// Creates `dir` and its parents if missing.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the directory cannot be created.
pub fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

/// Writes `bytes` to `dir/name`, replacing any existing file atomically.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the temp file cannot be written or renamed.
pub fn write_replace(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
    let path = dir.join(name);
    let temp = staged(dir, bytes)?;
    temp.persist(&path).map_err(|err| StoreError::Io {
        path: path.clone(),
        source: err.error,
    })?;
    Ok(path)
}

/// Writes `bytes` under a name that does not exist yet.
///
/// Tries `<stem>.<ext>` first, then `<stem>_1.<ext>`, `<stem>_2.<ext>`, ...
/// Existing files are never overwritten.
///
/// # Errors
///
/// Returns [`StoreError::Io`] on write failure or when no free name is found.
pub fn write_new(dir: &Path, stem: &str, ext: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
    let mut temp = staged(dir, bytes)?;
    for suffix in 0..=MAX_NAME_SUFFIX {
        let name = if suffix == 0 {
            format!("{stem}.{ext}")
        } else {
            format!("{stem}_{suffix}.{ext}")
        };
        let path = dir.join(name);
        match temp.persist_noclobber(&path) {
            Ok(_) => return Ok(path),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                temp = err.file;
            }
            Err(err) => {
                return Err(StoreError::Io {
                    path,
                    source: err.error,
                });
            }
        }
    }
    Err(StoreError::Io {
        path: dir.join(format!("{stem}.{ext}")),
        source: io::Error::new(io::ErrorKind::AlreadyExists, "no free archive name"),
    })
}

fn staged(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile, StoreError> {
    let io_err = |source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;
    temp.as_file_mut().write_all(bytes).map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    Ok(temp)
}
