//! Snapshot store backed by a directory of JSON files.
//!
//! Layout:
//!
//! ```text
//! <data_dir>/
//!   stats_2026-03-01_12-00-00.json     archived snapshot, never rewritten
//!   stats_2026-03-01_12-00-00_1.json   same second, next run
//!   latest.json                        copy of the newest snapshot
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{ArtifactWriter, SnapshotStore};
use crate::domain::Snapshot;
use crate::error::StoreError;

/// Archive file prefix.
pub const SNAPSHOT_PREFIX: &str = "stats";

/// Alias file name.
pub const LATEST_ALIAS: &str = "latest.json";

/// Length of the `YYYY-MM-DD_HH-MM-SS` stamp in archive names.
const STAMP_LEN: usize = 19;

/// JSON-directory implementation of [`SnapshotStore`].
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    writer: ArtifactWriter,
}

impl JsonDirStore {
    /// Opens a store rooted at `dir`. Nothing is created until the first
    /// append.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            writer: ArtifactWriter::new(dir),
        }
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.writer.dir()
    }

    /// Archive files in insertion order: by stamp, then numeric suffix.
    fn archive_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let entries = match fs::read_dir(self.dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir().to_path_buf(),
                    source,
                });
            }
        };

        let mut keyed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.dir().to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if let Some(key) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(archive_sort_key)
            {
                keyed.push((key, path));
            }
        }
        keyed.sort();
        Ok(keyed.into_iter().map(|(_, path)| path).collect())
    }
}

impl SnapshotStore for JsonDirStore {
    fn append(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let published = self.writer.publish(
            "snapshot",
            SNAPSHOT_PREFIX,
            LATEST_ALIAS,
            snapshot.timestamp(),
            snapshot,
        )?;
        tracing::info!(
            archive = %published.archive.display(),
            entities = snapshot.metadata.total_entities,
            total_units = snapshot.metadata.total_units,
            "snapshot archived"
        );
        Ok(())
    }

    fn list_snapshots(&self) -> Result<Vec<Snapshot>, StoreError> {
        let mut snapshots = Vec::new();
        for path in self.archive_files()? {
            match read_snapshot(&path) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => tracing::warn!(error = %err, "skipping unreadable snapshot"),
            }
        }
        // Stable: equal timestamps keep archive-name order.
        snapshots.sort_by_key(Snapshot::timestamp);
        tracing::debug!(count = snapshots.len(), "snapshots loaded");
        Ok(snapshots)
    }

    fn latest(&self) -> Result<Option<Snapshot>, StoreError> {
        let path = self.dir().join(LATEST_ALIAS);
        match read_snapshot(&path) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(StoreError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// `(stamp, suffix)` for names like `stats_<stamp>[_<n>].json`.
fn archive_sort_key(name: &str) -> Option<(String, u32)> {
    let rest = name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_prefix('_')?
        .strip_suffix(".json")?;
    let stamp = rest.get(..STAMP_LEN)?;
    let suffix = match rest.get(STAMP_LEN..)? {
        "" => 0,
        tail => tail.strip_prefix('_')?.parse().ok()?,
    };
    Some((stamp.to_string(), suffix))
}

fn read_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
    let bytes = fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
