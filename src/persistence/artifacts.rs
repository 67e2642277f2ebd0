//! Timestamped archive plus "latest" alias publishing.
//!
//! Every artifact family (snapshots, prediction tables, worth timelines)
//! follows the same two-step write: a never-overwritten archive named after
//! the run instant, then an atomic replace of the alias.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::atomic;
use crate::error::StoreError;

/// Timestamp format embedded in archive names.
pub const ARCHIVE_STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Paths written by one [`ArtifactWriter::publish`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// The timestamped archive.
    pub archive: PathBuf,
    /// The alias that now mirrors it.
    pub alias: PathBuf,
}

/// Publishes JSON artifacts into one directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    /// Creates a writer rooted at `dir`. The directory is created lazily.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Archive file stem for `prefix` at `stamp`.
    #[must_use]
    pub fn archive_stem(prefix: &str, stamp: DateTime<Utc>) -> String {
        format!("{prefix}_{}", stamp.format(ARCHIVE_STAMP_FORMAT))
    }

    /// Serializes `value` and writes `<prefix>_<stamp>.json` followed by
    /// `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encode`] if `value` cannot be serialized and
    /// [`StoreError::Io`] if either write fails. When the archive write
    /// fails the alias is left untouched.
    pub fn publish<T>(
        &self,
        what: &'static str,
        prefix: &str,
        alias: &str,
        stamp: DateTime<Utc>,
        value: &T,
    ) -> Result<Published, StoreError>
    where
        T: Serialize + ?Sized,
    {
        let bytes =
            serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode { what, source })?;
        atomic::ensure_dir(&self.dir)?;
        let archive = atomic::write_new(&self.dir, &Self::archive_stem(prefix, stamp), "json", &bytes)?;
        let alias = atomic::write_replace(&self.dir, alias, &bytes)?;
        tracing::debug!(
            what,
            archive = %archive.display(),
            alias = %alias.display(),
            bytes = bytes.len(),
            "artifact published"
        );
        Ok(Published { archive, alias })
    }
}
