//! Historical store contract.

use std::fmt;

use crate::domain::{EntityId, HistoricalSeries, Snapshot};
use crate::error::StoreError;

/// Append-only, timestamp-ordered collection of snapshots.
///
/// Implementations never mutate a snapshot once appended. Ordering is by
/// `metadata.timestamp`, with ties broken by insertion order.
pub trait SnapshotStore: Send + Sync + fmt::Debug {
    /// Archives `snapshot` and makes it the latest one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be encoded or written.
    /// A failed append leaves the previous latest snapshot in place.
    fn append(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// All snapshots in timestamp order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store itself cannot be read.
    fn list_snapshots(&self) -> Result<Vec<Snapshot>, StoreError>;

    /// The most recently appended snapshot, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the alias exists but cannot be read.
    fn latest(&self) -> Result<Option<Snapshot>, StoreError>;

    /// One entity's observations in increasing timestamp order.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`SnapshotStore::list_snapshots`].
    fn series_for(&self, public_id: &EntityId) -> Result<HistoricalSeries, StoreError> {
        let snapshots = self.list_snapshots()?;
        Ok(HistoricalSeries::from_snapshots(public_id, &snapshots))
    }
}
