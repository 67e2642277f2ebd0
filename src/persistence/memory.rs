//! In-process snapshot store for tests and embedding.

use std::sync::{Mutex, PoisonError};

use super::SnapshotStore;
use crate::domain::Snapshot;
use crate::error::StoreError;

/// Keeps snapshots in insertion order behind a mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<Vec<Snapshot>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with `snapshots` in the given order.
    #[must_use]
    pub fn with_snapshots(snapshots: Vec<Snapshot>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots),
        }
    }

    /// Number of snapshots held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// `true` when nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for MemoryStore {
    fn append(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot.clone());
        Ok(())
    }

    fn list_snapshots(&self) -> Result<Vec<Snapshot>, StoreError> {
        let mut snapshots = self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        snapshots.sort_by_key(Snapshot::timestamp);
        Ok(snapshots)
    }

    fn latest(&self) -> Result<Option<Snapshot>, StoreError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::{EntityId, EntitySnapshotRecord};

    fn snapshot(hour: u32, units: u64) -> Snapshot {
        let Some(ts) = Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).single() else {
            panic!("valid instant");
        };
        Snapshot::new(
            ts,
            1.0,
            vec![EntitySnapshotRecord {
                public_id: EntityId::from("a"),
                name: "A".to_string(),
                rank: Some(1),
                supporter_count: 0,
                donation_sum: "0".to_string(),
                unit_count: units,
                estimated_value: units as f64,
            }],
        )
    }

    #[test]
    fn lists_by_timestamp_with_stable_ties() {
        let store = MemoryStore::new();
        for snap in [snapshot(5, 50), snapshot(1, 10), snapshot(5, 55)] {
            assert!(store.append(&snap).is_ok());
        }
        let Ok(listed) = store.list_snapshots() else {
            panic!("list");
        };
        let units: Vec<u64> = listed.iter().map(|s| s.metadata.total_units).collect();
        assert_eq!(units, vec![10, 50, 55]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn series_for_uses_default_scan() {
        let store = MemoryStore::with_snapshots(vec![snapshot(2, 20), snapshot(1, 10)]);
        let Ok(series) = store.series_for(&EntityId::from("a")) else {
            panic!("series");
        };
        let units: Vec<u64> = series.points().iter().map(|p| p.record.unit_count).collect();
        assert_eq!(units, vec![10, 20]);

        let Ok(missing) = store.series_for(&EntityId::from("zzz")) else {
            panic!("series");
        };
        assert!(missing.is_empty());
    }

    #[test]
    fn latest_is_last_appended() {
        let store = MemoryStore::new();
        assert!(matches!(store.latest(), Ok(None)));
        assert!(store.append(&snapshot(3, 30)).is_ok());
        let Ok(Some(latest)) = store.latest() else {
            panic!("latest expected");
        };
        assert_eq!(latest.metadata.total_units, 30);
    }
}
