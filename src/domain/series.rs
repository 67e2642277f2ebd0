//! Per-entity time series reconstructed from the historical store.
//!
//! Series are sparse: an entity absent from a snapshot simply has no point
//! at that timestamp.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::{EntityId, EntitySnapshotRecord, Snapshot};

/// One observation of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    /// Timestamp of the snapshot the record came from.
    pub timestamp: DateTime<Utc>,
    /// The entity's record in that snapshot.
    pub record: EntitySnapshotRecord,
}

/// A drop in unit count between two consecutive observations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDecrease {
    /// Timestamp of the earlier observation.
    pub from: DateTime<Utc>,
    /// Timestamp of the later observation.
    pub to: DateTime<Utc>,
    /// Unit count before the drop.
    pub before: u64,
    /// Unit count after the drop.
    pub after: u64,
}

/// All observations of one entity, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalSeries {
    public_id: EntityId,
    points: Vec<SeriesPoint>,
}

impl HistoricalSeries {
    /// Creates an empty series for `public_id`.
    #[must_use]
    pub const fn new(public_id: EntityId) -> Self {
        Self {
            public_id,
            points: Vec::new(),
        }
    }

    /// Extracts `public_id`'s series from snapshots ordered oldest first.
    #[must_use]
    pub fn from_snapshots(public_id: &EntityId, snapshots: &[Snapshot]) -> Self {
        let mut series = Self::new(public_id.clone());
        for snapshot in snapshots {
            if let Some(record) = snapshot.record(public_id) {
                series.push(snapshot.timestamp(), record.clone());
            }
        }
        series
    }

    /// Entity this series belongs to.
    #[must_use]
    pub const fn public_id(&self) -> &EntityId {
        &self.public_id
    }

    /// Appends an observation. Callers push in timestamp order.
    pub fn push(&mut self, timestamp: DateTime<Utc>, record: EntitySnapshotRecord) {
        self.points.push(SeriesPoint { timestamp, record });
    }

    /// All observations, oldest first.
    #[must_use]
    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    /// Number of observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns `true` if the entity was never observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Most recent observation.
    #[must_use]
    pub fn latest(&self) -> Option<&SeriesPoint> {
        self.points.last()
    }

    /// `(timestamp, unit_count)` pairs for model fitting.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn unit_counts(&self) -> Vec<(DateTime<Utc>, f64)> {
        self.points
            .iter()
            .map(|p| (p.timestamp, p.record.unit_count as f64))
            .collect()
    }

    /// Consecutive observations where the unit count went down.
    #[must_use]
    pub fn decreases(&self) -> Vec<UnitDecrease> {
        self.points
            .windows(2)
            .filter_map(|pair| match pair {
                [prev, next] if next.record.unit_count < prev.record.unit_count => {
                    Some(UnitDecrease {
                        from: prev.timestamp,
                        to: next.timestamp,
                        before: prev.record.unit_count,
                        after: next.record.unit_count,
                    })
                }
                _ => None,
            })
            .collect()
    }
}

/// Builds every entity's series in a single pass over ordered snapshots.
#[must_use]
pub fn index_series(snapshots: &[Snapshot]) -> BTreeMap<EntityId, HistoricalSeries> {
    let mut index: BTreeMap<EntityId, HistoricalSeries> = BTreeMap::new();
    for snapshot in snapshots {
        for record in &snapshot.records {
            index
                .entry(record.public_id.clone())
                .or_insert_with(|| HistoricalSeries::new(record.public_id.clone()))
                .push(snapshot.timestamp(), record.clone());
        }
    }
    index
}
