//! Point-in-time captures of the full entity listing.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EntityId;

/// One entity's state at one collection time. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshotRecord {
    /// Stable upstream identifier, unique within a snapshot.
    pub public_id: EntityId,
    /// Display name.
    pub name: String,
    /// 1-based leaderboard position, when the upstream reports one.
    #[serde(default)]
    pub rank: Option<u32>,
    /// Number of supporters.
    #[serde(default)]
    pub supporter_count: u64,
    /// Donation total as reported upstream (decimal string).
    #[serde(default)]
    pub donation_sum: String,
    /// Units held. Expected to never decrease between snapshots.
    pub unit_count: u64,
    /// `unit_count × unit_worth` at collection time, in cents precision.
    pub estimated_value: f64,
}

/// Aggregate metadata for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMetadata {
    /// Collection instant.
    pub timestamp: DateTime<Utc>,
    /// Number of records in the snapshot.
    pub total_entities: usize,
    /// Sum of all record unit counts.
    pub total_units: u64,
    /// Conversion rate from units to estimated value.
    pub unit_worth: f64,
}

/// Full listing captured by one collector run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Aggregate totals.
    pub metadata: GlobalMetadata,
    /// Records in upstream listing order.
    pub records: Vec<EntitySnapshotRecord>,
}

impl Snapshot {
    /// Assembles a snapshot, deriving the totals from `records`.
    #[must_use]
    pub fn new(
        timestamp: DateTime<Utc>,
        unit_worth: f64,
        records: Vec<EntitySnapshotRecord>,
    ) -> Self {
        let total_units = records.iter().map(|r| r.unit_count).sum();
        Self {
            metadata: GlobalMetadata {
                timestamp,
                total_entities: records.len(),
                total_units,
                unit_worth,
            },
            records,
        }
    }

    /// Collection instant.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.metadata.timestamp
    }

    /// Looks up one entity's record.
    #[must_use]
    pub fn record(&self, public_id: &EntityId) -> Option<&EntitySnapshotRecord> {
        self.records.iter().find(|r| &r.public_id == public_id)
    }

    /// Checks the totals against the records and that ids are unique.
    ///
    /// Returns a description of the first violation found.
    ///
    /// # Errors
    ///
    /// Returns `Err` when `total_entities` or `total_units` disagree with the
    /// records, or a `public_id` repeats.
    pub fn check_consistency(&self) -> Result<(), String> {
        if self.metadata.total_entities != self.records.len() {
            return Err(format!(
                "totalEntities {} but {} records",
                self.metadata.total_entities,
                self.records.len()
            ));
        }
        let units: u64 = self.records.iter().map(|r| r.unit_count).sum();
        if self.metadata.total_units != units {
            return Err(format!(
                "totalUnits {} but records sum to {units}",
                self.metadata.total_units
            ));
        }
        let mut seen = HashSet::with_capacity(self.records.len());
        for record in &self.records {
            if !seen.insert(&record.public_id) {
                return Err(format!("duplicate publicId {}", record.public_id));
            }
        }
        Ok(())
    }
}

/// Rounds a monetary amount to cents.
#[must_use]
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Estimated value of `unit_count` units at `unit_worth` each.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn estimated_value(unit_count: u64, unit_worth: f64) -> f64 {
    round_cents(unit_count as f64 * unit_worth)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn record(id: &str, units: u64, worth: f64) -> EntitySnapshotRecord {
        EntitySnapshotRecord {
            public_id: EntityId::from(id),
            name: format!("Club {id}"),
            rank: None,
            supporter_count: 0,
            donation_sum: "0".to_string(),
            unit_count: units,
            estimated_value: estimated_value(units, worth),
        }
    }

    #[test]
    fn new_derives_totals() {
        let snap = Snapshot::new(
            Utc::now(),
            1.5,
            vec![record("a", 10, 1.5), record("b", 30, 1.5)],
        );
        assert_eq!(snap.metadata.total_entities, 2);
        assert_eq!(snap.metadata.total_units, 40);
        assert!(snap.check_consistency().is_ok());
    }

    #[test]
    fn duplicate_ids_are_inconsistent() {
        let snap = Snapshot::new(
            Utc::now(),
            1.0,
            vec![record("a", 1, 1.0), record("a", 2, 1.0)],
        );
        let Err(reason) = snap.check_consistency() else {
            panic!("duplicates must be rejected");
        };
        assert!(reason.contains("duplicate publicId a"));
    }

    #[test]
    fn tampered_totals_are_inconsistent() {
        let mut snap = Snapshot::new(Utc::now(), 1.0, vec![record("a", 1, 1.0)]);
        snap.metadata.total_entities = 5;
        assert!(snap.check_consistency().is_err());
    }

    #[test]
    fn estimated_value_rounds_to_cents() {
        assert!((estimated_value(3, 0.333) - 1.0).abs() < 1e-9);
        assert!((estimated_value(1234, 2.17) - 2677.78).abs() < 1e-9);
        assert!((estimated_value(0, 5.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let snap = Snapshot::new(Utc::now(), 2.0, vec![record("a", 4, 2.0)]);
        let Ok(json) = serde_json::to_string(&snap) else {
            panic!("serialization failed");
        };
        assert!(json.contains("\"publicId\":\"a\""));
        assert!(json.contains("\"unitCount\":4"));
        assert!(json.contains("\"estimatedValue\":8.0"));
        assert!(json.contains("\"totalEntities\":1"));
        assert!(json.contains("\"unitWorth\":2.0"));
    }

    #[test]
    fn record_lookup_by_id() {
        let snap = Snapshot::new(Utc::now(), 1.0, vec![record("a", 1, 1.0), record("b", 2, 1.0)]);
        let found = snap.record(&EntityId::from("b")).map(|r| r.unit_count);
        assert_eq!(found, Some(2));
        assert!(snap.record(&EntityId::from("z")).is_none());
    }
}
