//! Forecast outputs: per-entity prediction rows and the worth timeline.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};

use super::EntityId;

/// Format used for checkpoint column suffixes.
pub const CHECKPOINT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Projected state of one entity at one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    /// Projected units held.
    pub unit_count: u64,
    /// `unit_count × current unit worth`, in cents precision.
    pub value: f64,
}

/// Forecast for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    /// Entity identifier.
    pub public_id: EntityId,
    /// Display name from the latest observation.
    pub name: String,
    /// Units at the latest observation.
    pub current_unit_count: u64,
    /// Estimated value at the latest observation.
    pub current_value: f64,
    /// Projection per checkpoint date.
    pub checkpoints: BTreeMap<NaiveDate, Projection>,
}

impl PredictionResult {
    /// Projection at the last checkpoint.
    #[must_use]
    pub fn final_projection(&self) -> Option<&Projection> {
        self.checkpoints.values().next_back()
    }

    /// Flattens the result into one table row.
    ///
    /// Identity columns come first, then one `projectedUnitCount_at_<date>`
    /// and `projectedValue_at_<date>` pair per checkpoint in date order.
    #[must_use]
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("publicId".to_string(), Value::from(self.public_id.as_str()));
        row.insert("name".to_string(), Value::from(self.name.as_str()));
        row.insert(
            "currentUnitCount".to_string(),
            Value::from(self.current_unit_count),
        );
        row.insert("currentValue".to_string(), Value::from(self.current_value));
        for (date, projection) in &self.checkpoints {
            let label = date.format(CHECKPOINT_DATE_FORMAT);
            row.insert(
                format!("projectedUnitCount_at_{label}"),
                Value::from(projection.unit_count),
            );
            row.insert(
                format!("projectedValue_at_{label}"),
                Value::from(projection.value),
            );
        }
        row
    }
}

/// Unit worth at one checkpoint of the forecast horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorthTimelineRow {
    /// Checkpoint date.
    pub checkpoint: NaiveDate,
    /// Projected total units across all entities.
    pub projected_total_units: u64,
    /// Unit worth at that checkpoint.
    pub unit_worth: f64,
}
