//! Wire types for the upstream listing endpoint.
//!
//! Field names follow the upstream's camelCase JSON. Legacy API names
//! (`leaderboardRank`, `fanCount`, `voucherCount`, `count`) are accepted as
//! aliases, and decimal fields may arrive as strings or numbers.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::domain::{EntityId, EntitySnapshotRecord, estimated_value};

/// One page of the listing plus the aggregate metadata sent with it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// Entities in the full listing, as declared by the upstream.
    #[serde(default, alias = "count")]
    pub total_count: Option<u64>,
    /// Units across the full listing, as declared by the upstream.
    #[serde(default, alias = "totalVouchers")]
    pub total_units: Option<u64>,
    /// Conversion rate from units to value, when the upstream publishes it.
    #[serde(default, alias = "voucherWorth", deserialize_with = "optional_decimal")]
    pub unit_worth: Option<f64>,
    /// Records on this page.
    #[serde(default)]
    pub results: Vec<UpstreamRecord>,
}

/// One entity as served by the upstream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamRecord {
    /// Stable identifier.
    pub public_id: EntityId,
    /// Display name.
    pub name: String,
    /// 1-based leaderboard position.
    #[serde(default, alias = "leaderboardRank")]
    pub rank: Option<u32>,
    /// Number of supporters.
    #[serde(default, alias = "fanCount", deserialize_with = "count_or_null")]
    pub supporter_count: u64,
    /// Donation total as a decimal string.
    #[serde(default, deserialize_with = "decimal_string")]
    pub donation_sum: String,
    /// Units held.
    #[serde(default, alias = "voucherCount", deserialize_with = "count_or_null")]
    pub unit_count: u64,
}

impl UpstreamRecord {
    /// Converts into a snapshot record valued at `unit_worth`.
    #[must_use]
    pub fn into_record(self, unit_worth: f64) -> EntitySnapshotRecord {
        EntitySnapshotRecord {
            estimated_value: estimated_value(self.unit_count, unit_worth),
            public_id: self.public_id,
            name: self.name,
            rank: self.rank,
            supporter_count: self.supporter_count,
            donation_sum: self.donation_sum,
            unit_count: self.unit_count,
        }
    }
}

fn decimal_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok("0".to_string()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected decimal, got {other}"
        ))),
    }
}

fn optional_decimal<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("bad decimal {s:?}: {e}"))),
        other => Err(serde::de::Error::custom(format!(
            "expected decimal, got {other}"
        ))),
    }
}

fn count_or_null<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}
