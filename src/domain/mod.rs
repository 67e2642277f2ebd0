//! Domain layer: entity identity, snapshots, series, and forecast outputs.
//!
//! This module contains the data model shared by the collector, the
//! historical store, and the forecasting engine. Snapshots are immutable
//! once assembled; series and predictions are derived from them.

pub mod entity_id;
pub mod prediction;
pub mod series;
pub mod snapshot;

pub use entity_id::EntityId;
pub use prediction::{PredictionResult, Projection, WorthTimelineRow};
pub use series::{HistoricalSeries, SeriesPoint, UnitDecrease, index_series};
pub use snapshot::{EntitySnapshotRecord, GlobalMetadata, Snapshot, estimated_value, round_cents};
