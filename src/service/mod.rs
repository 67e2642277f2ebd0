//! Service layer: run orchestration.
//!
//! [`SnapshotCollector`] drives the fetcher under the collection lock and
//! appends to the historical store. [`ForecastingEngine`] reads the store,
//! fits the trend model per entity and publishes prediction artifacts.

pub mod collector;
pub mod forecaster;

pub use collector::{CollectorSettings, SnapshotCollector};
pub use forecaster::{
    ForecastReport, ForecastSettings, ForecastingEngine, PREDICTIONS_ALIAS, SkipReason,
    SkippedEntity, WORTH_TIMELINE_ALIAS,
};
