//! # voucher-tracker
//!
//! Periodic collector and forecaster for a paginated leaderboard of entities
//! that accumulate redeemable units.
//!
//! Each invocation takes a full snapshot of the upstream listing, appends it
//! to an append-only historical store, then projects every entity's unit
//! count to fixed checkpoints up to the redemption deadline.
//!
//! ## Architecture
//!
//! ```text
//! External scheduler (cron)
//!     │
//!     ├── SnapshotCollector (service/)
//!     │     ├── LockManager (lock)
//!     │     ├── RateLimitedFetcher → PageSource (upstream/)
//!     │     └── SnapshotStore (persistence/)
//!     │
//!     └── ForecastingEngine (service/)
//!           ├── SnapshotStore → HistoricalSeries (domain/)
//!           ├── TrendModel (forecast/)
//!           └── ArtifactWriter (persistence/)
//! ```

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod lock;
pub mod persistence;
pub mod service;
pub mod upstream;
