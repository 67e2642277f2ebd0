//! Forecasting primitives: the trend model seam, the default additive
//! model, and the checkpoint schedule.

pub mod additive;
pub mod checkpoints;
pub mod model;

pub use additive::{AdditiveFit, AdditiveTrendModel, MIN_FIT_POINTS};
pub use checkpoints::checkpoint_schedule;
pub use model::{FittedTrend, TrendModel, monotone_projection};
