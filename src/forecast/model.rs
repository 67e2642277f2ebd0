//! Trend model seam.
//!
//! A [`TrendModel`] turns one series of `(instant, value)` observations into
//! a [`FittedTrend`] that can be evaluated at any instant. The engine never
//! depends on a concrete model.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::ModelFitError;

/// Fits a trend to timestamped observations.
pub trait TrendModel: Send + Sync + fmt::Debug {
    /// Fits the model. `observations` are ordered oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ModelFitError`] when the series cannot support a fit.
    fn fit(&self, observations: &[(DateTime<Utc>, f64)])
    -> Result<Box<dyn FittedTrend>, ModelFitError>;
}

/// A fitted trend, evaluable at arbitrary instants.
pub trait FittedTrend: Send + Sync + fmt::Debug {
    /// Model estimate at `at`.
    fn project(&self, at: DateTime<Utc>) -> f64;
}

/// Projects `fitted` at each checkpoint as whole units.
///
/// Every estimate is floored at `last_known`, carried forward as a running
/// maximum so the output never decreases, then rounded down.
///
/// # Errors
///
/// Returns [`ModelFitError::NonFinite`] if the model yields NaN or infinity
/// at any checkpoint.
pub fn monotone_projection(
    fitted: &dyn FittedTrend,
    last_known: u64,
    checkpoints: &[DateTime<Utc>],
) -> Result<Vec<u64>, ModelFitError> {
    #[allow(clippy::cast_precision_loss)]
    let mut running = last_known as f64;
    let mut projected = Vec::with_capacity(checkpoints.len());
    for at in checkpoints {
        let estimate = fitted.project(*at);
        if !estimate.is_finite() {
            return Err(ModelFitError::NonFinite("projection"));
        }
        running = running.max(estimate);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        projected.push(running.floor() as u64);
    }
    Ok(projected)
}
