//! Least-squares linear trend with additive hour-of-day seasonality.
//!
//! The trend is an ordinary least-squares line over hours elapsed since the
//! first observation. Once the series spans at least the configured minimum,
//! residuals are averaged per UTC hour of day and the bucket means, centered
//! to sum to zero, are added back on projection.

use chrono::{DateTime, Duration, Timelike, Utc};

use super::{FittedTrend, TrendModel};
use crate::error::ModelFitError;

/// Observations needed to estimate a slope.
pub const MIN_FIT_POINTS: usize = 2;

const HOURS_PER_DAY: usize = 24;
const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Default model used by the forecasting engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdditiveTrendModel {
    seasonality_min_span: Duration,
}

impl AdditiveTrendModel {
    /// Creates a model that adds seasonality once a series spans
    /// `seasonality_min_span`.
    #[must_use]
    pub const fn new(seasonality_min_span: Duration) -> Self {
        Self {
            seasonality_min_span,
        }
    }

    /// Span required before seasonality is estimated.
    #[must_use]
    pub const fn seasonality_min_span(&self) -> Duration {
        self.seasonality_min_span
    }
}

impl Default for AdditiveTrendModel {
    fn default() -> Self {
        Self::new(Duration::hours(48))
    }
}

/// Result of [`AdditiveTrendModel::fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct AdditiveFit {
    origin: DateTime<Utc>,
    slope_per_hour: f64,
    intercept: f64,
    seasonal: Option<[f64; HOURS_PER_DAY]>,
}

impl AdditiveFit {
    /// Trend slope in units per hour.
    #[must_use]
    pub const fn slope_per_hour(&self) -> f64 {
        self.slope_per_hour
    }

    /// `true` if hour-of-day seasonality was estimated.
    #[must_use]
    pub const fn is_seasonal(&self) -> bool {
        self.seasonal.is_some()
    }

    fn trend_at(&self, at: DateTime<Utc>) -> f64 {
        self.intercept + self.slope_per_hour * hours_between(self.origin, at)
    }
}

impl FittedTrend for AdditiveFit {
    fn project(&self, at: DateTime<Utc>) -> f64 {
        let seasonal = self
            .seasonal
            .as_ref()
            .and_then(|buckets| buckets.get(hour_bucket(at)))
            .copied()
            .unwrap_or(0.0);
        self.trend_at(at) + seasonal
    }
}

impl TrendModel for AdditiveTrendModel {
    fn fit(
        &self,
        observations: &[(DateTime<Utc>, f64)],
    ) -> Result<Box<dyn FittedTrend>, ModelFitError> {
        let (Some((origin, _)), Some((last, _))) = (observations.first(), observations.last())
        else {
            return Err(ModelFitError::TooFewPoints {
                got: 0,
                required: MIN_FIT_POINTS,
            });
        };
        if observations.len() < MIN_FIT_POINTS {
            return Err(ModelFitError::TooFewPoints {
                got: observations.len(),
                required: MIN_FIT_POINTS,
            });
        }
        if observations.iter().any(|(_, y)| !y.is_finite()) {
            return Err(ModelFitError::NonFinite("observation"));
        }

        #[allow(clippy::cast_precision_loss)]
        let n = observations.len() as f64;
        let xs: Vec<f64> = observations
            .iter()
            .map(|(t, _)| hours_between(*origin, *t))
            .collect();
        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = observations.iter().map(|(_, y)| y).sum::<f64>() / n;

        let (sxx, sxy) = xs
            .iter()
            .zip(observations)
            .fold((0.0, 0.0), |(sxx, sxy), (x, (_, y))| {
                let dx = x - mean_x;
                (sxx + dx * dx, sxy + dx * (y - mean_y))
            });
        if sxx <= f64::EPSILON {
            return Err(ModelFitError::DegenerateSeries);
        }

        let slope_per_hour = sxy / sxx;
        let intercept = mean_y - slope_per_hour * mean_x;
        if !slope_per_hour.is_finite() {
            return Err(ModelFitError::NonFinite("slope"));
        }
        if !intercept.is_finite() {
            return Err(ModelFitError::NonFinite("intercept"));
        }

        let mut fit = AdditiveFit {
            origin: *origin,
            slope_per_hour,
            intercept,
            seasonal: None,
        };
        if *last - *origin >= self.seasonality_min_span {
            fit.seasonal = Some(seasonal_buckets(&fit, observations));
        }
        Ok(Box::new(fit))
    }
}

/// Centered per-hour means of the residuals around the linear trend.
/// Hours with no observations contribute zero.
fn seasonal_buckets(
    fit: &AdditiveFit,
    observations: &[(DateTime<Utc>, f64)],
) -> [f64; HOURS_PER_DAY] {
    let mut sums = [0.0_f64; HOURS_PER_DAY];
    let mut counts = [0_u32; HOURS_PER_DAY];
    for (at, y) in observations {
        let bucket = hour_bucket(*at);
        if let (Some(sum), Some(count)) = (sums.get_mut(bucket), counts.get_mut(bucket)) {
            *sum += y - fit.trend_at(*at);
            *count += 1;
        }
    }

    let mut means = [0.0_f64; HOURS_PER_DAY];
    let mut populated = 0_u32;
    let mut total = 0.0;
    for ((mean, sum), count) in means.iter_mut().zip(sums).zip(counts) {
        if count > 0 {
            *mean = sum / f64::from(count);
            total += *mean;
            populated += 1;
        }
    }
    if populated > 0 {
        let offset = total / f64::from(populated);
        for (mean, count) in means.iter_mut().zip(counts) {
            if count > 0 {
                *mean -= offset;
            }
        }
    }
    means
}

fn hour_bucket(at: DateTime<Utc>) -> usize {
    // hour() is always < 24
    at.hour() as usize
}

#[allow(clippy::cast_precision_loss)]
fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MILLIS_PER_HOUR
}
