//! Forecasting engine: projects every entity's unit count to the deadline
//! checkpoints and publishes the prediction table and worth timeline.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use crate::domain::{
    EntityId, HistoricalSeries, PredictionResult, Projection, Snapshot, WorthTimelineRow,
    estimated_value, index_series, round_cents,
};
use crate::error::{ForecastError, ModelFitError};
use crate::forecast::{TrendModel, checkpoint_schedule, monotone_projection};
use crate::persistence::{ArtifactWriter, SnapshotStore};

/// Prediction table archive prefix.
pub const PREDICTIONS_PREFIX: &str = "predictions";
/// Prediction table alias.
pub const PREDICTIONS_ALIAS: &str = "predictions_latest.json";
/// Worth timeline archive prefix.
pub const WORTH_TIMELINE_PREFIX: &str = "unit_worth_timeline";
/// Worth timeline alias.
pub const WORTH_TIMELINE_ALIAS: &str = "unit_worth_timeline_latest.json";

/// Tunables for [`ForecastingEngine`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastSettings {
    /// Observations an entity needs before it is forecast.
    pub min_data_points: usize,
    /// End of the distribution period.
    pub distribution_end: DateTime<Utc>,
    /// Final checkpoint.
    pub redemption_end: DateTime<Utc>,
    /// Spacing of regular checkpoints.
    pub checkpoint_interval: Duration,
    /// Forecast only the first N entities by latest unit count.
    pub limit_entities: Option<usize>,
    /// Total payout; enables the projected worth timeline.
    pub prize_pool: Option<f64>,
}

/// Why an entity is missing from the prediction table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer observations than required.
    InsufficientHistory {
        /// Observations available.
        points: usize,
        /// Observations required.
        required: usize,
    },
    /// The model could not be fitted or projected.
    ModelFitFailure(ModelFitError),
}

/// An entity left out of the run, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntity {
    /// Entity identifier.
    pub public_id: EntityId,
    /// Reason it was skipped.
    pub reason: SkipReason,
}

/// Everything one forecasting run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastReport {
    /// Latest snapshot instant; the run's notion of "now".
    pub as_of: DateTime<Utc>,
    /// Checkpoint instants, one per calendar date.
    pub checkpoints: Vec<DateTime<Utc>>,
    /// Predictions ordered by final projected value, highest first.
    pub results: Vec<PredictionResult>,
    /// Entities left out.
    pub skipped: Vec<SkippedEntity>,
    /// Unit worth per checkpoint.
    pub worth_timeline: Vec<WorthTimelineRow>,
}

impl ForecastReport {
    /// Entities skipped for short history.
    #[must_use]
    pub fn insufficient_history(&self) -> usize {
        self.skipped
            .iter()
            .filter(|s| matches!(s.reason, SkipReason::InsufficientHistory { .. }))
            .count()
    }

    /// Entities whose model failed.
    #[must_use]
    pub fn fit_failures(&self) -> usize {
        self.skipped
            .iter()
            .filter(|s| matches!(s.reason, SkipReason::ModelFitFailure(_)))
            .count()
    }

    /// The prediction table as JSON rows.
    #[must_use]
    pub fn rows(&self) -> Vec<Map<String, Value>> {
        self.results.iter().map(PredictionResult::to_row).collect()
    }
}

/// Reads the historical store, fits one trend per entity and publishes the
/// results.
///
/// Per-entity failures are isolated: they are logged, counted in the
/// report and never abort the run.
#[derive(Debug)]
pub struct ForecastingEngine {
    store: Arc<dyn SnapshotStore>,
    model: Arc<dyn TrendModel>,
    artifacts: ArtifactWriter,
    settings: ForecastSettings,
}

impl ForecastingEngine {
    /// Creates a new `ForecastingEngine`.
    #[must_use]
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        model: Arc<dyn TrendModel>,
        artifacts: ArtifactWriter,
        settings: ForecastSettings,
    ) -> Self {
        Self {
            store,
            model,
            artifacts,
            settings,
        }
    }

    /// Computes predictions and publishes them.
    ///
    /// A run with no successful entity leaves the previous artifacts in
    /// place.
    ///
    /// # Errors
    ///
    /// Returns [`ForecastError::NoHistory`] on an empty store and
    /// [`ForecastError::Store`] if history cannot be read or artifacts
    /// cannot be written.
    pub fn run_forecast(&self) -> Result<ForecastReport, ForecastError> {
        let report = self.compute()?;
        if report.results.is_empty() {
            tracing::warn!(
                skipped = report.skipped.len(),
                "no entity could be forecast, keeping previous artifacts"
            );
            return Ok(report);
        }

        let table = self.artifacts.publish(
            "prediction table",
            PREDICTIONS_PREFIX,
            PREDICTIONS_ALIAS,
            report.as_of,
            &report.rows(),
        )?;
        let timeline = self.artifacts.publish(
            "worth timeline",
            WORTH_TIMELINE_PREFIX,
            WORTH_TIMELINE_ALIAS,
            report.as_of,
            &report.worth_timeline,
        )?;
        tracing::info!(
            predicted = report.results.len(),
            insufficient_history = report.insufficient_history(),
            fit_failures = report.fit_failures(),
            table = %table.archive.display(),
            timeline = %timeline.archive.display(),
            "forecast published"
        );
        Ok(report)
    }

    /// Computes predictions without writing anything.
    ///
    /// Deterministic: unchanged history yields an identical report.
    ///
    /// # Errors
    ///
    /// Same as [`ForecastingEngine::run_forecast`], minus write failures.
    pub fn compute(&self) -> Result<ForecastReport, ForecastError> {
        let snapshots = self.store.list_snapshots()?;
        let Some(latest) = snapshots.last() else {
            return Err(ForecastError::NoHistory);
        };
        let as_of = latest.timestamp();
        let unit_worth = latest.metadata.unit_worth;
        let checkpoints = checkpoint_schedule(
            as_of,
            self.settings.checkpoint_interval,
            self.settings.distribution_end,
            self.settings.redemption_end,
        );
        tracing::info!(
            snapshots = snapshots.len(),
            %as_of,
            checkpoints = checkpoints.len(),
            "forecast started"
        );

        let mut series: Vec<HistoricalSeries> = index_series(&snapshots).into_values().collect();
        series.sort_by(|a, b| {
            latest_units(b)
                .cmp(&latest_units(a))
                .then_with(|| a.public_id().cmp(b.public_id()))
        });
        if let Some(limit) = self.settings.limit_entities {
            series.truncate(limit);
        }

        let mut results = Vec::new();
        let mut skipped = Vec::new();
        for entity in &series {
            match self.forecast_entity(entity, &checkpoints, unit_worth) {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(reason) => skipped.push(SkippedEntity {
                    public_id: entity.public_id().clone(),
                    reason,
                }),
            }
        }
        results.sort_by(|a, b| {
            final_value(b)
                .total_cmp(&final_value(a))
                .then_with(|| a.public_id.cmp(&b.public_id))
        });

        let worth_timeline = self.worth_timeline(&snapshots, &checkpoints);
        let report = ForecastReport {
            as_of,
            checkpoints,
            results,
            skipped,
            worth_timeline,
        };
        tracing::info!(
            entities = series.len(),
            predicted = report.results.len(),
            insufficient_history = report.insufficient_history(),
            fit_failures = report.fit_failures(),
            "forecast computed"
        );
        Ok(report)
    }

    fn forecast_entity(
        &self,
        series: &HistoricalSeries,
        checkpoints: &[DateTime<Utc>],
        unit_worth: f64,
    ) -> Result<Option<PredictionResult>, SkipReason> {
        let Some(latest) = series.latest() else {
            return Ok(None);
        };
        let required = self.settings.min_data_points;
        if series.len() < required {
            tracing::debug!(
                public_id = %series.public_id(),
                points = series.len(),
                required,
                "insufficient history"
            );
            return Err(SkipReason::InsufficientHistory {
                points: series.len(),
                required,
            });
        }

        let decreases = series.decreases();
        if let Some(first) = decreases.first() {
            tracing::warn!(
                public_id = %series.public_id(),
                count = decreases.len(),
                from = %first.from,
                before = first.before,
                after = first.after,
                "unit count went down in history"
            );
        }

        let projected = self
            .model
            .fit(&series.unit_counts())
            .and_then(|fitted| {
                monotone_projection(fitted.as_ref(), latest.record.unit_count, checkpoints)
            })
            .map_err(|err| {
                tracing::warn!(public_id = %series.public_id(), error = %err, "model fit failed");
                SkipReason::ModelFitFailure(err)
            })?;

        let projections = checkpoints
            .iter()
            .zip(projected)
            .map(|(at, unit_count)| {
                (
                    at.date_naive(),
                    Projection {
                        unit_count,
                        value: estimated_value(unit_count, unit_worth),
                    },
                )
            })
            .collect();
        Ok(Some(PredictionResult {
            public_id: series.public_id().clone(),
            name: latest.record.name.clone(),
            current_unit_count: latest.record.unit_count,
            current_value: latest.record.estimated_value,
            checkpoints: projections,
        }))
    }

    /// Projected unit worth per checkpoint.
    ///
    /// With a prize pool the global unit total is forecast with the same
    /// model and worth is `pool / projected total`. Otherwise, or when that
    /// forecast fails, worth stays at its latest value.
    fn worth_timeline(
        &self,
        snapshots: &[Snapshot],
        checkpoints: &[DateTime<Utc>],
    ) -> Vec<WorthTimelineRow> {
        let Some(latest) = snapshots.last() else {
            return Vec::new();
        };
        let current_total = latest.metadata.total_units;
        let constant = || {
            checkpoints
                .iter()
                .map(|at| WorthTimelineRow {
                    checkpoint: at.date_naive(),
                    projected_total_units: current_total,
                    unit_worth: latest.metadata.unit_worth,
                })
                .collect()
        };

        let Some(pool) = self.settings.prize_pool else {
            return constant();
        };
        if snapshots.len() < self.settings.min_data_points {
            tracing::info!(
                snapshots = snapshots.len(),
                "too little history for a worth forecast, holding worth constant"
            );
            return constant();
        }

        #[allow(clippy::cast_precision_loss)]
        let totals: Vec<(DateTime<Utc>, f64)> = snapshots
            .iter()
            .map(|s| (s.timestamp(), s.metadata.total_units as f64))
            .collect();
        let projected = self
            .model
            .fit(&totals)
            .and_then(|fitted| monotone_projection(fitted.as_ref(), current_total, checkpoints));
        match projected {
            Ok(projected) => checkpoints
                .iter()
                .zip(projected)
                .map(|(at, total)| WorthTimelineRow {
                    checkpoint: at.date_naive(),
                    projected_total_units: total,
                    unit_worth: pool_share(pool, total),
                })
                .collect(),
            Err(err) => {
                tracing::warn!(error = %err, "worth forecast failed, holding worth constant");
                constant()
            }
        }
    }
}

fn latest_units(series: &HistoricalSeries) -> u64 {
    series.latest().map_or(0, |p| p.record.unit_count)
}

/// `pool / total_units` in cents, or 0 when there are no units.
fn pool_share(pool: f64, total_units: u64) -> f64 {
    if total_units == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let units = total_units as f64;
    round_cents(pool / units)
}

fn final_value(result: &PredictionResult) -> f64 {
    result.final_projection().map_or(0.0, |p| p.value)
}
