//! voucher-tracker entry point.
//!
//! Runs one collection and/or one forecast and exits. Meant to be invoked by
//! an external scheduler; the exit code tells it what happened.
//!
//! ```text
//! voucher-tracker [all|collect|forecast]
//! ```

use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing_subscriber::EnvFilter;

use voucher_tracker::clock::{Clock, SystemClock};
use voucher_tracker::config::{LogFormat, TrackerConfig};
use voucher_tracker::error::CollectionError;
use voucher_tracker::lock::LockManager;
use voucher_tracker::persistence::{ArtifactWriter, JsonDirStore, SnapshotStore};
use voucher_tracker::service::{ForecastingEngine, SnapshotCollector};
use voucher_tracker::upstream::{HttpPageSource, RateLimitedFetcher};

/// Exit code for configuration and startup failures.
const EXIT_STARTUP: u8 = 1;

/// Which stages to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    All,
    Collect,
    Forecast,
}

impl RunMode {
    const fn collects(self) -> bool {
        matches!(self, Self::All | Self::Collect)
    }

    const fn forecasts(self) -> bool {
        matches!(self, Self::All | Self::Forecast)
    }
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "collect" => Ok(Self::Collect),
            "forecast" => Ok(Self::Forecast),
            other => bail!("unknown mode {other:?}, expected all|collect|forecast"),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = format_args!("{err:#}"), "startup failed");
            ExitCode::from(EXIT_STARTUP)
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let config = TrackerConfig::from_env();
    init_tracing(config.as_ref().map_or(LogFormat::Text, |c| c.log_format));
    let config = config.context("loading configuration")?;
    let mode: RunMode = std::env::args()
        .nth(1)
        .as_deref()
        .unwrap_or("all")
        .parse()?;
    tracing::info!(?mode, version = env!("CARGO_PKG_VERSION"), "voucher-tracker starting");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn SnapshotStore> = Arc::new(JsonDirStore::new(&config.data_dir));
    let mut exit_code = 0_u8;

    if mode.collects() {
        let source = HttpPageSource::new(
            &config.upstream_url,
            config.request_timeout,
            &config.user_agent,
        )
        .context("building upstream client")?;
        let fetcher = RateLimitedFetcher::new(
            Arc::new(source),
            config.rate_limit_delay,
            config.retry_policy(),
        );
        let collector = SnapshotCollector::new(
            fetcher,
            Arc::clone(&store),
            LockManager::new(&config.lock_dir, Arc::clone(&clock)),
            Arc::clone(&clock),
            config.collector_settings(),
        );

        match collector.run_collection().await {
            Ok(_) => {}
            Err(err @ CollectionError::AlreadyRunning { .. }) => {
                tracing::info!(error = %err, "another run holds the lock, skipping");
                return Ok(ExitCode::from(err.exit_code()));
            }
            Err(err) => exit_code = err.exit_code(),
        }
    }

    if mode.forecasts() {
        let engine = ForecastingEngine::new(
            store,
            Arc::new(config.trend_model()),
            ArtifactWriter::new(&config.predictions_dir),
            config.forecast_settings(),
        );
        if let Err(err) = engine.run_forecast() {
            tracing::error!(stage = err.stage(), error = %err, "forecast failed");
            if exit_code == 0 {
                exit_code = err.exit_code();
            }
        }
    }

    tracing::info!(exit_code, "voucher-tracker finished");
    Ok(ExitCode::from(exit_code))
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
