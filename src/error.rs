//! Error types for the collection and forecasting pipeline.
//!
//! Page-level failures ([`AttemptError`]) are retried inside the fetcher and
//! only escape wrapped in a [`FetchError`]. Run-level errors
//! ([`CollectionError`], [`ForecastError`]) carry a stage label and map to a
//! process exit code so the external scheduler can tell outcomes apart.
//!
//! # Exit Codes
//!
//! | Code | Meaning                                             |
//! |------|-----------------------------------------------------|
//! | 0    | Success, or skipped because another run holds the lock |
//! | 1    | Configuration or startup failure                    |
//! | 2    | Collection run failed                               |
//! | 3    | Forecast run failed                                 |

use std::path::PathBuf;

use uuid::Uuid;

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable was set but could not be used.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// Environment variable name.
        key: &'static str,
        /// Raw value as found in the environment.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Lock manager failures.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another holder owns an unexpired marker.
    #[error(
        "lock {name} is held by {} (age {age_secs}s, ttl {ttl_secs}s)",
        display_holder(.holder.as_ref())
    )]
    Held {
        /// Lock name.
        name: String,
        /// Holder recorded in the marker, if readable.
        holder: Option<Uuid>,
        /// Marker age in seconds at the time of the attempt.
        age_secs: i64,
        /// TTL recorded in the marker.
        ttl_secs: u64,
    },

    /// Reading, creating or removing the marker failed.
    #[error("lock marker i/o failed at {}: {source}", .path.display())]
    Io {
        /// Marker path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A single failed request against the upstream listing endpoint.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    /// Connection, timeout or protocol failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream answered with a non-2xx status.
    #[error("upstream returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Upstream answered 2xx with no body.
    #[error("empty response body")]
    EmptyBody,

    /// Body could not be decoded as a listing page.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// A page that kept failing after every retry attempt.
#[derive(Debug, thiserror::Error)]
#[error("page {page_index} failed after {attempts} attempts: {last_error}")]
pub struct FetchError {
    /// Zero-based page index.
    pub page_index: usize,
    /// Number of attempts made.
    pub attempts: u32,
    /// Error returned by the final attempt.
    #[source]
    pub last_error: AttemptError,
}

/// Historical store and artifact persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("store i/o failed at {}: {source}", .path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Serializing an artifact failed.
    #[error("failed to encode {what}: {source}")]
    Encode {
        /// Artifact kind.
        what: &'static str,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A stored artifact could not be decoded.
    #[error("corrupt artifact {}: {reason}", .path.display())]
    Corrupt {
        /// Artifact path.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },
}

/// Outcome of a failed [`crate::service::SnapshotCollector::run_collection`].
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    /// Another collection run holds the lock. Skip, do not retry.
    #[error(
        "collection already running (holder {}, age {age_secs}s)",
        display_holder(.holder.as_ref())
    )]
    AlreadyRunning {
        /// Holder recorded in the marker, if readable.
        holder: Option<Uuid>,
        /// Marker age in seconds.
        age_secs: i64,
    },

    /// A page exhausted its retries; nothing was written.
    #[error("collection aborted after {records_collected} records: {source}")]
    PartialFailure {
        /// Unique records gathered before the failure.
        records_collected: usize,
        /// The page failure.
        #[source]
        source: FetchError,
    },

    /// The upstream listing contained no entities.
    #[error("upstream returned an empty listing")]
    EmptyListing,

    /// Lock marker could not be managed.
    #[error("lock error: {0}")]
    Lock(#[source] LockError),

    /// Writing the snapshot failed.
    #[error("persist error: {0}")]
    Persist(#[from] StoreError),
}

impl CollectionError {
    /// Returns the pipeline stage the run failed in.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::AlreadyRunning { .. } | Self::Lock(_) => "lock",
            Self::PartialFailure { .. } | Self::EmptyListing => "fetch",
            Self::Persist(_) => "persist",
        }
    }

    /// Returns the process exit code for this outcome.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::AlreadyRunning { .. } => 0,
            _ => 2,
        }
    }
}

impl From<LockError> for CollectionError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Held {
                holder, age_secs, ..
            } => Self::AlreadyRunning { holder, age_secs },
            other @ LockError::Io { .. } => Self::Lock(other),
        }
    }
}

/// Why a trend model could not be fitted to one entity's series.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelFitError {
    /// Not enough observations to estimate a slope.
    #[error("need at least {required} points, got {got}")]
    TooFewPoints {
        /// Points available.
        got: usize,
        /// Points required by the model.
        required: usize,
    },

    /// Every observation shares one timestamp.
    #[error("all observations share one timestamp")]
    DegenerateSeries,

    /// The fit produced NaN or infinity.
    #[error("fit produced a non-finite {0}")]
    NonFinite(&'static str),
}

/// Run-level forecasting failure. Per-entity problems never surface here.
#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    /// The historical store holds no snapshots.
    #[error("no snapshots in the historical store")]
    NoHistory,

    /// Reading history or writing artifacts failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ForecastError {
    /// Returns the pipeline stage the run failed in.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::NoHistory => "load",
            Self::Store(_) => "store",
        }
    }

    /// Returns the process exit code for this outcome.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        3
    }
}

fn display_holder(holder: Option<&Uuid>) -> String {
    holder.map_or_else(|| "unknown".to_string(), Uuid::to_string)
}
