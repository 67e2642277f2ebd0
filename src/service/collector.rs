//! Snapshot collector: one full pass over the upstream listing per run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::domain::{EntityId, Snapshot, round_cents};
use crate::error::CollectionError;
use crate::lock::{COLLECTION_LOCK, DEFAULT_LOCK_TTL, LockGuard, LockManager};
use crate::persistence::SnapshotStore;
use crate::upstream::{Page, RateLimitedFetcher, UPSTREAM_MAX_PAGE_SIZE, UpstreamRecord};

/// Tunables for [`SnapshotCollector`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectorSettings {
    /// Records requested per page, capped at the upstream maximum.
    pub page_size: usize,
    /// TTL written into the collection lock marker.
    pub lock_ttl: Duration,
    /// Stop after this many unique entities.
    pub limit_entities: Option<usize>,
    /// Total payout used to derive unit worth when the upstream omits it.
    pub prize_pool: Option<f64>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            page_size: UPSTREAM_MAX_PAGE_SIZE,
            lock_ttl: DEFAULT_LOCK_TTL,
            limit_entities: None,
            prize_pool: None,
        }
    }
}

/// Aggregate metadata taken from the first page of a run.
#[derive(Debug, Clone, Copy, Default)]
struct Declared {
    total_count: Option<u64>,
    total_units: Option<u64>,
    unit_worth: Option<f64>,
}

impl Declared {
    fn from_page(page: &Page) -> Self {
        Self {
            total_count: page.total_count,
            total_units: page.total_units,
            unit_worth: page.unit_worth,
        }
    }
}

/// Collects the full listing under the collection lock and appends it to
/// the historical store.
///
/// A run either appends exactly one complete snapshot or appends nothing.
#[derive(Debug)]
pub struct SnapshotCollector {
    fetcher: RateLimitedFetcher,
    store: Arc<dyn SnapshotStore>,
    locks: LockManager,
    clock: Arc<dyn Clock>,
    settings: CollectorSettings,
}

impl SnapshotCollector {
    /// Creates a new `SnapshotCollector`.
    #[must_use]
    pub fn new(
        fetcher: RateLimitedFetcher,
        store: Arc<dyn SnapshotStore>,
        locks: LockManager,
        clock: Arc<dyn Clock>,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            fetcher,
            store,
            locks,
            clock,
            settings,
        }
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    /// Runs one collection.
    ///
    /// The lock is released on every exit path. A release failure after the
    /// run is logged and does not change the outcome.
    ///
    /// # Errors
    ///
    /// - [`CollectionError::AlreadyRunning`] if another run holds the lock;
    ///   no request is made.
    /// - [`CollectionError::PartialFailure`] if a page exhausts its retries;
    ///   nothing is written.
    /// - [`CollectionError::EmptyListing`] if the upstream has no entities.
    /// - [`CollectionError::Lock`] or [`CollectionError::Persist`] on local
    ///   I/O failures.
    pub async fn run_collection(&self) -> Result<Snapshot, CollectionError> {
        let token = self.locks.acquire(COLLECTION_LOCK, self.settings.lock_ttl)?;
        tracing::info!(holder = %token.record().holder_id, "collection lock acquired");
        let guard = LockGuard::new(&self.locks, token);

        let outcome = self.collect_and_persist().await;

        if let Err(err) = guard.release() {
            tracing::warn!(error = %err, "failed to release collection lock");
        }
        match &outcome {
            Ok(snapshot) => tracing::info!(
                entities = snapshot.metadata.total_entities,
                total_units = snapshot.metadata.total_units,
                unit_worth = snapshot.metadata.unit_worth,
                "collection complete"
            ),
            Err(err) => tracing::error!(stage = err.stage(), error = %err, "collection failed"),
        }
        outcome
    }

    async fn collect_and_persist(&self) -> Result<Snapshot, CollectionError> {
        let timestamp = self.clock.now();
        let (declared, upstream) = self.fetch_listing().await?;
        if upstream.is_empty() {
            return Err(CollectionError::EmptyListing);
        }

        let unit_worth = self.resolve_unit_worth(&declared, &upstream);
        let records = upstream
            .into_iter()
            .map(|record| record.into_record(unit_worth))
            .collect();
        let snapshot = Snapshot::new(timestamp, unit_worth, records);

        if self.settings.limit_entities.is_none()
            && let Some(total) = declared.total_count
            && total != snapshot.metadata.total_entities as u64
        {
            tracing::warn!(
                declared = total,
                collected = snapshot.metadata.total_entities,
                "collected entity count differs from declared total"
            );
        }
        self.log_unit_decreases(&snapshot);

        self.store.append(&snapshot)?;
        Ok(snapshot)
    }

    /// Walks pages from index 0, deduplicating by id (last seen wins).
    ///
    /// Stops on a short page, at the declared total, at the entity limit, or
    /// when a full page brings no new id.
    async fn fetch_listing(&self) -> Result<(Declared, Vec<UpstreamRecord>), CollectionError> {
        let page_size = self.settings.page_size.clamp(1, UPSTREAM_MAX_PAGE_SIZE);
        let limit = self.settings.limit_entities;
        let mut declared = Declared::default();
        let mut records: Vec<UpstreamRecord> = Vec::new();
        let mut positions: HashMap<EntityId, usize> = HashMap::new();
        let mut page_index = 0_usize;

        loop {
            let page = self
                .fetcher
                .fetch_page(page_index, page_size)
                .await
                .map_err(|source| CollectionError::PartialFailure {
                    records_collected: records.len(),
                    source,
                })?;
            if page_index == 0 {
                declared = Declared::from_page(&page);
            }

            let fetched = page.results.len();
            let unique_before = records.len();
            for item in page.results {
                if let Some(existing) = positions
                    .get(&item.public_id)
                    .and_then(|pos| records.get_mut(*pos))
                {
                    if existing != &item {
                        tracing::warn!(
                            public_id = %item.public_id,
                            page_index,
                            "duplicate entity with differing fields, keeping last seen"
                        );
                    }
                    *existing = item;
                    continue;
                }
                if limit.is_some_and(|max| records.len() >= max) {
                    continue;
                }
                positions.insert(item.public_id.clone(), records.len());
                records.push(item);
            }
            tracing::info!(page_index, fetched, unique = records.len(), "page collected");

            // A full page of known ids means the upstream is not advancing.
            if fetched >= page_size
                && records.len() == unique_before
                && !limit.is_some_and(|max| records.len() >= max)
            {
                tracing::warn!(
                    page_index,
                    fetched,
                    unique = records.len(),
                    "full page added no new entities, stopping pagination"
                );
                break;
            }

            let offset_reached = page_index.saturating_add(1).saturating_mul(page_size) as u64;
            if fetched < page_size
                || declared.total_count.is_some_and(|total| offset_reached >= total)
                || limit.is_some_and(|max| records.len() >= max)
            {
                break;
            }
            page_index += 1;
        }
        Ok((declared, records))
    }

    /// Upstream worth if published, else prize pool over total units.
    fn resolve_unit_worth(&self, declared: &Declared, records: &[UpstreamRecord]) -> f64 {
        if let Some(worth) = declared.unit_worth.filter(|w| w.is_finite() && *w >= 0.0) {
            return worth;
        }
        let total_units = declared
            .total_units
            .unwrap_or_else(|| records.iter().map(|r| r.unit_count).sum());
        match self.settings.prize_pool {
            Some(pool) if total_units > 0 => {
                #[allow(clippy::cast_precision_loss)]
                let worth = round_cents(pool / total_units as f64);
                tracing::debug!(pool, total_units, worth, "unit worth derived from prize pool");
                worth
            }
            _ => {
                tracing::warn!("unit worth unavailable, valuing units at 0");
                0.0
            }
        }
    }

    /// Logs entities whose unit count went down since the latest snapshot.
    fn log_unit_decreases(&self, snapshot: &Snapshot) {
        let previous = match self.store.latest() {
            Ok(Some(previous)) => previous,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(error = %err, "cannot read previous snapshot, skipping decrease check");
                return;
            }
        };
        let before: HashMap<&EntityId, u64> = previous
            .records
            .iter()
            .map(|r| (&r.public_id, r.unit_count))
            .collect();
        let mut decreases = 0_usize;
        for record in &snapshot.records {
            if let Some(prior) = before.get(&record.public_id).copied()
                && record.unit_count < prior
            {
                decreases += 1;
                tracing::warn!(
                    public_id = %record.public_id,
                    before = prior,
                    after = record.unit_count,
                    "unit count decreased since previous snapshot"
                );
            }
        }
        if decreases > 0 {
            tracing::warn!(decreases, "unit count decreases detected");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::atomic::MAX_NAME_SUFFIX;
    use crate::persistence::{
        ArtifactWriter, JsonDirStore, LATEST_ALIAS, MemoryStore, SNAPSHOT_PREFIX,
    };
    use crate::upstream::fetcher::tests::ScriptedSource;
    use crate::upstream::{PageSource, RetryPolicy};

    fn record(id: &str, units: u64) -> UpstreamRecord {
        UpstreamRecord {
            public_id: EntityId::from(id),
            name: format!("Club {id}"),
            rank: None,
            supporter_count: 1,
            donation_sum: "0".to_string(),
            unit_count: units,
        }
    }

    fn page(total: u64, worth: Option<f64>, results: Vec<UpstreamRecord>) -> Page {
        Page {
            total_count: Some(total),
            total_units: None,
            unit_worth: worth,
            results,
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        source: Arc<ScriptedSource>,
        store: Arc<MemoryStore>,
        collector: SnapshotCollector,
    }

    fn run_start() -> chrono::DateTime<Utc> {
        let Some(now) = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single() else {
            panic!("valid instant");
        };
        now
    }

    fn build(
        script: Vec<Result<Page, u16>>,
        settings: CollectorSettings,
        store: Arc<dyn SnapshotStore>,
        lock_dir: &std::path::Path,
    ) -> (Arc<ScriptedSource>, SnapshotCollector) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(run_start()));
        let source = Arc::new(ScriptedSource::new(script));
        let fetcher = RateLimitedFetcher::new(
            Arc::clone(&source) as Arc<dyn PageSource>,
            Duration::from_millis(1),
            RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(10),
            },
        );
        let collector = SnapshotCollector::new(
            fetcher,
            store,
            LockManager::new(lock_dir, Arc::clone(&clock)),
            clock,
            settings,
        );
        (source, collector)
    }

    fn harness(script: Vec<Result<Page, u16>>, settings: CollectorSettings) -> Harness {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let store = Arc::new(MemoryStore::new());
        let (source, collector) = build(
            script,
            settings,
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            dir.path(),
        );
        Harness {
            _dir: dir,
            source,
            store,
            collector,
        }
    }

    fn small_pages() -> CollectorSettings {
        CollectorSettings {
            page_size: 2,
            ..CollectorSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn collects_all_pages_and_persists() {
        let h = harness(
            vec![
                Ok(page(3, Some(2.0), vec![record("a", 10), record("b", 20)])),
                Ok(page(3, Some(2.0), vec![record("c", 30)])),
            ],
            small_pages(),
        );
        let snapshot = assert_ok!(h.collector.run_collection().await);
        assert_eq!(snapshot.metadata.total_entities, 3);
        assert_eq!(snapshot.metadata.total_units, 60);
        assert!(snapshot.check_consistency().is_ok());
        assert!(snapshot
            .records
            .iter()
            .all(|r| (r.estimated_value - r.unit_count as f64 * 2.0).abs() < 0.005));
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.source.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_keep_last_seen() {
        let h = harness(
            vec![
                Ok(page(4, Some(1.0), vec![record("a", 10), record("b", 20)])),
                Ok(page(4, Some(1.0), vec![record("b", 25), record("c", 5)])),
            ],
            small_pages(),
        );
        let snapshot = assert_ok!(h.collector.run_collection().await);
        assert_eq!(snapshot.records.len(), 3);
        let b = snapshot.record(&EntityId::from("b")).map(|r| r.unit_count);
        assert_eq!(b, Some(25));
        assert!(snapshot.check_consistency().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_page_aborts_without_writing() {
        let h = harness(
            vec![
                Ok(page(6, Some(1.0), vec![record("a", 1), record("b", 2)])),
                Err(500),
                Err(500),
                Err(500),
            ],
            small_pages(),
        );
        let err = assert_err!(h.collector.run_collection().await);
        let CollectionError::PartialFailure {
            records_collected,
            source,
        } = err
        else {
            panic!("expected PartialFailure, got {err:?}");
        };
        assert_eq!(records_collected, 2);
        assert_eq!(source.page_index, 1);
        assert_eq!(source.attempts, 3);
        assert!(h.store.is_empty());
        assert!(!h.collector.locks.marker_path(COLLECTION_LOCK).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn held_lock_skips_without_network() {
        let h = harness(vec![Ok(page(1, None, vec![record("a", 1)]))], small_pages());
        let held = assert_ok!(
            h.collector
                .locks
                .acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL)
        );

        let err = assert_err!(h.collector.run_collection().await);
        assert!(matches!(err, CollectionError::AlreadyRunning { .. }));
        assert_eq!(err.exit_code(), 0);
        assert!(h.source.calls().is_empty());
        assert!(h.store.is_empty());
        assert_ok!(h.collector.locks.release(held));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_listing_is_an_error() {
        let h = harness(vec![Ok(page(0, None, Vec::new()))], small_pages());
        let err = assert_err!(h.collector.run_collection().await);
        assert!(matches!(err, CollectionError::EmptyListing));
        assert!(h.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn worth_falls_back_to_prize_pool() {
        let settings = CollectorSettings {
            prize_pool: Some(3_000_000.0),
            ..small_pages()
        };
        let h = harness(
            vec![Ok(page(2, None, vec![record("a", 600_000), record("b", 600_000)]))],
            settings,
        );
        let snapshot = assert_ok!(h.collector.run_collection().await);
        assert!((snapshot.metadata.unit_worth - 2.5).abs() < 1e-9);
        let a = snapshot.record(&EntityId::from("a")).map(|r| r.estimated_value);
        assert_eq!(a, Some(1_500_000.0));
    }

    #[tokio::test(start_paused = true)]
    async fn limit_caps_unique_entities() {
        let settings = CollectorSettings {
            limit_entities: Some(3),
            ..small_pages()
        };
        let h = harness(
            vec![
                Ok(page(10, Some(1.0), vec![record("a", 1), record("b", 2)])),
                Ok(page(10, Some(1.0), vec![record("c", 3), record("d", 4)])),
            ],
            settings,
        );
        let snapshot = assert_ok!(h.collector.run_collection().await);
        assert_eq!(snapshot.records.len(), 3);
        assert_eq!(h.source.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_is_released_after_success() {
        let h = harness(vec![Ok(page(1, Some(1.0), vec![record("a", 1)]))], small_pages());
        assert_ok!(h.collector.run_collection().await);
        assert!(!h.collector.locks.marker_path(COLLECTION_LOCK).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_pagination_stops_on_a_page_without_new_ids() {
        let stuck = || Page {
            total_count: None,
            total_units: None,
            unit_worth: Some(1.0),
            results: vec![record("a", 1), record("b", 2)],
        };
        let h = harness(
            (0..5).map(|_| Ok(stuck())).collect(),
            small_pages(),
        );
        let snapshot = assert_ok!(h.collector.run_collection().await);
        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(h.source.calls().len(), 2);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_keeps_previous_latest_and_releases_lock() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let store = Arc::new(JsonDirStore::new(dir.path()));
        let previous = Snapshot::new(
            run_start() - chrono::Duration::hours(1),
            1.0,
            vec![record("a", 1).into_record(1.0)],
        );
        assert_ok!(store.append(&previous));
        let Ok(latest_before) = std::fs::read(dir.path().join(LATEST_ALIAS)) else {
            panic!("latest alias after seeding");
        };

        // Occupy every archive name this run could take.
        let stem = ArtifactWriter::archive_stem(SNAPSHOT_PREFIX, run_start());
        for suffix in 0..=MAX_NAME_SUFFIX {
            let name = if suffix == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}_{suffix}.json")
            };
            assert_ok!(std::fs::create_dir(dir.path().join(name)));
        }

        let (_, collector) = build(
            vec![Ok(page(1, Some(1.0), vec![record("a", 5)]))],
            small_pages(),
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            dir.path(),
        );
        let err = assert_err!(collector.run_collection().await);
        assert!(matches!(err, CollectionError::Persist(_)), "got {err:?}");
        assert_eq!(err.stage(), "persist");
        assert_eq!(err.exit_code(), 2);

        assert_eq!(
            std::fs::read(dir.path().join(LATEST_ALIAS)).ok(),
            Some(latest_before)
        );
        assert!(!collector.locks.marker_path(COLLECTION_LOCK).exists());
    }
}
