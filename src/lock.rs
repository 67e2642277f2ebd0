//! TTL-bearing file locks for named critical sections.
//!
//! A lock is a marker file `.<name>.lock` holding a JSON [`LockRecord`].
//! Markers are created with `create_new`, so of two concurrent acquirers
//! exactly one wins. A marker older than its TTL belongs to a crashed run:
//! the next acquirer renames it to a tombstone and proceeds.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::LockError;

/// Name of the lock guarding collection runs.
pub const COLLECTION_LOCK: &str = "collector";

/// Default lock TTL.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(600);

/// Contents of a lock marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Identity of the run holding the lock.
    pub holder_id: Uuid,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
    /// Seconds after `acquired_at` at which the marker is abandoned.
    pub ttl_secs: u64,
}

impl LockRecord {
    /// Seconds elapsed since acquisition.
    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.acquired_at).num_seconds()
    }

    /// `true` once `now - acquired_at >= ttl`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::seconds(i64::try_from(self.ttl_secs).unwrap_or(i64::MAX));
        now - self.acquired_at >= ttl
    }
}

/// Proof of holding a named lock, passed through the guarded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    name: String,
    record: LockRecord,
}

impl LockToken {
    /// Lock name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marker contents written on acquisition.
    #[must_use]
    pub const fn record(&self) -> &LockRecord {
        &self.record
    }
}

/// Creates and removes lock markers in one directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    /// Creates a manager keeping markers under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    /// Path of the marker for `name`.
    #[must_use]
    pub fn marker_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!(".{name}.lock"))
    }

    /// Takes the lock `name` for `ttl`.
    ///
    /// An expired marker is reclaimed and the acquisition proceeds. Of
    /// several acquirers racing for the same expired marker, at most one
    /// wins.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Held`] if an unexpired marker exists, or
    /// [`LockError::Io`] if the marker cannot be read or written.
    pub fn acquire(&self, name: &str, ttl: Duration) -> Result<LockToken, LockError> {
        let path = self.marker_path(name);
        fs::create_dir_all(&self.dir).map_err(|source| LockError::Io {
            path: self.dir.clone(),
            source,
        })?;

        // Extra passes only happen after a marker vanished or was reclaimed.
        for _ in 0..3 {
            let now = self.clock.now();
            let record = LockRecord {
                holder_id: Uuid::new_v4(),
                acquired_at: now,
                ttl_secs: ttl.as_secs(),
            };
            match create_marker(&path, &record) {
                Ok(()) => {
                    tracing::info!(lock = name, holder = %record.holder_id, "lock acquired");
                    return Ok(LockToken {
                        name: name.to_string(),
                        record,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(source) => return Err(LockError::Io { path, source }),
            }

            let Some(existing) = read_marker(&path, ttl.as_secs())? else {
                // Holder released between our create and read.
                continue;
            };
            if !existing.is_expired(now) {
                return Err(held(name, &existing, now));
            }
            tracing::warn!(
                lock = name,
                holder = %existing.holder_id,
                age_secs = existing.age_secs(now),
                ttl_secs = existing.ttl_secs,
                "reclaiming expired lock marker"
            );
            if let Some(current) = self.reclaim(name, &path, &existing, ttl)? {
                return Err(held(name, &current, now));
            }
        }

        let existing = read_marker(&path, ttl.as_secs())?;
        let now = self.clock.now();
        Err(LockError::Held {
            name: name.to_string(),
            holder: existing
                .as_ref()
                .map(|r| r.holder_id)
                .filter(|id| !id.is_nil()),
            age_secs: existing.as_ref().map_or(0, |r| r.age_secs(now)),
            ttl_secs: ttl.as_secs(),
        })
    }

    /// Moves the expired marker `expected` out of the way.
    ///
    /// The marker is renamed to a unique tombstone first, so only one of
    /// several racing acquirers can take it. If the tombstone turns out to
    /// hold a different record, a fresh marker was moved by mistake: it is
    /// linked back and its record returned.
    fn reclaim(
        &self,
        name: &str,
        path: &Path,
        expected: &LockRecord,
        ttl: Duration,
    ) -> Result<Option<LockRecord>, LockError> {
        let tombstone = self
            .dir
            .join(format!(".{name}.lock.{}.stale", Uuid::new_v4()));
        match fs::rename(path, &tombstone) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }

        let moved = read_marker(&tombstone, ttl.as_secs())?;
        if moved.as_ref().is_none_or(|record| record == expected) {
            remove_marker(&tombstone)?;
            return Ok(None);
        }

        // Hard link keeps the inode, so a holder still writing is unaffected.
        if let Err(err) = fs::hard_link(&tombstone, path) {
            tracing::error!(
                lock = name,
                error = %err,
                "failed to restore a lock marker moved during reclaim"
            );
        }
        remove_marker(&tombstone)?;
        Ok(moved)
    }

    /// Removes the marker for `token` unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] if the marker exists but cannot be removed.
    pub fn release(&self, token: LockToken) -> Result<(), LockError> {
        let path = self.marker_path(&token.name);
        if let Ok(Some(current)) = read_marker(&path, token.record.ttl_secs)
            && current.holder_id != token.record.holder_id
        {
            tracing::warn!(
                lock = %token.name,
                ours = %token.record.holder_id,
                theirs = %current.holder_id,
                "releasing a marker written by another holder"
            );
        }
        remove_marker(&path)?;
        tracing::info!(lock = %token.name, holder = %token.record.holder_id, "lock released");
        Ok(())
    }
}

/// Releases its lock when dropped, unless released explicitly first.
#[derive(Debug)]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    token: Option<LockToken>,
}

impl<'a> LockGuard<'a> {
    /// Wraps an acquired token.
    #[must_use]
    pub const fn new(manager: &'a LockManager, token: LockToken) -> Self {
        Self {
            manager,
            token: Some(token),
        }
    }

    /// The held token, if not yet released.
    #[must_use]
    pub const fn token(&self) -> Option<&LockToken> {
        self.token.as_ref()
    }

    /// Releases the lock now, reporting failures.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] if the marker cannot be removed.
    pub fn release(mut self) -> Result<(), LockError> {
        match self.token.take() {
            Some(token) => self.manager.release(token),
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take()
            && let Err(err) = self.manager.release(token)
        {
            tracing::error!(error = %err, "failed to release lock on drop");
        }
    }
}

fn create_marker(path: &Path, record: &LockRecord) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(record)?;
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let written = file.write_all(&bytes).and_then(|()| file.sync_all());
    if let Err(err) = written {
        let _ = fs::remove_file(path);
        return Err(err);
    }
    Ok(())
}

fn held(name: &str, existing: &LockRecord, now: DateTime<Utc>) -> LockError {
    LockError::Held {
        name: name.to_string(),
        holder: (!existing.holder_id.is_nil()).then_some(existing.holder_id),
        age_secs: existing.age_secs(now),
        ttl_secs: existing.ttl_secs,
    }
}

/// Reads a marker. Unparsable markers are aged by modification time and
/// given `ttl_secs`.
fn read_marker(path: &Path, ttl_secs: u64) -> Result<Option<LockRecord>, LockError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if let Ok(record) = serde_json::from_slice::<LockRecord>(&bytes) {
        return Ok(Some(record));
    }

    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::warn!(path = %path.display(), "unreadable lock marker, using file age");
    Ok(Some(LockRecord {
        holder_id: Uuid::nil(),
        acquired_at: DateTime::<Utc>::from(modified),
        ttl_secs,
    }))
}

fn remove_marker(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use chrono::TimeZone;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::clock::ManualClock;

    fn start() -> DateTime<Utc> {
        let Some(t) = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single() else {
            panic!("valid instant");
        };
        t
    }

    fn manager(dir: &Path) -> (LockManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let as_dyn: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
        (LockManager::new(dir, as_dyn), clock)
    }

    fn tempdir() -> tempfile::TempDir {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        dir
    }

    #[test]
    fn acquire_writes_marker_and_release_removes_it() {
        let dir = tempdir();
        let (locks, _) = manager(dir.path());

        let token = assert_ok!(locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL));
        let path = locks.marker_path(COLLECTION_LOCK);
        assert!(path.exists());
        assert_eq!(token.record().acquired_at, start());
        assert_eq!(token.record().ttl_secs, 600);

        assert_ok!(locks.release(token));
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_fails_while_fresh() {
        let dir = tempdir();
        let (locks, clock) = manager(dir.path());

        let first = assert_ok!(locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL));
        clock.advance(chrono::Duration::seconds(599));

        let err = assert_err!(locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL));
        let LockError::Held {
            holder, age_secs, ..
        } = err
        else {
            panic!("expected Held, got {err:?}");
        };
        assert_eq!(holder, Some(first.record().holder_id));
        assert_eq!(age_secs, 599);
    }

    #[test]
    fn expired_marker_is_reclaimed() {
        let dir = tempdir();
        let (locks, clock) = manager(dir.path());

        let stale = assert_ok!(locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL));
        // Simulate a crashed holder: never released.
        clock.advance(chrono::Duration::seconds(600));

        let fresh = assert_ok!(locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL));
        assert_ne!(fresh.record().holder_id, stale.record().holder_id);
        assert_eq!(
            fresh.record().acquired_at,
            start() + chrono::Duration::seconds(600)
        );
    }

    #[test]
    fn different_names_do_not_conflict() {
        let dir = tempdir();
        let (locks, _) = manager(dir.path());
        let _a = assert_ok!(locks.acquire("collector", DEFAULT_LOCK_TTL));
        let _b = assert_ok!(locks.acquire("backfill", DEFAULT_LOCK_TTL));
    }

    #[test]
    fn concurrent_acquires_yield_exactly_one_winner() {
        let dir = tempdir();
        // Real "now": a loser may observe the winner's marker before its
        // contents land and fall back to the file's modification time.
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let locks = LockManager::new(dir.path(), clock as Arc<dyn Clock>);
        let barrier = Barrier::new(2);

        let results: Vec<Result<LockToken, LockError>> = thread::scope(|s| {
            let handles = [
                s.spawn(|| {
                    barrier.wait();
                    locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL)
                }),
                s.spawn(|| {
                    barrier.wait();
                    locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL)
                }),
            ];
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(result) => result,
                    Err(_) => panic!("acquire thread panicked"),
                })
                .collect()
        });

        let wins = results.iter().filter(|r| r.is_ok()).count();
        let held = results
            .iter()
            .filter(|r| matches!(r, Err(LockError::Held { .. })))
            .count();
        assert_eq!((wins, held), (1, 1));
    }

    fn seed_marker(locks: &LockManager, record: &LockRecord) {
        let Ok(bytes) = serde_json::to_vec(record) else {
            panic!("serialize marker");
        };
        assert_ok!(fs::write(locks.marker_path(COLLECTION_LOCK), bytes));
    }

    #[test]
    fn racing_reclaims_of_expired_marker_yield_one_winner() {
        for round in 0..500 {
            let dir = tempdir();
            let now = Utc::now();
            let clock = Arc::new(ManualClock::new(now));
            let locks = LockManager::new(dir.path(), clock as Arc<dyn Clock>);
            seed_marker(
                &locks,
                &LockRecord {
                    holder_id: Uuid::new_v4(),
                    acquired_at: now - chrono::Duration::seconds(601),
                    ttl_secs: DEFAULT_LOCK_TTL.as_secs(),
                },
            );
            let barrier = Barrier::new(2);

            let wins = thread::scope(|s| {
                let handles = [
                    s.spawn(|| {
                        barrier.wait();
                        locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL)
                    }),
                    s.spawn(|| {
                        barrier.wait();
                        locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL)
                    }),
                ];
                handles
                    .into_iter()
                    .map(|h| match h.join() {
                        Ok(result) => result,
                        Err(_) => panic!("acquire thread panicked"),
                    })
                    .filter(Result::is_ok)
                    .count()
            });
            assert_eq!(wins, 1, "round {round}: expected exactly one winner");

            let Ok(entries) = fs::read_dir(dir.path()) else {
                panic!("list lock dir");
            };
            let leftovers = entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().ends_with(".stale"))
                .count();
            assert_eq!(leftovers, 0, "round {round}: tombstone left behind");
        }
    }

    #[test]
    fn reclaim_leaves_a_fresh_marker_in_place() {
        let dir = tempdir();
        let (locks, _) = manager(dir.path());
        let stale = LockRecord {
            holder_id: Uuid::new_v4(),
            acquired_at: start() - chrono::Duration::seconds(601),
            ttl_secs: DEFAULT_LOCK_TTL.as_secs(),
        };
        // Another acquirer replaced the expired marker after we read it.
        let fresh = LockRecord {
            holder_id: Uuid::new_v4(),
            acquired_at: start(),
            ttl_secs: DEFAULT_LOCK_TTL.as_secs(),
        };
        seed_marker(&locks, &fresh);

        let path = locks.marker_path(COLLECTION_LOCK);
        let current = assert_ok!(locks.reclaim(COLLECTION_LOCK, &path, &stale, DEFAULT_LOCK_TTL));
        assert_eq!(current.as_ref(), Some(&fresh));
        let Ok(Some(on_disk)) = read_marker(&path, DEFAULT_LOCK_TTL.as_secs()) else {
            panic!("marker must be restored");
        };
        assert_eq!(on_disk, fresh);

        let err = assert_err!(locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL));
        assert!(matches!(err, LockError::Held { holder: Some(h), .. } if h == fresh.holder_id));
    }

    #[test]
    fn unparsable_marker_uses_callers_ttl() {
        let dir = tempdir();
        let clock = Arc::new(ManualClock::new(Utc::now() + chrono::Duration::seconds(120)));
        let locks = LockManager::new(dir.path(), clock as Arc<dyn Clock>);
        assert_ok!(fs::write(locks.marker_path(COLLECTION_LOCK), b"garbage"));

        // Two minutes old: expired under a 60s TTL, fresh under the default.
        let short = Duration::from_secs(60);
        let token = assert_ok!(locks.acquire(COLLECTION_LOCK, short));
        assert_eq!(token.record().ttl_secs, 60);
        assert_ok!(locks.release(token));

        assert_ok!(fs::write(locks.marker_path(COLLECTION_LOCK), b"garbage"));
        let err = assert_err!(locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL));
        assert!(matches!(err, LockError::Held { ttl_secs: 600, .. }));
    }

    #[test]
    fn guard_releases_on_drop() {
        let dir = tempdir();
        let (locks, _) = manager(dir.path());
        {
            let token = assert_ok!(locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL));
            let guard = LockGuard::new(&locks, token);
            assert!(guard.token().is_some());
            assert!(locks.marker_path(COLLECTION_LOCK).exists());
        }
        assert!(!locks.marker_path(COLLECTION_LOCK).exists());
        assert_ok!(locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL));
    }

    #[test]
    fn unparsable_marker_counts_as_fresh_by_file_age() {
        let dir = tempdir();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let locks = LockManager::new(dir.path(), clock as Arc<dyn Clock>);
        assert_ok!(fs::write(locks.marker_path(COLLECTION_LOCK), b"12345"));

        let err = assert_err!(locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL));
        assert!(matches!(err, LockError::Held { holder: None, .. }));
    }

    #[test]
    fn release_of_missing_marker_is_ok() {
        let dir = tempdir();
        let (locks, _) = manager(dir.path());
        let token = assert_ok!(locks.acquire(COLLECTION_LOCK, DEFAULT_LOCK_TTL));
        assert_ok!(fs::remove_file(locks.marker_path(COLLECTION_LOCK)));
        assert_ok!(locks.release(token));
    }
}
