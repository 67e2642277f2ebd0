//! Checkpoint schedule for the forecast horizon.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Instants at which projections are reported, one per calendar date.
///
/// Starts at `start` and steps by `interval` while not past
/// `redemption_end`, then adds `distribution_end` (when not before `start`)
/// and `redemption_end`. When two instants share a date the later one wins.
/// If `start` is already past `redemption_end` the schedule is just
/// `[redemption_end]`.
#[must_use]
pub fn checkpoint_schedule(
    start: DateTime<Utc>,
    interval: Duration,
    distribution_end: DateTime<Utc>,
    redemption_end: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let mut by_date: BTreeMap<NaiveDate, DateTime<Utc>> = BTreeMap::new();
    let mut add = |at: DateTime<Utc>| {
        by_date
            .entry(at.date_naive())
            .and_modify(|existing| {
                if at > *existing {
                    *existing = at;
                }
            })
            .or_insert(at);
    };

    if start <= redemption_end {
        if interval > Duration::zero() {
            let mut at = start;
            while at <= redemption_end {
                add(at);
                at += interval;
            }
        } else {
            add(start);
        }
        if distribution_end >= start {
            add(distribution_end);
        }
    }
    add(redemption_end);

    by_date.into_values().collect()
}
