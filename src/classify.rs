//! Staleness Classifier: status category and freshness from a merged record.
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::model::{Freshness, RepositoryRecord, StatusCategory};

pub const RECENT_HOURS: i64 = 4;
pub const STALE_HOURS: i64 = 168;

/// Category precedence: Behind > (Ahead and dirty => Dirty) > Ahead > Dirty > Clean.
/// Uses the merged `activity.dirty`, so a dirty secondary marks its primary.
pub fn status_of(record: &RepositoryRecord) -> StatusCategory {
    let ahead = record.divergence.ahead();
    let behind = record.divergence.behind();
    let dirty = record.activity.dirty;
    if behind > 0 {
        StatusCategory::Behind
    } else if ahead > 0 && dirty {
        StatusCategory::Dirty
    } else if ahead > 0 {
        StatusCategory::Ahead
    } else if dirty {
        StatusCategory::Dirty
    } else {
        StatusCategory::Clean
    }
}

/// Freshness bucket from aggregate last-activity age. No commits at all is
/// neither recent nor stale.
pub fn freshness_of(record: &RepositoryRecord, now: DateTime<Utc>) -> Freshness {
    let Some(at) = record.activity.last_activity else {
        return Freshness::Neutral;
    };
    let age = now.signed_duration_since(at);
    if age < chrono::Duration::hours(RECENT_HOURS) {
        Freshness::Recent
    } else if age > chrono::Duration::hours(STALE_HOURS) {
        Freshness::Stale
    } else {
        Freshness::Neutral
    }
}

/// Write `status` and `freshness` onto the record.
pub fn classify(record: &mut RepositoryRecord, now: DateTime<Utc>) {
    record.status = status_of(record);
    record.freshness = freshness_of(record, now);
}

/// Caller-supplied parameters for the active predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveFilter {
    pub window: Duration,
    pub include_dirty: bool,
}

/// Active when the aggregate last activity falls inside `filter.window`, or
/// (if `include_dirty`) when the checkout or any of its secondaries is dirty.
pub fn is_active(record: &RepositoryRecord, filter: ActiveFilter, now: DateTime<Utc>) -> bool {
    if filter.include_dirty && record.activity.dirty {
        return true;
    }
    let Some(at) = record.activity.last_activity else {
        return false;
    };
    match chrono::Duration::from_std(filter.window) {
        Ok(window) => now.signed_duration_since(at) <= window,
        // Window too large to represent: everything with a commit qualifies.
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Divergence;
    use crate::testutil::record;
    use chrono::Duration as ChronoDuration;

    fn with(ahead: u32, behind: u32, dirty: bool) -> RepositoryRecord {
        let mut r = record("r");
        r.divergence = Divergence::Tracking { ahead, behind };
        r.dirty = dirty;
        r.activity.dirty = dirty;
        r
    }

    #[test]
    fn precedence_scenarios() {
        assert_eq!(status_of(&with(2, 0, true)), StatusCategory::Dirty);
        assert_eq!(status_of(&with(0, 3, false)), StatusCategory::Behind);
        assert_eq!(status_of(&with(1, 0, false)), StatusCategory::Ahead);
        assert_eq!(status_of(&with(0, 0, false)), StatusCategory::Clean);
    }

    #[test]
    fn behind_always_wins() {
        for ahead in [0, 1, 7] {
            for dirty in [false, true] {
                assert_eq!(status_of(&with(ahead, 1, dirty)), StatusCategory::Behind);
            }
        }
    }

    #[test]
    fn no_upstream_falls_through_to_dirty_or_clean() {
        let mut r = record("e");
        r.divergence = Divergence::NoUpstream;
        assert!(!r.divergence.has_upstream());
        assert_eq!(r.divergence.ahead(), 0);
        assert_eq!(status_of(&r), StatusCategory::Clean);
        r.activity.dirty = true;
        assert_eq!(status_of(&r), StatusCategory::Dirty);
    }

    #[test]
    fn freshness_buckets() {
        let now = Utc::now();
        let mut r = record("f");
        assert_eq!(freshness_of(&r, now), Freshness::Neutral);

        r.activity.last_activity = Some(now - ChronoDuration::hours(1));
        assert_eq!(freshness_of(&r, now), Freshness::Recent);
        r.activity.last_activity = Some(now - ChronoDuration::hours(4));
        assert_eq!(freshness_of(&r, now), Freshness::Neutral);
        r.activity.last_activity = Some(now - ChronoDuration::hours(168));
        assert_eq!(freshness_of(&r, now), Freshness::Neutral);
        r.activity.last_activity = Some(now - ChronoDuration::hours(169));
        assert_eq!(freshness_of(&r, now), Freshness::Stale);
    }

    #[test]
    fn classify_is_idempotent() {
        let now = Utc::now();
        let mut r = with(3, 0, true);
        r.activity.last_activity = Some(now - ChronoDuration::days(9));
        classify(&mut r, now);
        let first = (r.status, r.freshness);
        classify(&mut r, now);
        assert_eq!(first, (r.status, r.freshness));
        assert_eq!(first, (StatusCategory::Dirty, Freshness::Stale));
    }

    #[test]
    fn active_predicate_window_and_dirty() {
        let now = Utc::now();
        let filter = ActiveFilter {
            window: Duration::from_secs(24 * 3600),
            include_dirty: false,
        };
        let mut r = record("a");
        assert!(!is_active(&r, filter, now));

        r.activity.last_activity = Some(now - ChronoDuration::hours(2));
        assert!(is_active(&r, filter, now));

        r.activity.last_activity = Some(now - ChronoDuration::days(3));
        assert!(!is_active(&r, filter, now));

        r.activity.dirty = true;
        assert!(!is_active(&r, filter, now));
        let with_dirty = ActiveFilter {
            include_dirty: true,
            ..filter
        };
        assert!(is_active(&r, with_dirty, now));
    }
}
