//! Worktree Merger: folds linked secondary checkouts into their primary's
//! derived activity.
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::model::{Activity, Linkage, RepositoryRecord};

/// Recompute `activity` for every record in one cycle's batch.
///
/// A primary's activity is the latest commit time and the OR of dirty flags
/// across itself and every secondary naming it. Literal fields are never
/// touched, and secondaries keep activity derived from their own fields only.
/// A secondary whose primary is missing from the batch is left as-is.
pub fn merge_worktrees(records: &mut [RepositoryRecord]) {
    let mut folded: HashMap<String, Activity> = HashMap::new();
    for record in records.iter() {
        if let Linkage::Secondary { primary } = &record.linkage {
            let acc = folded.entry(primary.clone()).or_insert(Activity {
                last_activity: None,
                dirty: false,
            });
            acc.last_activity = latest(acc.last_activity, record.last_commit_at);
            acc.dirty |= record.dirty;
        }
    }

    for record in records.iter_mut() {
        let own = Activity {
            last_activity: record.last_commit_at,
            dirty: record.dirty,
        };
        record.activity = match (&record.linkage, folded.get(&record.name)) {
            (Linkage::Primary, Some(secondaries)) => Activity {
                last_activity: latest(own.last_activity, secondaries.last_activity),
                dirty: own.dirty || secondaries.dirty,
            },
            _ => own,
        };
    }
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::record;
    use chrono::Duration;

    #[test]
    fn secondary_activity_drives_primary_aggregate() {
        let now = Utc::now();
        let mut primary = record("api");
        primary.last_commit_at = Some(now - Duration::days(10));
        let mut secondary = record("api-feature");
        secondary.linkage = Linkage::Secondary {
            primary: "api".into(),
        };
        secondary.last_commit_at = Some(now - Duration::hours(1));
        secondary.dirty = true;
        let secondary_before = secondary.clone();

        let mut records = vec![primary, secondary];
        merge_worktrees(&mut records);

        let p = &records[0];
        assert_eq!(p.last_commit_at, Some(now - Duration::days(10)));
        assert!(!p.dirty);
        assert_eq!(p.activity.last_activity, Some(now - Duration::hours(1)));
        assert!(p.activity.dirty);

        // Secondary literal fields untouched.
        let s = &records[1];
        assert_eq!(s.last_commit_at, secondary_before.last_commit_at);
        assert_eq!(s.dirty, secondary_before.dirty);
        assert_eq!(s.divergence, secondary_before.divergence);
        assert_eq!(s.activity.last_activity, s.last_commit_at);
    }

    #[test]
    fn orphan_secondary_is_kept() {
        let mut orphan = record("lost-wt");
        orphan.linkage = Linkage::Secondary {
            primary: "gone".into(),
        };
        orphan.last_commit_at = Some(Utc::now());
        let mut records = vec![orphan.clone(), record("other")];
        merge_worktrees(&mut records);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].linkage, orphan.linkage);
        assert_eq!(records[0].activity.last_activity, orphan.last_commit_at);
        assert_eq!(records[1].activity.last_activity, None);
    }

    #[test]
    fn primary_newer_than_secondaries_keeps_its_time() {
        let now = Utc::now();
        let mut primary = record("api");
        primary.last_commit_at = Some(now);
        let mut a = record("wt-a");
        a.linkage = Linkage::Secondary { primary: "api".into() };
        a.last_commit_at = None;
        let mut b = record("wt-b");
        b.linkage = Linkage::Secondary { primary: "api".into() };
        b.last_commit_at = Some(now - Duration::days(3));

        let mut records = vec![a, primary, b];
        merge_worktrees(&mut records);
        assert_eq!(records[1].activity.last_activity, Some(now));
        assert!(!records[1].activity.dirty);
    }
}
