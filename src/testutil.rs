use chrono::Utc;
use std::path::PathBuf;

use crate::model::{
    Activity, Divergence, Freshness, Linkage, Remote, RepositoryRecord, StatusCategory,
};

/// A clean primary checkout with an up-to-date upstream and no commits.
pub fn record(name: &str) -> RepositoryRecord {
    RepositoryRecord {
        name: name.to_string(),
        path: PathBuf::from(format!("/repos/{name}")),
        remote: Remote::NoRemote,
        category: "other".into(),
        branch: Some("main".into()),
        default_branch: "main".into(),
        dirty: false,
        uncommitted_files: 0,
        insertions: 0,
        deletions: 0,
        last_commit_at: None,
        last_commit_summary: None,
        divergence: Divergence::Tracking { ahead: 0, behind: 0 },
        branch_count: 1,
        stale_branches: Vec::new(),
        linkage: Linkage::Primary,
        worktrees: Vec::new(),
        stash_count: 0,
        review_requests: Vec::new(),
        activity: Activity {
            last_activity: None,
            dirty: false,
        },
        status: StatusCategory::Clean,
        freshness: Freshness::Neutral,
        failures: Vec::new(),
        scanned_at: Utc::now(),
    }
}
