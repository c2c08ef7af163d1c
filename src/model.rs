use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Divergence from the configured upstream. A checkout without an upstream is
/// never reported as `0/0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Divergence {
    NoUpstream,
    Tracking { ahead: u32, behind: u32 },
}

impl Divergence {
    pub fn ahead(&self) -> u32 {
        match self {
            Divergence::NoUpstream => 0,
            Divergence::Tracking { ahead, .. } => *ahead,
        }
    }

    pub fn behind(&self) -> u32 {
        match self {
            Divergence::NoUpstream => 0,
            Divergence::Tracking { behind, .. } => *behind,
        }
    }

    pub fn has_upstream(&self) -> bool {
        matches!(self, Divergence::Tracking { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum Remote {
    NoRemote,
    Url(String),
}

impl Remote {
    pub fn url(&self) -> Option<&str> {
        match self {
            Remote::NoRemote => None,
            Remote::Url(url) => Some(url),
        }
    }
}

/// Whether a checkout is a primary or a linked secondary. The secondary only
/// names its primary; it does not own or borrow it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Linkage {
    Primary,
    Secondary { primary: String },
}

impl Linkage {
    pub fn primary_name(&self) -> Option<&str> {
        match self {
            Linkage::Primary => None,
            Linkage::Secondary { primary } => Some(primary),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    Behind,
    Dirty,
    Ahead,
    Clean,
}

impl StatusCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCategory::Behind => "Behind",
            StatusCategory::Dirty => "Dirty",
            StatusCategory::Ahead => "Ahead",
            StatusCategory::Clean => "Clean",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Recent,
    Neutral,
    Stale,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Recent => "recent",
            Freshness::Neutral => "neutral",
            Freshness::Stale => "stale",
        }
    }
}

/// Derived activity used for status and freshness. For a primary this folds in
/// every linked secondary; for anything else it mirrors the record's own fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Activity {
    pub last_activity: Option<DateTime<Utc>>,
    pub dirty: bool,
}

/// Individual probe queries, used to tag per-field degradation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProbeField {
    Branch,
    WorkingTree,
    LineCounts,
    LastCommit,
    Divergence,
    DefaultBranch,
    Branches,
    StaleBranches,
    Worktrees,
    Stashes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldFailure {
    pub field: ProbeField,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Open,
    Draft,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Success,
    Failure,
    Pending,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    Required,
    None,
}

/// One open review request on a remote repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewRequest {
    pub number: u64,
    pub title: String,
    pub source_branch: String,
    pub url: String,
    pub state: ReviewState,
    pub updated_at: DateTime<Utc>,
    pub ci: CiStatus,
    pub review: ReviewDecision,
}

/// Local state of one checkout, produced fresh by every scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepositoryRecord {
    pub name: String,
    pub path: PathBuf,
    pub remote: Remote,
    pub category: String,

    pub branch: Option<String>,
    pub default_branch: String,
    pub dirty: bool,
    pub uncommitted_files: u32,
    pub insertions: u64,
    pub deletions: u64,

    pub last_commit_at: Option<DateTime<Utc>>,
    pub last_commit_summary: Option<String>,

    pub divergence: Divergence,

    pub branch_count: u32,
    pub stale_branches: Vec<String>,

    pub linkage: Linkage,
    /// Paths of linked secondary checkouts reported by this checkout.
    pub worktrees: Vec<PathBuf>,
    pub stash_count: u32,

    pub review_requests: Vec<ReviewRequest>,

    pub activity: Activity,
    pub status: StatusCategory,
    pub freshness: Freshness,

    pub failures: Vec<FieldFailure>,
    pub scanned_at: DateTime<Utc>,
}

impl RepositoryRecord {
    pub fn worktree_count(&self) -> usize {
        self.worktrees.len()
    }

    pub fn is_secondary(&self) -> bool {
        matches!(self.linkage, Linkage::Secondary { .. })
    }

    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// The published result of one full scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    /// Zero until the first cycle publishes.
    pub cycle: u64,
    pub records: Vec<RepositoryRecord>,
    pub scanned_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Set when review-request data could not be fetched and no cache existed.
    pub review_error: Option<String>,
    /// Repositories omitted from this snapshot and why.
    pub errors: Vec<String>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            cycle: 0,
            records: Vec::new(),
            scanned_at: Utc::now(),
            duration_ms: 0,
            review_error: None,
            errors: Vec::new(),
        }
    }

    pub fn find(&self, name: &str) -> Option<&RepositoryRecord> {
        self.records.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Overview {
    pub total_repositories: usize,
    pub dirty_repositories: usize,
    pub clean_repositories: usize,
    pub ahead_repositories: usize,
    pub behind_repositories: usize,
    pub open_review_requests: usize,
    pub stale_branches: usize,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewRequestEntry {
    pub repository: String,
    pub category: String,
    pub request: ReviewRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewRequestListing {
    pub requests: Vec<ReviewRequestEntry>,
    pub error: Option<String>,
}

/// What a caller of `force_rescan` gets back once its cycle publishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanOutcome {
    pub cycle: u64,
    pub repositories_scanned: usize,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    /// Present only when the cycle could not run at all.
    pub scan_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Health {
    pub repositories: usize,
    pub cycle: u64,
    pub last_scan: DateTime<Utc>,
}
