//! Review-Request Batch Client.
//!
//! All outstanding lookups go out as one remote query. The result set is held
//! in a single cache slot with a fixed TTL; the slot's lock is held across the
//! check-then-fetch so racing callers never issue duplicate remote queries.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::model::ReviewRequest;

pub mod gh;
pub mod model;

pub use gh::GhCli;

static GITHUB_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https://github\.com/|git@github\.com:)([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+?)(?:\.git)?/?$")
        .unwrap()
});

/// `owner/name` of a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn web_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Extract the slug from an HTTPS or SSH GitHub URL. Other hosts yield `None`.
pub fn parse_github_url(url: &str) -> Option<RepoSlug> {
    let caps = GITHUB_URL.captures(url.trim())?;
    Some(RepoSlug::new(&caps[1], &caps[2]))
}

pub type ReviewMap = HashMap<RepoSlug, Vec<ReviewRequest>>;

/// "Given these repositories, return their open review requests in one round
/// trip."
#[async_trait]
pub trait ReviewQuery: Send + Sync {
    async fn query(&self, repos: &[RepoSlug]) -> Result<ReviewMap>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// Issued a remote query just now.
    Remote,
    /// Served from a cache entry still inside its TTL.
    Cache,
    /// Remote query failed; served the last good result.
    Stale,
    /// Remote query failed and nothing was cached.
    Unavailable,
    /// No repository had a GitHub identifier; nothing to ask.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ReviewFetch {
    pub requests: Arc<ReviewMap>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub source: FetchSource,
    /// Set only when the caller gets an empty mapping because of a failure.
    pub error: Option<String>,
}

impl ReviewFetch {
    fn empty(source: FetchSource, error: Option<String>) -> Self {
        Self {
            requests: Arc::new(ReviewMap::new()),
            fetched_at: None,
            source,
            error,
        }
    }

    pub fn for_repo(&self, slug: &RepoSlug) -> Option<&Vec<ReviewRequest>> {
        self.requests.get(slug)
    }
}

struct CacheEntry {
    key: BTreeSet<RepoSlug>,
    fetched: Instant,
    fetched_at: DateTime<Utc>,
    requests: Arc<ReviewMap>,
}

pub struct BatchClient {
    query: Arc<dyn ReviewQuery>,
    ttl: Duration,
    slot: Mutex<Option<CacheEntry>>,
}

impl BatchClient {
    pub fn new(query: Arc<dyn ReviewQuery>, ttl: Duration) -> Self {
        Self {
            query,
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Review requests for `repos`, from cache when the slot holds the same
    /// repository set and is younger than the TTL.
    pub async fn fetch(&self, repos: &BTreeSet<RepoSlug>) -> ReviewFetch {
        self.fetch_inner(repos, false).await
    }

    /// Bypass the TTL and overwrite the cache slot.
    pub async fn refresh(&self, repos: &BTreeSet<RepoSlug>) -> ReviewFetch {
        self.fetch_inner(repos, true).await
    }

    #[instrument(skip_all, fields(repos = repos.len(), force = force))]
    async fn fetch_inner(&self, repos: &BTreeSet<RepoSlug>, force: bool) -> ReviewFetch {
        if repos.is_empty() {
            return ReviewFetch::empty(FetchSource::Skipped, None);
        }

        let mut slot = self.slot.lock().await;
        if !force {
            if let Some(entry) = slot.as_ref() {
                if entry.key == *repos && entry.fetched.elapsed() < self.ttl {
                    debug!("review requests served from cache");
                    return ReviewFetch {
                        requests: entry.requests.clone(),
                        fetched_at: Some(entry.fetched_at),
                        source: FetchSource::Cache,
                        error: None,
                    };
                }
            }
        }

        let list: Vec<RepoSlug> = repos.iter().cloned().collect();
        match self.query.query(&list).await {
            Ok(map) => {
                let requests = Arc::new(map);
                let fetched_at = Utc::now();
                *slot = Some(CacheEntry {
                    key: repos.clone(),
                    fetched: Instant::now(),
                    fetched_at,
                    requests: requests.clone(),
                });
                debug!(with_requests = requests.len(), "review requests fetched");
                ReviewFetch {
                    requests,
                    fetched_at: Some(fetched_at),
                    source: FetchSource::Remote,
                    error: None,
                }
            }
            Err(err) => match slot.as_ref() {
                Some(entry) => {
                    warn!(?err, cached_at = %entry.fetched_at, "review batch failed; serving stale cache");
                    ReviewFetch {
                        requests: entry.requests.clone(),
                        fetched_at: Some(entry.fetched_at),
                        source: FetchSource::Stale,
                        error: None,
                    }
                }
                None => {
                    warn!(?err, "review batch failed; no cache available");
                    ReviewFetch::empty(FetchSource::Unavailable, Some(format!("{:#}", err)))
                }
            },
        }
    }
}
