//! Read-side API over the published snapshot. Every projection is computed
//! from the current snapshot on each call.
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use crate::classify::{self, ActiveFilter};
use crate::model::{
    Health, Overview, RepositoryRecord, ReviewRequestEntry, ReviewRequestListing, ScanOutcome,
    Snapshot,
};
use crate::scan::{ScanError, ScanPhase, Trigger};

/// Cheap to clone; every clone reads the same snapshot holder.
#[derive(Clone)]
pub struct Dashboard {
    snapshot: watch::Receiver<Arc<Snapshot>>,
    phase: watch::Receiver<ScanPhase>,
    triggers: mpsc::Sender<Trigger>,
    active: ActiveFilter,
}

impl Dashboard {
    pub(crate) fn new(
        snapshot: watch::Receiver<Arc<Snapshot>>,
        phase: watch::Receiver<ScanPhase>,
        triggers: mpsc::Sender<Trigger>,
        active: ActiveFilter,
    ) -> Self {
        Self {
            snapshot,
            phase,
            triggers,
            active,
        }
    }

    /// Current published snapshot. Never waits on an in-flight cycle.
    pub fn get_snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn get_repository(&self, name: &str) -> Option<RepositoryRecord> {
        self.get_snapshot().find(name).cloned()
    }

    pub fn get_all_review_requests(&self) -> ReviewRequestListing {
        review_requests(&self.get_snapshot())
    }

    pub fn get_overview(&self) -> Overview {
        overview(&self.get_snapshot())
    }

    pub fn get_health(&self) -> Health {
        let snapshot = self.get_snapshot();
        Health {
            repositories: snapshot.records.len(),
            cycle: snapshot.cycle,
            last_scan: snapshot.scanned_at,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        *self.phase.borrow()
    }

    pub fn default_active_filter(&self) -> ActiveFilter {
        self.active
    }

    /// Records passing the active predicate, evaluated against the current
    /// time and `filter` on every call.
    pub fn active_repositories(&self, filter: ActiveFilter) -> Vec<RepositoryRecord> {
        let now = Utc::now();
        self.get_snapshot()
            .records
            .iter()
            .filter(|r| classify::is_active(r, filter, now))
            .cloned()
            .collect()
    }

    /// Request a cycle and wait for it to publish. Joins the in-flight cycle
    /// if one is running.
    pub async fn force_rescan(&self) -> Result<ScanOutcome, ScanError> {
        let (reply, outcome) = oneshot::channel();
        self.triggers
            .send(Trigger::Rescan(reply))
            .await
            .map_err(|_| ScanError::Stopped)?;
        outcome.await.map_err(|_| ScanError::Stopped)
    }

    /// Stop the orchestrator after any in-flight cycle finishes.
    pub async fn shutdown(&self) {
        let _ = self.triggers.send(Trigger::Shutdown).await;
    }

    /// Resolves once a snapshot newer than `cycle` has been published.
    pub async fn wait_for_cycle(&self, cycle: u64) -> Result<Arc<Snapshot>, ScanError> {
        let mut rx = self.snapshot.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            if current.cycle > cycle {
                return Ok(current);
            }
            rx.changed().await.map_err(|_| ScanError::Stopped)?;
        }
    }
}

pub fn overview(snapshot: &Snapshot) -> Overview {
    let records = &snapshot.records;
    Overview {
        total_repositories: records.len(),
        dirty_repositories: records.iter().filter(|r| r.dirty).count(),
        clean_repositories: records.iter().filter(|r| !r.dirty).count(),
        ahead_repositories: records.iter().filter(|r| r.divergence.ahead() > 0).count(),
        behind_repositories: records.iter().filter(|r| r.divergence.behind() > 0).count(),
        open_review_requests: records.iter().map(|r| r.review_requests.len()).sum(),
        stale_branches: records.iter().map(|r| r.stale_branches.len()).sum(),
        scanned_at: snapshot.scanned_at,
    }
}

pub fn review_requests(snapshot: &Snapshot) -> ReviewRequestListing {
    let requests = snapshot
        .records
        .iter()
        .flat_map(|r| {
            r.review_requests.iter().map(move |request| ReviewRequestEntry {
                repository: r.name.clone(),
                category: r.category.clone(),
                request: request.clone(),
            })
        })
        .collect();
    ReviewRequestListing {
        requests,
        error: snapshot.review_error.clone(),
    }
}
