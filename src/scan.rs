//! Scan Orchestrator.
//!
//! A single task owns the Idle → Scanning → Merging → Publishing cycle. The
//! timer and on-demand rescans both feed the same trigger channel; a rescan
//! that arrives mid-cycle is answered with that cycle's outcome instead of
//! starting another one.
//!
//! The published snapshot lives in a `watch` channel created by [`start`] and
//! dropped when the orchestrator task exits. Each cycle builds a fresh
//! `Arc<Snapshot>` and swaps it in with one `send_replace`, so readers hold
//! either the previous snapshot or the new one.
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::classify::{self, ActiveFilter};
use crate::dashboard::Dashboard;
use crate::discovery::{Discovery, RepositoryEntry};
use crate::model::{Linkage, RepositoryRecord, ScanOutcome, Snapshot};
use crate::probe::Prober;
use crate::review::{parse_github_url, BatchClient, FetchSource, RepoSlug, ReviewFetch};
use crate::worktree::merge_worktrees;

const TRIGGER_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanPhase {
    Idle,
    Scanning,
    Merging,
    Publishing,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan orchestrator is not running")]
    Stopped,
}

pub(crate) enum Trigger {
    Rescan(oneshot::Sender<ScanOutcome>),
    Shutdown,
}

/// Collaborators and limits for the orchestrator.
pub struct ScanContext {
    pub discovery: Arc<dyn Discovery>,
    pub prober: Arc<Prober>,
    /// `None` disables review-request fetching.
    pub reviews: Option<Arc<BatchClient>>,
    pub workers: usize,
    pub interval: Duration,
    pub active: ActiveFilter,
}

/// Spawn the orchestrator. The first cycle starts immediately.
pub fn start(ctx: ScanContext) -> (Dashboard, JoinHandle<()>) {
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(Snapshot::empty()));
    let (phase_tx, phase_rx) = watch::channel(ScanPhase::Idle);
    let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE);
    let active = ctx.active;

    let scanner = Scanner {
        ctx,
        snapshot: snapshot_tx,
        phase: phase_tx,
        triggers: trigger_rx,
        cycle: 0,
    };
    let handle = tokio::spawn(scanner.run());
    let dashboard = Dashboard::new(snapshot_rx, phase_rx, trigger_tx, active);
    (dashboard, handle)
}

struct Scanner {
    ctx: ScanContext,
    snapshot: watch::Sender<Arc<Snapshot>>,
    phase: watch::Sender<ScanPhase>,
    triggers: mpsc::Receiver<Trigger>,
    cycle: u64,
}

impl Scanner {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.ctx.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let mut waiters = Vec::new();
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("timer triggered scan");
                }
                trigger = self.triggers.recv() => match trigger {
                    Some(Trigger::Rescan(reply)) => waiters.push(reply),
                    Some(Trigger::Shutdown) | None => break,
                },
            }

            let outcome = self.run_cycle().await;

            let mut shutdown = false;
            while let Ok(trigger) = self.triggers.try_recv() {
                match trigger {
                    Trigger::Rescan(reply) => waiters.push(reply),
                    Trigger::Shutdown => shutdown = true,
                }
            }
            if waiters.len() > 1 {
                debug!(callers = waiters.len(), "coalesced rescan requests");
            }
            for reply in waiters {
                let _ = reply.send(outcome.clone());
            }
            if shutdown {
                break;
            }
            // The next timed cycle is one full interval after this one ended.
            ticker.reset();
        }
        info!(cycles = self.cycle, "scan orchestrator stopped");
    }

    fn set_phase(&self, phase: ScanPhase) {
        debug!(?phase, "scan phase");
        self.phase.send_replace(phase);
    }

    #[instrument(skip_all, fields(cycle = self.cycle + 1))]
    async fn run_cycle(&mut self) -> ScanOutcome {
        self.cycle += 1;
        let cycle = self.cycle;
        let started = Instant::now();
        self.set_phase(ScanPhase::Scanning);
        info!(cycle, "scan cycle started");

        let entries = match self.ctx.discovery.discover().await {
            Ok(entries) => entries,
            Err(err) => {
                error!(?err, "repository discovery failed; publishing empty snapshot");
                let message = format!("discovery failed: {:#}", err);
                self.set_phase(ScanPhase::Publishing);
                self.publish(Snapshot {
                    cycle,
                    records: Vec::new(),
                    scanned_at: chrono::Utc::now(),
                    duration_ms: elapsed_ms(started),
                    review_error: None,
                    errors: vec![message.clone()],
                });
                self.set_phase(ScanPhase::Idle);
                return ScanOutcome {
                    cycle,
                    repositories_scanned: 0,
                    duration_ms: elapsed_ms(started),
                    errors: Vec::new(),
                    scan_error: Some(message),
                };
            }
        };
        let (entries, mut errors) = dedupe_names(entries);
        let slugs: BTreeSet<RepoSlug> = entries
            .iter()
            .filter_map(|e| e.remote.url().and_then(parse_github_url))
            .collect();

        let local = async {
            let (records, probe_errors) =
                probe_all(self.ctx.prober.clone(), &entries, self.ctx.workers).await;
            self.set_phase(ScanPhase::Merging);
            let mut records = records;
            merge_worktrees(&mut records);
            let now = chrono::Utc::now();
            for record in records.iter_mut() {
                classify::classify(record, now);
            }
            (records, probe_errors)
        };
        let ((mut records, probe_errors), reviews) =
            tokio::join!(local, self.fetch_reviews(&slugs));
        errors.extend(probe_errors);
        attach_reviews(&mut records, &reviews);

        self.set_phase(ScanPhase::Publishing);
        let duration_ms = elapsed_ms(started);
        let repositories_scanned = records.len();
        self.publish(Snapshot {
            cycle,
            records,
            scanned_at: chrono::Utc::now(),
            duration_ms,
            review_error: reviews.error.clone(),
            errors: errors.clone(),
        });
        self.set_phase(ScanPhase::Idle);

        info!(
            cycle,
            repositories = repositories_scanned,
            failed = errors.len(),
            duration_ms,
            reviews = ?reviews.source,
            "scan cycle published"
        );
        ScanOutcome {
            cycle,
            repositories_scanned,
            duration_ms,
            errors,
            scan_error: None,
        }
    }

    async fn fetch_reviews(&self, slugs: &BTreeSet<RepoSlug>) -> ReviewFetch {
        match &self.ctx.reviews {
            Some(client) => client.fetch(slugs).await,
            None => ReviewFetch {
                requests: Arc::default(),
                fetched_at: None,
                source: FetchSource::Skipped,
                error: None,
            },
        }
    }

    fn publish(&self, snapshot: Snapshot) {
        self.snapshot.send_replace(Arc::new(snapshot));
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Record names must be unique within a snapshot; later duplicates are
/// dropped and reported.
fn dedupe_names(entries: Vec<RepositoryEntry>) -> (Vec<RepositoryEntry>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(entries.len());
    let mut errors = Vec::new();
    for entry in entries {
        if seen.insert(entry.name.clone()) {
            kept.push(entry);
        } else {
            warn!(repo = %entry.name, path = %entry.path.display(), "duplicate repository name; skipping");
            errors.push(format!("{}: duplicate name at {}", entry.name, entry.path.display()));
        }
    }
    (kept, errors)
}

/// Probe every entry with at most `workers` probes in flight. A free slot is
/// refilled as soon as any probe finishes. Output is put back in discovery
/// order; failed probes are logged and left out.
async fn probe_all(
    prober: Arc<Prober>,
    entries: &[RepositoryEntry],
    workers: usize,
) -> (Vec<RepositoryRecord>, Vec<String>) {
    let mut results: Vec<_> = stream::iter(entries.to_vec().into_iter().enumerate())
        .map(move |(index, entry)| {
            let prober = prober.clone();
            async move {
                let result = prober.probe(&entry).await;
                (index, entry, result)
            }
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;
    results.sort_by_key(|(index, _, _)| *index);

    let mut records = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for (_, entry, result) in results {
        match result {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(repo = %entry.name, %err, "probe failed; omitting repository");
                errors.push(format!("{}: {}", entry.name, err));
            }
        }
    }
    (records, errors)
}

/// Each remote's review requests land on one record: its primary checkout if
/// one is present, otherwise the first checkout with that remote.
fn attach_reviews(records: &mut [RepositoryRecord], reviews: &ReviewFetch) {
    if reviews.requests.is_empty() {
        return;
    }
    let mut owner: HashMap<RepoSlug, usize> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        let Some(slug) = record.remote.url().and_then(parse_github_url) else {
            continue;
        };
        match owner.get(&slug) {
            Some(&j) if records[j].linkage == Linkage::Primary => {}
            Some(_) if record.linkage != Linkage::Primary => {}
            _ => {
                owner.insert(slug, i);
            }
        }
    }
    for (slug, i) in owner {
        if let Some(list) = reviews.for_repo(&slug) {
            records[i].review_requests = list.clone();
        }
    }
}
