//! Probe Runner: a fixed battery of read-only git queries against one checkout.
//!
//! Each query degrades only its own fields. The whole probe fails only when the
//! checkout is gone, is not a repository, git cannot be launched, or the probe
//! exceeds its time bound.
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::discovery::RepositoryEntry;
use crate::git::GitExec;
use crate::model::{
    Activity, Divergence, FieldFailure, Freshness, Linkage, ProbeField, RepositoryRecord,
    StatusCategory,
};
use crate::process::ExecError;

static INSERTIONS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) insertion").unwrap());
static DELETIONS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) deletion").unwrap());

const ORIGIN_HEAD_PREFIX: &str = "refs/remotes/origin/";
const FIELD_SEP: char = '\u{1f}';

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("checkout {0} no longer exists")]
    Vanished(PathBuf),
    #[error("{path} is not a git checkout: {source}")]
    NotARepository {
        path: PathBuf,
        #[source]
        source: ExecError,
    },
    #[error("git unavailable: {0}")]
    ToolUnavailable(#[source] ExecError),
    #[error("probe timed out after {0:?}")]
    TimedOut(Duration),
}

pub struct Prober {
    git: Arc<dyn GitExec>,
    timeout: Duration,
}

impl Prober {
    pub fn new(git: Arc<dyn GitExec>, timeout: Duration) -> Self {
        Self { git, timeout }
    }

    /// Probe one checkout. Derived fields (`activity`, `status`, `freshness`)
    /// reflect only this checkout until the merger and classifier run.
    #[instrument(skip_all, fields(repo = %entry.name))]
    pub async fn probe(&self, entry: &RepositoryEntry) -> Result<RepositoryRecord, ProbeError> {
        match tokio::time::timeout(self.timeout, self.probe_inner(entry)).await {
            Ok(res) => res,
            Err(_) => Err(ProbeError::TimedOut(self.timeout)),
        }
    }

    async fn probe_inner(&self, entry: &RepositoryEntry) -> Result<RepositoryRecord, ProbeError> {
        let path = entry.path.as_path();
        if !path.is_dir() {
            return Err(ProbeError::Vanished(entry.path.clone()));
        }
        match self.git.run(path, &["rev-parse", "--is-inside-work-tree"]).await {
            Ok(_) => {}
            Err(err) if err.is_unavailable() => return Err(ProbeError::ToolUnavailable(err)),
            Err(err) => {
                if !path.is_dir() {
                    return Err(ProbeError::Vanished(entry.path.clone()));
                }
                return Err(ProbeError::NotARepository {
                    path: entry.path.clone(),
                    source: err,
                });
            }
        }

        let mut failures = Vec::new();
        let mut note = |field: ProbeField, reason: String| {
            failures.push(FieldFailure { field, reason });
        };

        let branch = match self.git.run(path, &["symbolic-ref", "--quiet", "--short", "HEAD"]).await {
            Ok(b) if !b.trim().is_empty() => Some(b.trim().to_string()),
            Ok(_) => None,
            Err(ExecError::Failed { .. }) => {
                note(ProbeField::Branch, "HEAD is detached".into());
                None
            }
            Err(err) => {
                note(ProbeField::Branch, err.to_string());
                None
            }
        };

        let (dirty, uncommitted_files) = match self.git.run(path, &["status", "--porcelain"]).await {
            Ok(out) => {
                let n = count_lines(&out);
                (n > 0, n)
            }
            Err(err) => {
                note(ProbeField::WorkingTree, err.to_string());
                (false, 0)
            }
        };

        let mut insertions = 0;
        let mut deletions = 0;
        for args in [&["diff", "--shortstat"][..], &["diff", "--cached", "--shortstat"][..]] {
            match self.git.run(path, args).await {
                Ok(out) => {
                    let (i, d) = parse_shortstat(&out);
                    insertions += i;
                    deletions += d;
                }
                Err(err) => note(ProbeField::LineCounts, err.to_string()),
            }
        }

        let (last_commit_at, last_commit_summary) =
            match self.git.run(path, &["log", "-1", "--format=%aI%x1f%s"]).await {
                Ok(out) => match parse_last_commit(&out) {
                    Some((at, summary)) => (Some(at), Some(summary)),
                    None => {
                        note(ProbeField::LastCommit, format!("unparseable log output: {out:?}"));
                        (None, None)
                    }
                },
                Err(ExecError::Failed { stderr, .. }) if is_unborn(&stderr) => {
                    note(ProbeField::LastCommit, "no commits yet".into());
                    (None, None)
                }
                Err(err) => {
                    note(ProbeField::LastCommit, err.to_string());
                    (None, None)
                }
            };

        let divergence = match self
            .git
            .run(path, &["rev-list", "--left-right", "--count", "HEAD...@{upstream}"])
            .await
        {
            Ok(out) => match parse_divergence(&out) {
                Some(d) => d,
                None => {
                    note(ProbeField::Divergence, format!("unparseable rev-list output: {out:?}"));
                    Divergence::NoUpstream
                }
            },
            Err(ExecError::Failed { .. }) => {
                note(ProbeField::Divergence, "no upstream configured".into());
                Divergence::NoUpstream
            }
            Err(err) => {
                note(ProbeField::Divergence, err.to_string());
                Divergence::NoUpstream
            }
        };

        let local_branches = match self
            .git
            .run(path, &["branch", "--list", "--format=%(refname:short)"])
            .await
        {
            Ok(out) => Some(non_empty_lines(&out)),
            Err(err) => {
                note(ProbeField::Branches, err.to_string());
                None
            }
        };
        let branch_count = local_branches.as_ref().map_or(0, |b| b.len() as u32);

        let default_branch = match self
            .git
            .run(path, &["symbolic-ref", "refs/remotes/origin/HEAD"])
            .await
        {
            Ok(out) => parse_origin_head(&out),
            Err(_) => None,
        }
        .unwrap_or_else(|| fallback_default_branch(local_branches.as_deref().unwrap_or(&[])));

        let merged_format = "--format=%(refname:short)";
        let stale_branches = match self
            .git
            .run(
                path,
                &[
                    "branch",
                    "--merged",
                    default_branch.as_str(),
                    "--no-contains",
                    default_branch.as_str(),
                    merged_format,
                ],
            )
            .await
        {
            Ok(out) => non_empty_lines(&out)
                .into_iter()
                .filter(|b| b != &default_branch)
                .collect(),
            Err(err) => {
                note(ProbeField::StaleBranches, err.to_string());
                Vec::new()
            }
        };

        let worktrees = match &entry.linkage {
            Linkage::Secondary { .. } => Vec::new(),
            Linkage::Primary => match self.git.run(path, &["worktree", "list", "--porcelain"]).await {
                Ok(out) => parse_worktrees(&out),
                Err(err) => {
                    note(ProbeField::Worktrees, err.to_string());
                    Vec::new()
                }
            },
        };

        let stash_count = match self.git.run(path, &["stash", "list"]).await {
            Ok(out) => count_lines(&out),
            Err(err) => {
                note(ProbeField::Stashes, err.to_string());
                0
            }
        };

        // A checkout deleted while we were probing is a failed probe, not a
        // record full of degraded fields.
        if !path.is_dir() {
            return Err(ProbeError::Vanished(entry.path.clone()));
        }

        if !failures.is_empty() {
            debug!(count = failures.len(), "probe degraded");
        }

        Ok(RepositoryRecord {
            name: entry.name.clone(),
            path: entry.path.clone(),
            remote: entry.remote.clone(),
            category: entry.category.clone(),
            branch,
            default_branch,
            dirty,
            uncommitted_files,
            insertions,
            deletions,
            last_commit_at,
            last_commit_summary,
            divergence,
            branch_count,
            stale_branches,
            linkage: entry.linkage.clone(),
            worktrees,
            stash_count,
            review_requests: Vec::new(),
            activity: Activity {
                last_activity: last_commit_at,
                dirty,
            },
            status: StatusCategory::Clean,
            freshness: Freshness::Neutral,
            failures,
            scanned_at: Utc::now(),
        })
    }
}

/// `git log` on a branch with no commits.
fn is_unborn(stderr: &str) -> bool {
    stderr.contains("does not have any commits") || stderr.contains("bad default revision")
}

fn non_empty_lines(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn count_lines(out: &str) -> u32 {
    out.lines().filter(|l| !l.trim().is_empty()).count() as u32
}

/// Sum of insertions and deletions from `git diff --shortstat`.
pub fn parse_shortstat(out: &str) -> (u64, u64) {
    let grab = |re: &Regex| {
        re.captures(out)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    (grab(&INSERTIONS), grab(&DELETIONS))
}

/// `<ahead>\t<behind>` from `rev-list --left-right --count HEAD...@{upstream}`.
pub fn parse_divergence(out: &str) -> Option<Divergence> {
    let mut parts = out.split_whitespace();
    let ahead = parts.next()?.parse().ok()?;
    let behind = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Divergence::Tracking { ahead, behind })
}

/// `<iso8601 author date>\x1f<summary>` from `log -1`.
pub fn parse_last_commit(out: &str) -> Option<(DateTime<Utc>, String)> {
    let line = out.lines().next()?;
    let (date, summary) = line.split_once(FIELD_SEP)?;
    let at = DateTime::parse_from_rfc3339(date.trim()).ok()?;
    Some((at.with_timezone(&Utc), summary.to_string()))
}

fn parse_origin_head(out: &str) -> Option<String> {
    out.trim()
        .strip_prefix(ORIGIN_HEAD_PREFIX)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
}

fn fallback_default_branch(local: &[String]) -> String {
    ["main", "master"]
        .into_iter()
        .find(|candidate| local.iter().any(|b| b == candidate))
        .unwrap_or("main")
        .to_string()
}

/// Linked secondary checkouts from `worktree list --porcelain`. The first
/// entry is always the main checkout and is skipped.
pub fn parse_worktrees(out: &str) -> Vec<PathBuf> {
    out.lines()
        .filter_map(|l| l.strip_prefix("worktree "))
        .skip(1)
        .map(|p| Path::new(p.trim()).to_path_buf())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Remote;
    use async_trait::async_trait;

    /// Passes the gate, then answers every other query with `fail(args)`.
    struct FailingGit {
        fail: fn(&[&str]) -> ExecError,
    }

    #[async_trait]
    impl GitExec for FailingGit {
        async fn run(&self, _path: &Path, args: &[&str]) -> Result<String, ExecError> {
            match args {
                ["rev-parse", ..] => Ok("true".into()),
                _ => Err((self.fail)(args)),
            }
        }
    }

    async fn probe_with(fail: fn(&[&str]) -> ExecError) -> RepositoryRecord {
        let td = tempfile::tempdir().unwrap();
        let entry = RepositoryEntry {
            name: "r".into(),
            path: td.path().to_path_buf(),
            category: "other".into(),
            remote: Remote::NoRemote,
            linkage: Linkage::Primary,
        };
        Prober::new(Arc::new(FailingGit { fail }), Duration::from_secs(5))
            .probe(&entry)
            .await
            .unwrap()
    }

    fn reason(record: &RepositoryRecord, field: ProbeField) -> &str {
        record
            .failures
            .iter()
            .find(|f| f.field == field)
            .map(|f| f.reason.as_str())
            .unwrap()
    }

    #[tokio::test]
    async fn expected_failures_get_specific_reasons() {
        let record = probe_with(|args| ExecError::Failed {
            command: format!("git {}", args.join(" ")),
            status: "exit status: 128".into(),
            stderr: "fatal: your current branch 'main' does not have any commits yet".into(),
            stdout: String::new(),
        })
        .await;
        assert_eq!(record.branch, None);
        assert_eq!(reason(&record, ProbeField::Branch), "HEAD is detached");
        assert_eq!(reason(&record, ProbeField::LastCommit), "no commits yet");
        assert_eq!(record.divergence, Divergence::NoUpstream);
    }

    #[tokio::test]
    async fn command_timeouts_are_not_mislabelled() {
        let record = probe_with(|args| ExecError::Timeout {
            command: format!("git {}", args.join(" ")),
            timeout: Duration::from_secs(5),
        })
        .await;
        assert!(reason(&record, ProbeField::Branch).contains("timed out"));
        assert!(reason(&record, ProbeField::LastCommit).contains("timed out"));
        assert!(reason(&record, ProbeField::Divergence).contains("timed out"));
        assert_eq!(record.divergence, Divergence::NoUpstream);
    }

    #[test]
    fn shortstat_variants() {
        assert_eq!(
            parse_shortstat(" 3 files changed, 10 insertions(+), 4 deletions(-)"),
            (10, 4)
        );
        assert_eq!(parse_shortstat(" 1 file changed, 1 insertion(+)"), (1, 0));
        assert_eq!(parse_shortstat(" 1 file changed, 2 deletions(-)"), (0, 2));
        assert_eq!(parse_shortstat(""), (0, 0));
    }

    #[test]
    fn divergence_parsing() {
        assert_eq!(
            parse_divergence("2\t5"),
            Some(Divergence::Tracking { ahead: 2, behind: 5 })
        );
        assert_eq!(parse_divergence("x\t1"), None);
        assert_eq!(parse_divergence("1"), None);
        assert_eq!(parse_divergence("1 2 3"), None);
    }

    #[test]
    fn last_commit_normalized_to_utc() {
        let (at, summary) =
            parse_last_commit("2024-05-01T12:00:00+02:00\u{1f}Fix: handle | pipes").unwrap();
        assert_eq!(at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert_eq!(summary, "Fix: handle | pipes");
        assert!(parse_last_commit("").is_none());
        assert!(parse_last_commit("not a date\u{1f}msg").is_none());
    }

    #[test]
    fn worktree_porcelain_skips_main() {
        let out = "worktree /src/api\nHEAD abc\nbranch refs/heads/main\n\n\
                   worktree /src/api-feature\nHEAD def\nbranch refs/heads/feature\n\n\
                   worktree /src/api-fix\nHEAD 123\ndetached\n";
        assert_eq!(
            parse_worktrees(out),
            vec![PathBuf::from("/src/api-feature"), PathBuf::from("/src/api-fix")]
        );
        assert!(parse_worktrees("worktree /src/api\nHEAD abc\n").is_empty());
    }

    #[test]
    fn default_branch_detection() {
        assert_eq!(
            parse_origin_head("refs/remotes/origin/develop"),
            Some("develop".to_string())
        );
        assert_eq!(parse_origin_head("refs/heads/x"), None);
        let local = vec!["feature".to_string(), "master".to_string()];
        assert_eq!(fallback_default_branch(&local), "master");
        assert_eq!(fallback_default_branch(&[]), "main");
    }
}
