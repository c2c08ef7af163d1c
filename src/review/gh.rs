use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::model::{GraphqlResponse, PullRequestNode};
use super::{RepoSlug, ReviewMap, ReviewQuery};
use crate::config::Config;
use crate::model::{CiStatus, ReviewDecision, ReviewRequest, ReviewState};
use crate::process::{run_captured, ExecError};

/// Batched review-request lookup through `gh api graphql`. Authentication is
/// whatever `gh auth` already holds.
#[derive(Clone)]
pub struct GhCli {
    binary: String,
    timeout: Duration,
    per_repository_limit: u32,
}

impl fmt::Debug for GhCli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GhCli")
            .field("binary", &self.binary)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl GhCli {
    pub fn new(binary: impl Into<String>, timeout: Duration, per_repository_limit: u32) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            per_repository_limit,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.review.gh_binary.clone(),
            cfg.review_timeout(),
            cfg.review.per_repository_limit,
        )
    }
}

#[async_trait]
impl ReviewQuery for GhCli {
    #[instrument(skip_all, fields(repos = repos.len()))]
    async fn query(&self, repos: &[RepoSlug]) -> Result<ReviewMap> {
        let query = build_query(repos, self.per_repository_limit);
        let mut cmd = Command::new(&self.binary);
        cmd.arg("api")
            .arg("graphql")
            .arg("-f")
            .arg(format!("query={}", query));
        let label = format!("{} api graphql", self.binary);
        let stdout = match run_captured(cmd, &label, self.timeout).await {
            Ok(out) => out,
            Err(err) => {
                // GraphQL errors exit non-zero but still print any data that resolved.
                if let ExecError::Failed { stdout, .. } = &err {
                    if let Ok(map) = parse_response(stdout, repos) {
                        warn!(%err, "GitHub batch query reported errors; using partial data");
                        return Ok(map);
                    }
                }
                return Err(err).context("GitHub batch query failed");
            }
        };
        debug!(bytes = stdout.len(), "GitHub batch query returned");
        parse_response(&stdout, repos)
    }
}

fn alias(index: usize) -> String {
    format!("repo_{}", index)
}

/// One GraphQL document covering every repository, aliased by position.
pub fn build_query(repos: &[RepoSlug], limit: u32) -> String {
    let fragments: Vec<String> = repos
        .iter()
        .enumerate()
        .map(|(i, slug)| {
            format!(
                r#"  {alias}: repository(owner: "{owner}", name: "{name}") {{
    nameWithOwner
    pullRequests(states: OPEN, first: {limit}, orderBy: {{field: UPDATED_AT, direction: DESC}}) {{
      nodes {{
        number
        title
        headRefName
        updatedAt
        isDraft
        reviewDecision
        commits(last: 1) {{
          nodes {{
            commit {{
              statusCheckRollup {{
                state
              }}
            }}
          }}
        }}
      }}
    }}
  }}"#,
                alias = alias(i),
                owner = slug.owner,
                name = slug.name,
                limit = limit,
            )
        })
        .collect();
    format!("{{\n{}\n}}", fragments.join("\n"))
}

/// Map the aliased response back onto `repos`. A response without `data` is
/// an error as a whole; a null alias means that repository is simply absent.
pub fn parse_response(body: &str, repos: &[RepoSlug]) -> Result<ReviewMap> {
    let resp: GraphqlResponse =
        serde_json::from_str(body).context("invalid GitHub GraphQL response JSON")?;
    let Some(mut data) = resp.data else {
        let messages: Vec<&str> = resp.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(anyhow!("GitHub GraphQL returned no data: {}", messages.join("; ")));
    };

    let mut map = ReviewMap::new();
    for (i, slug) in repos.iter().enumerate() {
        let Some(Some(node)) = data.remove(&alias(i)) else {
            continue;
        };
        let requests = node
            .pull_requests
            .nodes
            .into_iter()
            .map(|pr| to_review_request(pr, slug))
            .collect();
        map.insert(slug.clone(), requests);
    }
    Ok(map)
}

fn to_review_request(pr: PullRequestNode, slug: &RepoSlug) -> ReviewRequest {
    let ci = pr
        .commits
        .nodes
        .first()
        .and_then(|c| c.commit.status_check_rollup.as_ref())
        .map(|r| ci_status(&r.state))
        .unwrap_or(CiStatus::Unknown);
    ReviewRequest {
        url: format!("{}/pull/{}", slug.web_url(), pr.number),
        number: pr.number,
        title: pr.title,
        source_branch: pr.head_ref_name,
        state: if pr.is_draft {
            ReviewState::Draft
        } else {
            ReviewState::Open
        },
        updated_at: pr.updated_at,
        ci,
        review: review_decision(pr.review_decision.as_deref()),
    }
}

fn ci_status(state: &str) -> CiStatus {
    match state {
        "SUCCESS" => CiStatus::Success,
        "FAILURE" | "ERROR" => CiStatus::Failure,
        "PENDING" | "EXPECTED" => CiStatus::Pending,
        _ => CiStatus::Unknown,
    }
}

fn review_decision(decision: Option<&str>) -> ReviewDecision {
    match decision {
        Some("APPROVED") => ReviewDecision::Approved,
        Some("CHANGES_REQUESTED") => ReviewDecision::ChangesRequested,
        Some("REVIEW_REQUIRED") => ReviewDecision::Required,
        _ => ReviewDecision::None,
    }
}
