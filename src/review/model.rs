use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Deserialize, Debug)]
pub struct GraphqlResponse {
    pub data: Option<HashMap<String, Option<RepositoryNode>>>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Deserialize, Debug)]
pub struct GraphqlError {
    pub message: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryNode {
    pub name_with_owner: Option<String>,
    pub pull_requests: Connection<PullRequestNode>,
}

#[derive(Deserialize, Debug)]
pub struct Connection<T> {
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestNode {
    pub number: u64,
    pub title: String,
    pub head_ref_name: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_draft: bool,
    pub review_decision: Option<String>,
    #[serde(default)]
    pub commits: Connection<CommitNode>,
}

#[derive(Deserialize, Debug)]
pub struct CommitNode {
    pub commit: Commit,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub status_check_rollup: Option<StatusCheckRollup>,
}

#[derive(Deserialize, Debug)]
pub struct StatusCheckRollup {
    pub state: String,
}
