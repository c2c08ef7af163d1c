//! Configuration loader and validator for the repository dashboard.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ROOT_ENV: &str = "REPO_DASHBOARD_ROOT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub scan: Scan,
    #[serde(default)]
    pub review: Review,
    #[serde(default)]
    pub activity: Activity,
}

/// Where repositories live and how they are categorized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub root_dir: String,
    /// Top-level directory name -> category tag. Unmapped names become `other`.
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

/// Scan cycle timing and probe bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Scan {
    pub interval_secs: u64,
    pub workers: usize,
    pub probe_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub git_binary: String,
}

/// Remote review-request batching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Review {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub gh_binary: String,
    pub timeout_secs: u64,
    pub per_repository_limit: u32,
}

/// Defaults for the "active" predicate; callers may override per request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Activity {
    pub window_hours: u64,
    pub include_dirty: bool,
}

fn default_max_depth() -> usize {
    3
}

impl Default for Scan {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            workers: 8,
            probe_timeout_ms: 15_000,
            command_timeout_ms: 5_000,
            git_binary: "git".into(),
        }
    }
}

impl Default for Review {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            gh_binary: "gh".into(),
            timeout_secs: 30,
            per_repository_limit: 10,
        }
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            window_hours: 24,
            include_dirty: true,
        }
    }
}

impl Config {
    /// Root directory with a leading `~/` expanded. `REPO_DASHBOARD_ROOT`
    /// takes precedence over the configured value.
    pub fn resolved_root(&self) -> PathBuf {
        let raw = std::env::var(ROOT_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.app.root_dir.clone());
        expand_home(&raw)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.scan.probe_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.scan.command_timeout_ms)
    }

    pub fn review_ttl(&self) -> Duration {
        Duration::from_secs(self.review.ttl_secs)
    }

    pub fn review_timeout(&self) -> Duration {
        Duration::from_secs(self.review.timeout_secs)
    }

    pub fn activity_window(&self) -> Duration {
        Duration::from_secs(self.activity.window_hours.saturating_mul(3600))
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.root_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.root_dir must be non-empty"));
    }
    if cfg.app.max_depth == 0 {
        return Err(ConfigError::Invalid("app.max_depth must be > 0"));
    }

    if cfg.scan.interval_secs == 0 {
        return Err(ConfigError::Invalid("scan.interval_secs must be > 0"));
    }
    if cfg.scan.workers == 0 {
        return Err(ConfigError::Invalid("scan.workers must be > 0"));
    }
    if cfg.scan.probe_timeout_ms == 0 || cfg.scan.command_timeout_ms == 0 {
        return Err(ConfigError::Invalid("scan timeouts must be > 0"));
    }
    // A single stuck repository must not hold a cycle past the next tick.
    if cfg.scan.probe_timeout_ms >= cfg.scan.interval_secs.saturating_mul(1000) {
        return Err(ConfigError::Invalid(
            "scan.probe_timeout_ms must be below scan.interval_secs",
        ));
    }
    if cfg.scan.git_binary.trim().is_empty() {
        return Err(ConfigError::Invalid("scan.git_binary must be non-empty"));
    }

    if cfg.review.ttl_secs == 0 {
        return Err(ConfigError::Invalid("review.ttl_secs must be > 0"));
    }
    if cfg.review.timeout_secs == 0 {
        return Err(ConfigError::Invalid("review.timeout_secs must be > 0"));
    }
    if cfg.review.per_repository_limit == 0 {
        return Err(ConfigError::Invalid(
            "review.per_repository_limit must be > 0",
        ));
    }
    if cfg.review.enabled && cfg.review.gh_binary.trim().is_empty() {
        return Err(ConfigError::Invalid("review.gh_binary must be non-empty"));
    }

    Ok(())
}

/// Returns the example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  root_dir: "~/repos"
  max_depth: 3
  categories:
    tools: tools
    utilities: utilities
    docs: docs
    projects: projects
    templates: templates

scan:
  interval_secs: 30
  workers: 8
  probe_timeout_ms: 15000
  command_timeout_ms: 5000
  git_binary: "git"

review:
  enabled: true
  ttl_secs: 300
  gh_binary: "gh"
  timeout_secs: 30
  per_repository_limit: 10

activity:
  window_hours: 24
  include_dirty: true
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.categories.get("docs").map(String::as_str), Some("docs"));
        assert_eq!(cfg.review_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("app:\n  root_dir: /srv/repos\n").unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.max_depth, 3);
        assert_eq!(cfg.scan, Scan::default());
        assert_eq!(cfg.review, Review::default());
        assert!(cfg.activity.include_dirty);
    }

    #[test]
    fn partial_sections_fill_missing_keys() {
        let yaml = "app:\n  root_dir: /srv/repos\nscan:\n  workers: 4\nreview:\n  enabled: false\nactivity:\n  window_hours: 6\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.scan.workers, 4);
        assert_eq!(cfg.scan.interval_secs, 30);
        assert_eq!(cfg.scan.git_binary, "git");
        assert!(!cfg.review.enabled);
        assert_eq!(cfg.review.ttl_secs, 300);
        assert_eq!(cfg.activity.window_hours, 6);
        assert!(cfg.activity.include_dirty);
    }

    #[test]
    fn huge_interval_does_not_overflow() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.scan.interval_secs = u64::MAX;
        validate(&cfg).unwrap();
    }

    #[test]
    fn invalid_workers_and_interval() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.scan.workers = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("scan.workers")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.scan.interval_secs = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("interval_secs")), _ => panic!("wrong error") }
    }

    #[test]
    fn probe_timeout_must_fit_interval() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.scan.probe_timeout_ms = 30_000;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("probe_timeout_ms")), _ => panic!("wrong error") }
    }

    #[test]
    fn invalid_review_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.review.ttl_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.review.gh_binary = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        // Binary name is irrelevant when review fetching is off.
        cfg.review.enabled = false;
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn expand_home_prefix() {
        let home = std::env::var("HOME").unwrap_or_default();
        if !home.is_empty() {
            assert_eq!(expand_home("~/repos"), Path::new(&home).join("repos"));
        }
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.scan.workers, 8);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let td = tempdir().unwrap();
        let err = load(Some(&td.path().join("nope.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
