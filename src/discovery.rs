//! Repository discovery: which checkouts exist and how they relate.
//!
//! The orchestrator only consumes the [`Discovery`] trait. [`FsDiscovery`] is
//! the stock implementation that walks a root directory.
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::git::GitExec;
use crate::model::{Linkage, Remote};

const DEFAULT_CATEGORY: &str = "other";

/// One discovered checkout, as handed to the orchestrator each cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryEntry {
    pub name: String,
    pub path: PathBuf,
    pub category: String,
    pub remote: Remote,
    pub linkage: Linkage,
}

#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<RepositoryEntry>>;
}

/// Walks `root` for git checkouts, up to `max_depth` levels deep.
pub struct FsDiscovery {
    root: PathBuf,
    categories: BTreeMap<String, String>,
    max_depth: usize,
    git: Arc<dyn GitExec>,
}

impl FsDiscovery {
    pub fn new(
        root: PathBuf,
        categories: BTreeMap<String, String>,
        max_depth: usize,
        git: Arc<dyn GitExec>,
    ) -> Self {
        Self {
            root,
            categories,
            max_depth,
            git,
        }
    }

    pub fn from_config(cfg: &Config, root: PathBuf, git: Arc<dyn GitExec>) -> Self {
        Self::new(root, cfg.app.categories.clone(), cfg.app.max_depth, git)
    }

    async fn remote_for(&self, path: &Path) -> Remote {
        match self.git.run(path, &["remote", "get-url", "origin"]).await {
            Ok(raw) if !raw.trim().is_empty() => Remote::Url(normalize_remote_url(raw.trim())),
            _ => Remote::NoRemote,
        }
    }
}

#[async_trait]
impl Discovery for FsDiscovery {
    #[instrument(skip_all, fields(root = %self.root.display()))]
    async fn discover(&self) -> Result<Vec<RepositoryEntry>> {
        let root = self.root.clone();
        let max_depth = self.max_depth;
        let (root, found) = tokio::task::spawn_blocking(move || walk_root(&root, max_depth))
            .await
            .context("discovery walk panicked")??;

        let names = assign_names(&found);
        let by_path: HashMap<&Path, &str> = found
            .iter()
            .zip(names.iter())
            .map(|(f, n)| (f.canonical.as_path(), n.as_str()))
            .collect();

        let mut entries = Vec::with_capacity(found.len());
        for (checkout, name) in found.iter().zip(names.iter()) {
            let linkage = match &checkout.primary_path {
                None => Linkage::Primary,
                Some(primary) => Linkage::Secondary {
                    primary: primary_name(primary, &root, &by_path),
                },
            };
            entries.push(RepositoryEntry {
                name: name.clone(),
                path: checkout.path.clone(),
                category: categorize(&checkout.relative, &self.categories),
                remote: self.remote_for(&checkout.path).await,
                linkage,
            });
        }
        debug!(count = entries.len(), "discovered repositories");
        Ok(entries)
    }
}

/// Record name for a secondary's primary. A primary scanned this cycle is
/// named as its record is. One under the root but not scanned is named by its
/// relative path; one outside the root keeps its absolute path, so it can never
/// match an unrelated record.
fn primary_name(primary: &Path, root: &Path, scanned: &HashMap<&Path, &str>) -> String {
    if let Some(name) = scanned.get(primary) {
        return name.to_string();
    }
    match primary.strip_prefix(root) {
        Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
        Err(_) => primary.display().to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FoundCheckout {
    path: PathBuf,
    /// Symlinks resolved; used to match a secondary's `gitdir` target.
    canonical: PathBuf,
    relative: PathBuf,
    primary_path: Option<PathBuf>,
}

/// Walks from the canonical root and returns it alongside the checkouts.
fn walk_root(root: &Path, max_depth: usize) -> Result<(PathBuf, Vec<FoundCheckout>)> {
    if !root.is_dir() {
        anyhow::bail!("repository root {} does not exist", root.display());
    }
    let root = root
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", root.display()))?;
    let mut out = Vec::new();
    walk(&root, &root, 1, max_depth, &mut out)
        .with_context(|| format!("failed to walk {}", root.display()))?;
    Ok((root, out))
}

fn walk(
    root: &Path,
    dir: &Path,
    depth: usize,
    max_depth: usize,
    out: &mut Vec<FoundCheckout>,
) -> std::io::Result<()> {
    let mut children: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    children.sort();

    for child in children {
        let Some(name) = child.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || name == "node_modules" {
            continue;
        }
        let git_path = child.join(".git");
        if git_path.exists() {
            // Nested repositories under a checkout are not descended into.
            let primary_path = if git_path.is_file() {
                read_gitdir_primary(&git_path, &child)
            } else {
                None
            };
            out.push(FoundCheckout {
                relative: child.strip_prefix(root).unwrap_or(&child).to_path_buf(),
                canonical: child.canonicalize().unwrap_or_else(|_| child.clone()),
                path: child,
                primary_path,
            });
        } else if depth < max_depth {
            walk(root, &child, depth + 1, max_depth, out)?;
        }
    }
    Ok(())
}

/// A linked secondary checkout has a `.git` file of the form
/// `gitdir: <primary>/.git/worktrees/<id>`.
fn read_gitdir_primary(git_file: &Path, checkout: &Path) -> Option<PathBuf> {
    let content = fs::read_to_string(git_file).ok()?;
    let gitdir = content.trim().strip_prefix("gitdir:")?.trim();
    let gitdir = if Path::new(gitdir).is_absolute() {
        PathBuf::from(gitdir)
    } else {
        checkout.join(gitdir)
    };
    let text = gitdir.to_string_lossy().replace('\\', "/");
    let (primary, _) = text.split_once("/.git/worktrees/")?;
    let primary = PathBuf::from(primary);
    Some(primary.canonicalize().unwrap_or(primary))
}

/// Directory names are used as record names; collisions fall back to the
/// path relative to the root so every name stays unique.
fn assign_names(found: &[FoundCheckout]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for f in found {
        if let Some(n) = dir_name(&f.path) {
            *counts.entry(n).or_default() += 1;
        }
    }
    found
        .iter()
        .map(|f| match dir_name(&f.path) {
            Some(n) if counts.get(&n).copied() == Some(1) => n,
            _ => f.relative.to_string_lossy().replace('\\', "/"),
        })
        .collect()
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

fn categorize(relative: &Path, categories: &BTreeMap<String, String>) -> String {
    relative
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .and_then(|first| categories.get(first))
        .cloned()
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
}

/// Normalize an `origin` URL to its web form: SSH GitHub remotes become HTTPS
/// and a trailing `.git` is dropped.
pub fn normalize_remote_url(raw: &str) -> String {
    let url = match raw.strip_prefix("git@github.com:") {
        Some(rest) => format!("https://github.com/{}", rest),
        None => raw.to_string(),
    };
    match url.strip_suffix(".git") {
        Some(stripped) => stripped.to_string(),
        None => url,
    }
}
