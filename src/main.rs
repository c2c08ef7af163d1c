use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use repo_dashboard::classify::ActiveFilter;
use repo_dashboard::config;
use repo_dashboard::discovery::FsDiscovery;
use repo_dashboard::git::{GitCli, GitExec};
use repo_dashboard::probe::Prober;
use repo_dashboard::review::{BatchClient, GhCli};
use repo_dashboard::scan::{self, ScanContext};

#[derive(Debug, Parser)]
#[command(author, version, about = "Multi-repository git health dashboard")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the repository root directory
    #[arg(long)]
    root: Option<PathBuf>,

    /// Run a single scan, print the snapshot as JSON and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let root = args.root.clone().unwrap_or_else(|| cfg.resolved_root());

    let git: Arc<dyn GitExec> = Arc::new(GitCli::from_config(&cfg));
    let discovery = Arc::new(FsDiscovery::from_config(&cfg, root.clone(), git.clone()));
    let prober = Arc::new(Prober::new(git, cfg.probe_timeout()));
    let reviews = cfg
        .review
        .enabled
        .then(|| Arc::new(BatchClient::new(Arc::new(GhCli::from_config(&cfg)), cfg.review_ttl())));

    let ctx = ScanContext {
        discovery,
        prober,
        reviews,
        workers: cfg.scan.workers,
        interval: cfg.scan_interval(),
        active: ActiveFilter {
            window: cfg.activity_window(),
            include_dirty: cfg.activity.include_dirty,
        },
    };

    info!(root = %root.display(), workers = cfg.scan.workers, "starting repository dashboard");
    let (dashboard, handle) = scan::start(ctx);

    if args.once {
        let snapshot = dashboard.wait_for_cycle(0).await?;
        println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
        dashboard.shutdown().await;
        handle.await.context("scan orchestrator panicked")?;
        return Ok(());
    }

    let reporter = dashboard.clone();
    let report = tokio::spawn(async move {
        let mut seen = 0;
        while let Ok(snapshot) = reporter.wait_for_cycle(seen).await {
            seen = snapshot.cycle;
            let overview = reporter.get_overview();
            info!(
                cycle = seen,
                total = overview.total_repositories,
                dirty = overview.dirty_repositories,
                behind = overview.behind_repositories,
                open_reviews = overview.open_review_requests,
                stale_branches = overview.stale_branches,
                "snapshot published"
            );
            if let Some(err) = &snapshot.review_error {
                warn!(%err, "review requests unavailable");
            }
        }
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for shutdown signal");
    }
    info!("shutting down");
    dashboard.shutdown().await;
    handle.await.context("scan orchestrator panicked")?;
    report.abort();
    Ok(())
}
