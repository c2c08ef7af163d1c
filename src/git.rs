//! Local version-control query execution.
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use crate::config::Config;
use crate::process::{run_captured, ExecError};

/// "Run this read-only query against this checkout." Implementations must not
/// mutate the repository.
#[async_trait]
pub trait GitExec: Send + Sync {
    async fn run(&self, path: &Path, args: &[&str]) -> Result<String, ExecError>;
}

/// Shells out to the `git` binary.
#[derive(Clone)]
pub struct GitCli {
    binary: String,
    timeout: Duration,
}

impl fmt::Debug for GitCli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitCli")
            .field("binary", &self.binary)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GitCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.scan.git_binary.clone(), cfg.command_timeout())
    }
}

#[async_trait]
impl GitExec for GitCli {
    async fn run(&self, path: &Path, args: &[&str]) -> Result<String, ExecError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-C")
            .arg(path)
            .args(args)
            // Never take index.lock on behalf of a read-only status query.
            .env("GIT_OPTIONAL_LOCKS", "0")
            .env("LC_ALL", "C");
        let label = format!("{} {}", self.binary, args.join(" "));
        run_captured(cmd, &label, self.timeout).await
    }
}
