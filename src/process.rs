use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{tool} not available on PATH")]
    NotFound { tool: String },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
        /// Output written before the non-zero exit.
        stdout: String,
    },
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// True when the tool itself could not be launched, as opposed to the
    /// tool running and reporting a failure.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ExecError::NotFound { .. })
    }
}

/// Run `cmd` to completion with a timeout and return its stdout with trailing
/// whitespace removed. The child is killed if the timeout elapses.
pub async fn run_captured(
    mut cmd: Command,
    label: &str,
    timeout: Duration,
) -> Result<String, ExecError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => {
            return Err(ExecError::Timeout {
                command: label.to_string(),
                timeout,
            })
        }
        Ok(Err(err)) if err.kind() == ErrorKind::NotFound => {
            let tool = label.split_whitespace().next().unwrap_or(label);
            return Err(ExecError::NotFound {
                tool: tool.to_string(),
            });
        }
        Ok(res) => res?,
    };

    if !output.status.success() {
        return Err(ExecError::Failed {
            command: label.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.trim_end().to_string())
}
