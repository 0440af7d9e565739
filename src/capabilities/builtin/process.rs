//! Subprocess execution for capabilities that shell out (git, uv, formatter).
//!
//! Commands are spawned directly (no shell), run in an explicit working
//! directory, and are killed when the timeout expires.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// A subprocess outlived its time budget and was killed.
#[derive(Debug, Clone, Error)]
#[error("command '{command}' timed out after {secs}s")]
pub struct CommandTimeout {
    pub command: String,
    pub secs: u64,
}

#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs `program args...` in `cwd` and fails on a non-zero exit status.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<CommandOutput> {
    let command_line = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    debug!("Running `{}` in {}", command_line, cwd.display());

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        // A missing binary is a setup problem, not a missing sandbox file
        .map_err(|e| anyhow!("failed to start '{program}': {e}"))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.with_context(|| format!("failed waiting for '{program}'"))?,
        Err(_) => {
            warn!("`{}` timed out after {}s", command_line, timeout.as_secs());
            return Err(CommandTimeout {
                command: command_line,
                secs: timeout.as_secs(),
            }
            .into());
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(anyhow!(
            "`{command_line}` exited with {}: {}",
            output.status,
            stderr.trim()
        ));
    }

    Ok(CommandOutput { stdout, stderr })
}
