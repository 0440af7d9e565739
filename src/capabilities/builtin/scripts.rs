//! Capabilities that drive external tools (`uv`, `git`) inside the sandbox root.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::process::run_command;
use crate::capabilities::{arg, Capability, CapabilityContext, Param};

/// Directory, relative to the root, that `clone_and_commit` clones into.
const REPO_DIR: &str = "repo";

/// Rejects values that a subprocess would parse as an option.
fn plain_argument<'a>(name: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        bail!("{name} must not be empty");
    }
    if value.starts_with('-') {
        bail!("{name} must not start with '-'");
    }
    Ok(value)
}

// ── install_and_run ──────────────────────────────────────

pub struct InstallAndRun;

const INSTALL_AND_RUN_PARAMS: &[Param] = &[Param::text("email")];

#[async_trait]
impl Capability for InstallAndRun {
    fn name(&self) -> &str {
        "install_and_run"
    }

    fn description(&self) -> &str {
        "Run the data generation script with uv, passing the user's email"
    }

    fn params(&self) -> &[Param] {
        INSTALL_AND_RUN_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let email = plain_argument("email", arg(args, 0).unwrap_or_default())?;
        let script = ctx.settings.datagen_url.as_str();

        let output = run_command(
            "uv",
            &["run", script, email],
            ctx.guard.root(),
            ctx.handler_timeout,
        )
        .await?;
        Ok(json!({
            "status": "success",
            "output": output.stdout,
            "stderr": output.stderr,
        }))
    }
}

// ── clone_and_commit ─────────────────────────────────────

pub struct CloneAndCommit;

const CLONE_AND_COMMIT_PARAMS: &[Param] = &[Param::text("repo_url"), Param::text("commit_msg")];

/// Accepts remote URLs only: http(s), ssh, git, or scp-style `user@host:path`.
///
/// Local paths and `file://` are refused so a clone cannot read outside the root.
fn remote_repo_url(raw: &str) -> Result<&str> {
    let value = plain_argument("repo_url", raw)?;
    if let Ok(parsed) = url::Url::parse(value) {
        return match parsed.scheme() {
            "http" | "https" | "ssh" | "git" => Ok(value),
            scheme => bail!("unsupported repository scheme '{scheme}'"),
        };
    }
    match value.split_once(':') {
        Some((host, path))
            if host.contains('@') && !host.contains('/') && !path.is_empty() =>
        {
            Ok(value)
        }
        _ => bail!("'{value}' is not a remote repository URL"),
    }
}

#[async_trait]
impl Capability for CloneAndCommit {
    fn name(&self) -> &str {
        "clone_and_commit"
    }

    fn description(&self) -> &str {
        "Clone a git repository into the data directory, commit all changes and push"
    }

    fn params(&self) -> &[Param] {
        CLONE_AND_COMMIT_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let repo_url = remote_repo_url(arg(args, 0).unwrap_or_default())?;
        let message = arg(args, 1).unwrap_or_default();
        if message.trim().is_empty() {
            bail!("commit_msg must not be empty");
        }

        let root = ctx.guard.root();
        let checkout = ctx.guard.guard(REPO_DIR)?;
        let timeout = ctx.handler_timeout;

        run_command("git", &["clone", "--", repo_url, REPO_DIR], root, timeout).await?;
        run_command("git", &["commit", "-am", message], &checkout, timeout).await?;
        run_command("git", &["push"], &checkout, timeout).await?;

        info!("Committed and pushed {repo_url}");
        Ok(json!({"status": "success", "path": checkout}))
    }
}
