use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tokio::time::timeout;
use tracing::debug;

use crate::config::Config;

/// Captured output of a successful pull
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Version-control operations needed to keep a repository current
///
/// Every call may fail; callers treat a failure as a per-repository error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Update remote-tracking state
    async fn fetch(&self, path: &Path) -> Result<()>;

    /// Name of the checked-out branch, `None` when detached or unknown
    async fn current_branch(&self, path: &Path) -> Result<Option<String>>;

    /// Commits on `origin/<branch>` that are not reachable from `HEAD`
    async fn ahead_count(&self, path: &Path, branch: &str) -> Result<u32>;

    /// Integrate remote changes into the working tree
    async fn pull(&self, path: &Path) -> Result<PullOutput>;
}

/// [`Vcs`] implementation backed by the `git` executable
#[derive(Debug, Clone)]
pub struct GitClient {
    timeout: Option<Duration>,
    fast_forward_only: bool,
}

impl GitClient {
    /// Create a new Git client with the given configuration
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.git_timeout(),
            fast_forward_only: config.git.fast_forward_only,
        }
    }

    /// Run `git -C <path> <args>` and return its raw output
    async fn run(&self, path: &Path, args: &[&str]) -> Result<Output> {
        debug!("git -C {} {}", path.display(), args.join(" "));

        let mut command = AsyncCommand::new("git");
        command.arg("-C").arg(path).args(args).kill_on_drop(true);

        let output = command.output();
        let output = match self.timeout {
            Some(limit) => timeout(limit, output)
                .await
                .map_err(|_| anyhow!("git {} timed out after {}s", args[0], limit.as_secs()))?,
            None => output.await,
        };

        output.with_context(|| format!("Failed to execute git {}", args[0]))
    }

    /// Run a git command that must exit successfully
    async fn run_checked(&self, path: &Path, args: &[&str]) -> Result<Output> {
        let output = self.run(path, args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Git {} failed: {}", args[0], stderr.trim()));
        }

        Ok(output)
    }
}

#[async_trait]
impl Vcs for GitClient {
    async fn fetch(&self, path: &Path) -> Result<()> {
        self.run_checked(path, &["fetch"]).await?;
        Ok(())
    }

    async fn current_branch(&self, path: &Path) -> Result<Option<String>> {
        let output = self
            .run_checked(path, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .context("Failed to get current branch")?;

        Ok(parse_branch(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn ahead_count(&self, path: &Path, branch: &str) -> Result<u32> {
        let range = format!("HEAD..origin/{}", branch);
        let output = self
            .run_checked(path, &["rev-list", "--count", &range])
            .await
            .context("Failed to count new commits")?;

        parse_count(&String::from_utf8_lossy(&output.stdout))
    }

    async fn pull(&self, path: &Path) -> Result<PullOutput> {
        let mut args = vec!["pull"];

        if self.fast_forward_only {
            args.push("--ff-only");
        }

        let output = self.run_checked(path, &args).await?;

        Ok(PullOutput {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Branch name from `rev-parse --abbrev-ref HEAD`; a detached head reports `HEAD`
fn parse_branch(stdout: &str) -> Option<String> {
    match stdout.trim() {
        "" | "HEAD" => None,
        branch => Some(branch.to_string()),
    }
}

fn parse_count(stdout: &str) -> Result<u32> {
    let trimmed = stdout.trim();
    trimmed
        .parse()
        .with_context(|| format!("Unexpected rev-list output: {:?}", trimmed))
}

/// Installed git version string, used by diagnostics
pub async fn git_version() -> Result<String> {
    let output = AsyncCommand::new("git")
        .arg("--version")
        .output()
        .await
        .context("Failed to execute git --version")?;

    if !output.status.success() {
        return Err(anyhow!("git --version exited with {}", output.status));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
