//! Sync Engine - Orchestrates parallel repository synchronization
//!
//! A cycle claims the single-flight flag, discovers repositories under the
//! workspace roots, runs fetch/compare/pull for every repository as an
//! independent task and publishes one terminal status. Failures stay confined
//! to the repository they happened in.

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::{CancelToken, SyncContext};
use crate::discovery::{RepoDescriptor, Scanner, WorkspaceProvider};
use crate::git::{GitClient, Vcs};
use crate::status::{StatusLine, StatusSink};

/// Reason recorded when a repository stops at a cancellation checkpoint
pub const CANCELLED_REASON: &str = "cancelled";

/// Result of synchronizing a single repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// New commits were pulled
    Updated { new_commits: u32 },
    /// Nothing new on the remote branch
    UpToDate,
    /// Work stopped before completion
    Skipped { reason: String },
    /// A git operation failed
    Failed { error: String },
}

impl SyncOutcome {
    fn cancelled() -> Self {
        SyncOutcome::Skipped {
            reason: CANCELLED_REASON.to_string(),
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        SyncOutcome::Failed {
            error: error.into(),
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, SyncOutcome::Updated { .. })
    }
}

/// A repository paired with the outcome of its sync
#[derive(Debug, Clone, Serialize)]
pub struct RepoSyncResult {
    pub repo: RepoDescriptor,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// Terminal status of a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleStatus {
    Cancelled,
    Updated { updated: usize, total: usize },
    UpToDate { total: usize },
    NoRepositories,
    NoWorkspace,
    Error { message: String },
}

impl CycleStatus {
    /// Pick the summary status; cancellation wins over any counts
    fn from_results(results: &[RepoSyncResult], cancelled: bool) -> Self {
        let total = results.len();
        let updated = results.iter().filter(|r| r.outcome.is_updated()).count();

        if cancelled {
            CycleStatus::Cancelled
        } else if updated > 0 {
            CycleStatus::Updated { updated, total }
        } else if total > 0 {
            CycleStatus::UpToDate { total }
        } else {
            CycleStatus::NoRepositories
        }
    }

    pub fn label(&self) -> String {
        match self {
            CycleStatus::Cancelled => "Git Pull Cancelled".to_string(),
            CycleStatus::Updated { updated, total } => {
                format!("Updated {} of {} repositories", updated, total)
            }
            CycleStatus::UpToDate { total } => format!("All {} repositories up to date", total),
            CycleStatus::NoRepositories | CycleStatus::NoWorkspace => {
                "No Git repositories found".to_string()
            }
            CycleStatus::Error { .. } => "Git Pull Error".to_string(),
        }
    }

    pub fn tooltip(&self) -> String {
        match self {
            CycleStatus::Updated { .. } => "Git pull completed".to_string(),
            CycleStatus::UpToDate { .. } => "No updates needed".to_string(),
            CycleStatus::NoWorkspace => "No workspace folders configured".to_string(),
            CycleStatus::Error { message } => message.clone(),
            CycleStatus::Cancelled | CycleStatus::NoRepositories => String::new(),
        }
    }

    pub fn to_status_line(&self) -> StatusLine {
        StatusLine::new(self.label(), self.tooltip())
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Results from a complete sync cycle
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub total_repositories: usize,
    pub updated: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration: Duration,
    pub status: CycleStatus,
    pub results: Vec<RepoSyncResult>,
}

impl SyncSummary {
    fn new(results: Vec<RepoSyncResult>, status: CycleStatus, duration: Duration) -> Self {
        let mut updated = 0;
        let mut up_to_date = 0;
        let mut skipped = 0;
        let mut failed = 0;

        for result in &results {
            match result.outcome {
                SyncOutcome::Updated { .. } => updated += 1,
                SyncOutcome::UpToDate => up_to_date += 1,
                SyncOutcome::Skipped { .. } => skipped += 1,
                SyncOutcome::Failed { .. } => failed += 1,
            }
        }

        Self {
            total_repositories: results.len(),
            updated,
            up_to_date,
            skipped,
            failed,
            duration,
            status,
            results,
        }
    }
}

/// How a call to [`SyncEngine::run_cycle`] ended
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Another cycle held the single-flight flag; nothing was done
    AlreadyRunning,
    /// The cycle ran to a terminal status (including cancellation)
    Completed(SyncSummary),
    /// The cycle aborted on an orchestration-level error
    Failed(String),
}

/// Fetch, compare and conditionally pull a single repository
#[derive(Clone)]
pub struct SyncExecutor {
    vcs: Arc<dyn Vcs>,
}

impl SyncExecutor {
    pub fn new(vcs: Arc<dyn Vcs>) -> Self {
        Self { vcs }
    }

    /// Synchronize `repo`, never failing: errors become [`SyncOutcome::Failed`]
    pub async fn sync(&self, repo: &RepoDescriptor, cancel: &CancelToken) -> SyncOutcome {
        match self.try_sync(repo, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Error processing {}: {:#}", repo.name, e);
                SyncOutcome::failed(format!("{:#}", e))
            }
        }
    }

    async fn try_sync(&self, repo: &RepoDescriptor, cancel: &CancelToken) -> Result<SyncOutcome> {
        let path = repo.path.as_path();

        if cancel.is_cancelled() {
            return Ok(SyncOutcome::cancelled());
        }

        self.vcs
            .fetch(path)
            .await
            .with_context(|| format!("Failed to fetch {}", repo.name))?;

        if cancel.is_cancelled() {
            return Ok(SyncOutcome::cancelled());
        }

        let Some(branch) = self.vcs.current_branch(path).await? else {
            info!("No current branch found for {}.", repo.name);
            return Ok(SyncOutcome::failed("no current branch"));
        };

        if cancel.is_cancelled() {
            return Ok(SyncOutcome::cancelled());
        }

        let new_commits = self.vcs.ahead_count(path, &branch).await?;

        if cancel.is_cancelled() {
            return Ok(SyncOutcome::cancelled());
        }

        if new_commits == 0 {
            info!("No new commits in {} ({}).", repo.name, branch);
            return Ok(SyncOutcome::UpToDate);
        }

        info!(
            "New commits found in {} ({}): {}",
            repo.name, branch, new_commits
        );

        let output = self
            .vcs
            .pull(path)
            .await
            .with_context(|| format!("Failed to pull {}", repo.name))?;

        info!(
            "Pulled latest changes in {} ({}): {}",
            repo.name, branch, output.stdout
        );
        if !output.stderr.is_empty() {
            info!("Pull stderr in {} ({}): {}", repo.name, branch, output.stderr);
        }

        Ok(SyncOutcome::Updated { new_commits })
    }
}

/// The main sync engine that orchestrates repository synchronization
pub struct SyncEngine {
    context: Arc<SyncContext>,
    workspace: Arc<dyn WorkspaceProvider>,
    executor: SyncExecutor,
    status: Arc<dyn StatusSink>,
    clear_after: Duration,
    pending_clear: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        context: Arc<SyncContext>,
        workspace: Arc<dyn WorkspaceProvider>,
        vcs: Arc<dyn Vcs>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            context,
            workspace,
            executor: SyncExecutor::new(vcs),
            status,
            clear_after: Duration::from_secs(5),
            pending_clear: Mutex::new(None),
        }
    }

    /// Engine backed by the `git` executable and the configured roots
    pub fn from_config(config: &Config, context: Arc<SyncContext>, status: Arc<dyn StatusSink>) -> Self {
        Self::new(
            context,
            Arc::new(config.clone()),
            Arc::new(GitClient::new(config)),
            status,
        )
        .with_clear_after(config.status_clear_after())
    }

    /// Delay before a terminal status is hidden
    pub fn with_clear_after(mut self, clear_after: Duration) -> Self {
        self.clear_after = clear_after;
        self
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.context
    }

    pub fn is_running(&self) -> bool {
        self.context.cycle.is_in_progress()
    }

    /// Run one sync cycle unless another one is already in flight
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(guard) = self.context.cycle.try_begin() else {
            info!("Git pull operation already in progress, skipping...");
            return CycleOutcome::AlreadyRunning;
        };
        let cancel = guard.token().clone();

        self.publish(&StatusLine::new("Git Pull in Progress", "Run the cancel command to stop"));
        info!("Checking for Git updates...");

        let outcome = match self.execute(&cancel).await {
            Ok(summary) => {
                info!(
                    "Sync cycle finished in {:.2}s: {} ({} updated, {} up to date, {} skipped, {} failed)",
                    summary.duration.as_secs_f64(),
                    summary.status,
                    summary.updated,
                    summary.up_to_date,
                    summary.skipped,
                    summary.failed
                );
                self.publish_terminal(&summary.status.to_status_line());
                CycleOutcome::Completed(summary)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Error in git pull operation: {}", message);
                self.publish_terminal(&CycleStatus::Error { message: message.clone() }.to_status_line());
                CycleOutcome::Failed(message)
            }
        };

        drop(guard);
        outcome
    }

    /// Cancel command: signal the running cycle. No-op when idle.
    pub fn cancel(&self) -> bool {
        if self.context.cancel() {
            info!("Cancellation requested for the running sync cycle");
            self.publish_terminal(&CycleStatus::Cancelled.to_status_line());
            true
        } else {
            debug!("No sync cycle in progress, nothing to cancel");
            false
        }
    }

    /// Discovery only, outside of the single-flight cycle
    pub async fn discover(&self) -> Result<Vec<RepoDescriptor>> {
        let roots = self
            .workspace
            .workspace_folders()
            .context("Failed to resolve workspace folders")?;

        Ok(Scanner::new(&self.context.classifier)
            .scan(&roots, &CancelToken::new())
            .await)
    }

    async fn execute(&self, cancel: &CancelToken) -> Result<SyncSummary> {
        let start_time = Instant::now();

        let roots = self
            .workspace
            .workspace_folders()
            .context("Failed to resolve workspace folders")?;

        if roots.is_empty() {
            info!("No workspace folders found.");
            return Ok(SyncSummary::new(
                Vec::new(),
                CycleStatus::NoWorkspace,
                start_time.elapsed(),
            ));
        }

        let repositories = Scanner::new(&self.context.classifier)
            .scan(&roots, cancel)
            .await;

        info!("Discovered {} repositories", repositories.len());
        self.publish(&StatusLine::new(
            format!("Processing {} Git repositories", repositories.len()),
            "Run the cancel command to stop",
        ));

        let results = self.sync_all(repositories, cancel).await;
        let status = CycleStatus::from_results(&results, cancel.is_cancelled());

        Ok(SyncSummary::new(results, status, start_time.elapsed()))
    }

    /// Start every repository's sync before awaiting any of them
    async fn sync_all(&self, repositories: Vec<RepoDescriptor>, cancel: &CancelToken) -> Vec<RepoSyncResult> {
        let handles: Vec<JoinHandle<SyncOutcome>> = repositories
            .iter()
            .cloned()
            .map(|repo| {
                let executor = self.executor.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { executor.sync(&repo, &cancel).await })
            })
            .collect();

        let settled = join_all(handles).await;

        repositories
            .into_iter()
            .zip(settled)
            .map(|(repo, joined)| {
                let outcome = joined.unwrap_or_else(|e| {
                    error!("Sync task for {} did not complete: {}", repo.name, e);
                    SyncOutcome::failed(format!("sync task did not complete: {}", e))
                });
                debug!("Sync completed for {}: {:?}", repo.name, outcome);
                RepoSyncResult { repo, outcome }
            })
            .collect()
    }

    fn publish(&self, status: &StatusLine) {
        if let Some(pending) = self.lock_pending().take() {
            pending.abort();
        }
        self.status.show(status);
    }

    /// Publish a terminal status and hide it after `clear_after`
    fn publish_terminal(&self, status: &StatusLine) {
        self.publish(status);

        let sink = self.status.clone();
        let delay = self.clear_after;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            sink.hide();
        });

        *self.lock_pending() = Some(handle);
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending_clear.lock().unwrap_or_else(|e| e.into_inner())
    }
}
