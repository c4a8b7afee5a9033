//! gitpulse - keeps workspace git repositories pulled from their remotes
//!
//! gitpulse discovers git repositories under a set of workspace roots and
//! keeps them in sync by fetching and pulling them in parallel, once or on a
//! fixed interval.
//!
//! ## Core Features
//!
//! - **Discovery**: each root is synced directly when it is a repository,
//!   otherwise its immediate subfolders are checked (one level deep only)
//! - **Parallel sync**: every repository is fetched and pulled as an
//!   independent task; one failure never affects the others
//! - **Single flight**: overlapping cycles are skipped, never queued
//! - **Cancellation**: cooperative, checked between git operations
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`context`]: Cycle state and cancellation
//! - [`discovery`]: Repository classification and workspace scanning
//! - [`git`]: Git command execution
//! - [`sync`]: Per-repository sync and cycle orchestration
//! - [`status`]: Status indicator
//! - [`daemon`]: Scheduling and background service
//! - [`health`]: Diagnostics

pub mod config;
pub mod context;
pub mod daemon;
pub mod discovery;
pub mod git;
pub mod health;
pub mod status;
pub mod sync;

pub use config::Config;
pub use context::{CancelToken, SyncContext};
pub use daemon::{CycleScheduler, Daemon};
pub use discovery::{RepoClassifier, RepoDescriptor, Scanner, WorkspaceFolder, WorkspaceProvider};
pub use git::{GitClient, PullOutput, Vcs};
pub use health::HealthCheck;
pub use status::{StatusBoard, StatusLine, StatusSink};
pub use sync::{CycleOutcome, CycleStatus, SyncEngine, SyncExecutor, SyncOutcome, SyncSummary};
