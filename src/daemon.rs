//! Daemon Infrastructure - Background service for periodic repository syncs
//!
//! [`CycleScheduler`] triggers a sync cycle immediately and then on a fixed
//! period. [`Daemon`] hosts the scheduler in a long-running process with PID
//! file management, shutdown signals and a SIGUSR1-driven cancel command.

use crate::config::Config;
use crate::context::SyncContext;
use crate::status::StatusBoard;
use crate::sync::{CycleOutcome, SyncEngine};
use anyhow::{Context, Result};
use futures::future::join_all;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Triggers sync cycles: once on start, then every `period` if set
pub struct CycleScheduler {
    engine: Arc<SyncEngine>,
    period: Option<Duration>,
}

impl CycleScheduler {
    pub fn new(engine: Arc<SyncEngine>, period: Option<Duration>) -> Self {
        Self { engine, period }
    }

    /// Period taken from `continuous_pull`, `None` when disabled
    pub fn from_config(engine: Arc<SyncEngine>, config: &Config) -> Self {
        let period = config
            .continuous_pull
            .enabled
            .then(|| config.pull_interval());
        Self::new(engine, period)
    }

    /// Run until `shutdown` fires (or, without a period, until the first
    /// cycle ends)
    ///
    /// Shutdown stops future triggers only. A cycle already in flight is
    /// awaited before returning, so its git commands are never killed.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut first = self.trigger();

        let Some(period) = self.period else {
            tokio::select! {
                _ = &mut first => {}
                _ = shutdown.recv() => {
                    info!("Shutdown requested, waiting for the running sync cycle to finish");
                    let _ = first.await;
                }
            }
            return Ok(());
        };

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Continuous pull enabled with interval: {:?}", period);

        let mut in_flight = vec![first];

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received in scheduler loop");
                    break;
                }

                _ = ticker.tick() => {
                    debug!("Starting scheduled sync cycle");
                    in_flight.retain(|handle| !handle.is_finished());
                    in_flight.push(self.trigger());
                }
            }
        }

        in_flight.retain(|handle| !handle.is_finished());
        if !in_flight.is_empty() {
            info!("Waiting for the running sync cycle to finish");
            join_all(in_flight).await;
        }

        info!("Scheduler loop exiting");
        Ok(())
    }

    /// Start a cycle in the background; overlapping triggers are dropped by
    /// the engine's single-flight guard
    fn trigger(&self) -> JoinHandle<()> {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            match engine.run_cycle().await {
                CycleOutcome::Completed(summary) => {
                    debug!("Scheduled cycle completed: {}", summary.status);
                }
                CycleOutcome::AlreadyRunning => {}
                CycleOutcome::Failed(e) => {
                    error!("Scheduled cycle failed: {}", e);
                }
            }
        })
    }
}

/// Daemon state and control
pub struct Daemon {
    config: Arc<Config>,
    engine: Arc<SyncEngine>,
    shutdown_sender: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
    pid_file_path: Option<PathBuf>,
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new(config: Config) -> Result<Self> {
        let status = Arc::new(StatusBoard::with_mirror(&config.status.file));
        let engine = Arc::new(SyncEngine::from_config(&config, SyncContext::new(), status));

        let (shutdown_sender, _) = broadcast::channel(1);

        Ok(Self {
            pid_file_path: pid_file_path(&config),
            config: Arc::new(config),
            engine,
            shutdown_sender,
            is_running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Run the scheduler in the current process until a shutdown signal
    pub async fn run(&mut self) -> Result<()> {
        if !self.config.enabled {
            info!("gitpulse is disabled in configuration, not starting the scheduler");
            return Ok(());
        }

        info!("Starting gitpulse daemon");

        self.write_pid_file().context("Failed to write PID file")?;
        self.is_running.store(true, Ordering::SeqCst);

        let shutdown_receiver = self.shutdown_sender.subscribe();
        let shutdown_sender = self.shutdown_sender.clone();
        let is_running = self.is_running.clone();
        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown_signal().await {
                error!("Failed to listen for shutdown signals: {:#}", e);
                return;
            }
            info!("Shutdown signal received, stopping daemon...");
            is_running.store(false, Ordering::SeqCst);
            let _ = shutdown_sender.send(());
        });

        let cancel_listener = spawn_cancel_listener(self.engine.clone())?;

        let scheduler = CycleScheduler::from_config(self.engine.clone(), &self.config);
        let result = scheduler.run(shutdown_receiver).await;

        if let Some(listener) = cancel_listener {
            listener.abort();
        }

        self.cleanup().context("Failed to cleanup daemon")?;

        result
    }

    /// Detach into the background (Unix platforms)
    ///
    /// Must be called before the async runtime is created.
    #[cfg(unix)]
    pub fn daemonize(config: &Config) -> Result<()> {
        use daemonize::Daemonize;

        let mut daemonize = Daemonize::new().working_directory(
            std::env::current_dir().context("Failed to determine current directory")?,
        );

        if let Some(pid_path) = pid_file_path(config) {
            daemonize = daemonize.pid_file(pid_path);
        }

        if !config.daemon.log_file.is_empty() {
            let log_path = Path::new(&config.daemon.log_file);
            if let Some(parent) = log_path.parent() {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let log_file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .context("Failed to open log file")?;
            daemonize = daemonize.stdout(log_file.try_clone()?).stderr(log_file);
        }

        daemonize.start().context("Failed to daemonize process")?;
        Ok(())
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Whether the scheduler loop is active
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn write_pid_file(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            let pid = std::process::id();

            if let Some(parent) = pid_file.parent() {
                fs::create_dir_all(parent).context("Failed to create PID file directory")?;
            }

            fs::write(pid_file, pid.to_string()).context("Failed to write PID file")?;

            info!("PID file written: {} (PID: {})", pid_file.display(), pid);
        }

        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                fs::remove_file(pid_file).context("Failed to remove PID file")?;
                info!("PID file removed: {}", pid_file.display());
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Daemon cleanup completed");
        Ok(())
    }
}

/// Listen for SIGUSR1 and forward it as the cancel command
#[cfg(unix)]
fn spawn_cancel_listener(engine: Arc<SyncEngine>) -> Result<Option<JoinHandle<()>>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;

    Ok(Some(tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            if !engine.cancel() {
                info!("Cancel requested but no sync cycle is running");
            }
        }
    })))
}

#[cfg(not(unix))]
fn spawn_cancel_listener(_engine: Arc<SyncEngine>) -> Result<Option<JoinHandle<()>>> {
    warn!("Cancel signal is not supported on this platform");
    Ok(None)
}

/// Wait for SIGINT or SIGTERM
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
        _ = terminate.recv() => debug!("SIGTERM received"),
    }

    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")
}

fn pid_file_path(config: &Config) -> Option<PathBuf> {
    (!config.daemon.pid_file.is_empty()).then(|| PathBuf::from(&config.daemon.pid_file))
}

/// PID of a live daemon, removing a stale PID file
pub fn running_daemon_pid(config: &Config) -> Result<Option<i32>> {
    let Some(pid_file) = pid_file_path(config) else {
        return Ok(None);
    };

    if !pid_file.exists() {
        return Ok(None);
    }

    let pid_str = fs::read_to_string(&pid_file).context("Failed to read PID file")?;
    let pid: i32 = pid_str.trim().parse().context("Invalid PID in PID file")?;

    if process_alive(pid) {
        Ok(Some(pid))
    } else {
        let _ = fs::remove_file(&pid_file);
        Ok(None)
    }
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal;
    use nix::unistd::Pid;

    // EPERM still means the process exists
    !matches!(signal::kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    true
}

/// Check if daemon is currently running by checking PID file
pub fn is_daemon_running(config: &Config) -> Result<bool> {
    Ok(running_daemon_pid(config)?.is_some())
}

/// Ask a running daemon to shut down
pub fn stop_daemon(config: &Config) -> Result<bool> {
    send_signal(config, DaemonSignal::Stop)
}

/// Cancel command for a running daemon's in-flight cycle
pub fn cancel_daemon_cycle(config: &Config) -> Result<bool> {
    send_signal(config, DaemonSignal::Cancel)
}

#[derive(Debug, Clone, Copy)]
enum DaemonSignal {
    Stop,
    Cancel,
}

fn send_signal(config: &Config, which: DaemonSignal) -> Result<bool> {
    let Some(pid) = running_daemon_pid(config)? else {
        warn!("No daemon appears to be running");
        return Ok(false);
    };

    deliver(pid, which)
}

#[cfg(unix)]
fn deliver(pid: i32, which: DaemonSignal) -> Result<bool> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let sig = match which {
        DaemonSignal::Stop => Signal::SIGTERM,
        DaemonSignal::Cancel => Signal::SIGUSR1,
    };
    signal::kill(Pid::from_raw(pid), sig)
        .with_context(|| format!("Failed to send {} to daemon process {}", sig.as_str(), pid))?;

    info!("Sent {} to daemon process {}", sig.as_str(), pid);
    Ok(true)
}

#[cfg(not(unix))]
fn deliver(pid: i32, which: DaemonSignal) -> Result<bool> {
    warn!("Signalling the daemon ({:?}, PID {}) is not supported on this platform", which, pid);
    Ok(false)
}
