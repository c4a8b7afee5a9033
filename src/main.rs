use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use path_clean::PathClean;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gitpulse::config::RootEntry;
use gitpulse::daemon::{cancel_daemon_cycle, is_daemon_running, running_daemon_pid, stop_daemon};
use gitpulse::health::CheckResult;
use gitpulse::{
    Config, CycleOutcome, Daemon, HealthCheck, StatusBoard, SyncContext, SyncEngine, SyncOutcome,
    SyncSummary,
};

#[derive(Parser)]
#[command(name = "gitpulse")]
#[command(about = "Keep every git repository in your workspaces pulled from its remote")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root to scan instead of the configured ones (repeatable)
    #[arg(long = "root", global = true)]
    roots: Vec<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file with the given workspace roots
    Init {
        /// Workspace roots to sync
        #[arg(required = true)]
        roots: Vec<String>,

        /// Enable continuous pull
        #[arg(long)]
        continuous: bool,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Run one sync cycle in the foreground (Ctrl+C cancels)
    Sync {
        /// Print the cycle summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List repositories that would be synced
    List,

    /// Run as daemon
    Daemon {
        #[command(subcommand)]
        daemon_command: DaemonCommands,
    },

    /// System health check and diagnostics
    Doctor,
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the scheduler
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Cancel the daemon's in-flight sync cycle
    Cancel,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Init {
        roots,
        continuous,
        force,
    }) = &cli.command
    {
        return cmd_init(cli.config.as_deref(), roots, *continuous, *force);
    }

    let config = load_config(cli.config.as_deref(), &cli.roots)?;

    // Fork before any runtime threads exist
    if let Some(Commands::Daemon {
        daemon_command: DaemonCommands::Start { foreground: false },
    }) = &cli.command
    {
        if is_daemon_running(&config)? {
            println!("⚠️  Daemon is already running!");
            println!("   Use 'gitpulse daemon stop' to stop it first");
            return Ok(());
        }

        println!("🚀 Starting gitpulse daemon in the background...");
        println!("   PID file: {}", config.daemon.pid_file);
        println!("   Log file: {}", config.daemon.log_file);
        detach(&config)?;
    }

    init_logging(cli.verbose, &config.logging.level)?;
    info!("Starting gitpulse v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        match cli.command {
            None => cmd_sync(false, &config).await,
            Some(Commands::Sync { json }) => cmd_sync(json, &config).await,
            Some(Commands::List) => cmd_list(&config).await,
            Some(Commands::Daemon { daemon_command }) => cmd_daemon(daemon_command, &config).await,
            Some(Commands::Doctor) => cmd_doctor(&config).await,
            Some(Commands::Init { .. }) => Ok(()),
        }
    })
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool, level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>, roots: &[String]) -> Result<Config> {
    let config = match config_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    Ok(if roots.is_empty() {
        config
    } else {
        config.with_roots(roots.iter().cloned())
    })
}

#[cfg(unix)]
fn detach(config: &Config) -> Result<()> {
    Daemon::daemonize(config)
}

#[cfg(not(unix))]
fn detach(_config: &Config) -> Result<()> {
    bail!("Background daemon mode is not supported on this platform, use --foreground")
}

/// Write a configuration file for the given roots
fn cmd_init(config_path: Option<&Path>, roots: &[String], continuous: bool, force: bool) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path()?,
    };

    if config_path.exists() && !force {
        bail!(
            "Configuration already exists at {:?} (use --force to overwrite)",
            config_path
        );
    }

    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let mut config = Config::default();
    config.continuous_pull.enabled = continuous;
    config.workspace.roots = roots
        .iter()
        .map(|root| {
            let expanded = shellexpand::full(root)
                .with_context(|| format!("Failed to expand workspace root: {}", root))?;
            Ok(RootEntry {
                path: cwd.join(expanded.as_ref()).clean().display().to_string(),
                name: None,
            })
        })
        .collect::<Result<_>>()?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    config.save(&config_path)?;

    println!("✅ gitpulse initialized successfully!");
    println!("   Config: {:?}", config_path);
    for root in &config.workspace.roots {
        println!("   Workspace root: {}", root.path);
    }
    println!("   Next: run 'gitpulse sync' or 'gitpulse daemon start'");

    Ok(())
}

/// Run a single sync cycle
async fn cmd_sync(json: bool, config: &Config) -> Result<()> {
    let engine = Arc::new(SyncEngine::from_config(
        config,
        SyncContext::new(),
        Arc::new(StatusBoard::new()),
    ));

    let ctrl_c_engine = engine.clone();
    let ctrl_c = tokio::spawn(async move {
        if forward_interrupts(&ctrl_c_engine, tokio::signal::ctrl_c).await {
            std::process::exit(130);
        }
    });

    if !json {
        println!("🔍 Checking for Git updates...");
    }

    let outcome = engine.run_cycle().await;
    ctrl_c.abort();

    match outcome {
        CycleOutcome::Completed(summary) if json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
            );
        }
        CycleOutcome::Completed(summary) => print_summary(&summary),
        CycleOutcome::AlreadyRunning => println!("⚠️  A sync cycle is already in progress"),
        CycleOutcome::Failed(e) => bail!("Sync cycle failed: {}", e),
    }

    Ok(())
}

/// First interrupt cancels the running cycle; returns `true` on a second one
async fn forward_interrupts<F, Fut>(engine: &SyncEngine, mut interrupted: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if interrupted().await.is_err() {
        return false;
    }

    engine.cancel();
    eprintln!("🛑 Cancelling, waiting for running git commands (Ctrl+C again to exit)");

    interrupted().await.is_ok()
}

fn print_summary(summary: &SyncSummary) {
    for result in &summary.results {
        match &result.outcome {
            SyncOutcome::Updated { new_commits } => {
                println!("   🔄 {}: pulled {} new commit(s)", result.repo.name, new_commits)
            }
            SyncOutcome::UpToDate => println!("   ✅ {}: up to date", result.repo.name),
            SyncOutcome::Skipped { reason } => {
                println!("   ⏭️  {}: skipped ({})", result.repo.name, reason)
            }
            SyncOutcome::Failed { error } => println!("   ❌ {}: {}", result.repo.name, error),
        }
    }

    println!("\n🎉 {}", summary.status);
    println!("   📊 Total repositories: {}", summary.total_repositories);
    println!("   🔄 Updated: {}", summary.updated);
    println!("   ✅ Up to date: {}", summary.up_to_date);
    println!("   ⏭️  Skipped: {}", summary.skipped);
    println!("   ❌ Failed: {}", summary.failed);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());
}

/// List repositories that would be synced
async fn cmd_list(config: &Config) -> Result<()> {
    let engine = SyncEngine::from_config(config, SyncContext::new(), Arc::new(StatusBoard::new()));
    let repositories = engine.discover().await?;

    println!("Repositories ({}):", repositories.len());
    for repo in repositories {
        println!("  📁 {} ({})", repo.name, repo.path.display());
    }

    Ok(())
}

/// Handle daemon commands
async fn cmd_daemon(daemon_command: DaemonCommands, config: &Config) -> Result<()> {
    match daemon_command {
        DaemonCommands::Start { foreground } => {
            if foreground {
                if is_daemon_running(config)? {
                    println!("⚠️  Daemon is already running!");
                    println!("   Use 'gitpulse daemon stop' to stop it first");
                    return Ok(());
                }
                println!("🖥️  Running in foreground mode (Ctrl+C to stop)");
            }

            let mut daemon = Daemon::new(config.clone())?;
            daemon.run().await?;
        }

        DaemonCommands::Stop => {
            println!("🛑 Stopping gitpulse daemon...");

            if stop_daemon(config)? {
                println!("✅ Daemon stop signal sent");
            } else {
                println!("⚠️  No daemon appears to be running");
            }
        }

        DaemonCommands::Status => {
            println!("📊 gitpulse Daemon Status");

            match running_daemon_pid(config)? {
                Some(pid) => {
                    println!("   🟢 Status: Running (PID {})", pid);
                    if config.continuous_pull.enabled {
                        println!(
                            "   🔄 Sync interval: {:.0}s",
                            config.pull_interval().as_secs_f64()
                        );
                    }

                    match StatusBoard::read_mirror(Path::new(&config.status.file))? {
                        Some(status) => {
                            println!("   📝 {}", status.label);
                            if !status.tooltip.is_empty() {
                                println!("      {}", status.tooltip);
                            }
                            println!("      at {}", status.updated_at.format("%Y-%m-%d %H:%M:%S"));
                        }
                        None => println!("   💤 Idle"),
                    }

                    if !config.daemon.log_file.is_empty() {
                        println!("   📄 Log file: {}", config.daemon.log_file);
                    }
                }
                None => {
                    println!("   🔴 Status: Not running");
                    println!("   💡 Use 'gitpulse daemon start' to start the daemon");
                }
            }
        }

        DaemonCommands::Cancel => {
            if cancel_daemon_cycle(config)? {
                println!("🛑 Cancel request sent to the daemon");
            } else {
                println!("⚠️  No daemon appears to be running");
            }
        }
    }

    Ok(())
}

/// System health check and diagnostics
async fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config).await;
    print_health_report(&health);
    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning {
                "⚠️ "
            } else {
                "✅"
            }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 gitpulse System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    let warnings = health.warnings().len();
    if health.all_passed() {
        if warnings > 0 {
            println!("✅ All checks passed ({} warning(s))", warnings);
        } else {
            println!("✅ All checks passed");
        }
    } else {
        println!("❌ Some checks failed");
    }
}
