use anyhow::{bail, Context, Result};
use dirs::config_dir;
use path_clean::PathClean;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::discovery::{WorkspaceFolder, WorkspaceProvider};

/// Main configuration structure for gitpulse
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Gate for starting the scheduler at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Workspace roots to scan for repositories
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Periodic re-run of the sync cycle
    #[serde(default, alias = "continuousPull")]
    pub continuous_pull: ContinuousPullConfig,

    /// Git subprocess behavior
    #[serde(default)]
    pub git: GitConfig,

    /// Status indicator settings
    #[serde(default)]
    pub status: StatusConfig,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Workspace roots, visited in the listed order
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub roots: Vec<RootEntry>,
}

/// A single configured workspace root
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RootEntry {
    /// Directory path, `~` and environment variables are expanded
    pub path: String,

    /// Display name (defaults to the directory basename)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Continuous pull configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ContinuousPullConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Interval between cycles in milliseconds
    #[serde(default = "default_interval")]
    pub interval: u64,
}

/// Git command configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitConfig {
    /// Timeout for a single git invocation in seconds (0 = no timeout)
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Fast-forward only pulls
    #[serde(default)]
    pub fast_forward_only: bool,
}

/// Status indicator configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StatusConfig {
    /// Delay in milliseconds before a terminal status is cleared
    #[serde(default = "default_clear_after")]
    pub clear_after: u64,

    /// JSON file the daemon mirrors its current status to
    #[serde(default = "default_status_file")]
    pub file: String,
}

/// Daemon configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// PID file location
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    /// Log file location
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_interval() -> u64 {
    60_000
}
fn default_timeout() -> u64 {
    300
}
fn default_clear_after() -> u64 {
    5_000
}
fn default_pid_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/gitpulse.pid", runtime_dir)
    } else {
        "/tmp/gitpulse.pid".to_string()
    }
}

fn default_status_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/gitpulse-status.json", runtime_dir)
    } else {
        "/tmp/gitpulse-status.json".to_string()
    }
}

fn default_log_file() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/gitpulse/daemon.log", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/gitpulse/daemon.log", home)
    } else {
        "/tmp/gitpulse-daemon.log".to_string()
    }
}
fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            workspace: WorkspaceConfig::default(),
            continuous_pull: ContinuousPullConfig::default(),
            git: GitConfig::default(),
            status: StatusConfig::default(),
            daemon: DaemonConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ContinuousPullConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_interval(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            fast_forward_only: false,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            clear_after: default_clear_after(),
            file: default_status_file(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log_file: default_log_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Parse and validate configuration from YAML text
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        config.expand_paths()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("gitpulse").join("config.yml"))
    }

    fn validate(&self) -> Result<()> {
        if self.continuous_pull.interval == 0 {
            bail!("continuous_pull.interval must be greater than zero");
        }
        Ok(())
    }

    /// Expand environment variables in daemon and status file paths
    ///
    /// Workspace roots are resolved lazily, on every cycle, by
    /// [`WorkspaceProvider::workspace_folders`].
    pub fn expand_paths(&mut self) -> Result<()> {
        self.daemon.pid_file = shellexpand::full(&self.daemon.pid_file)
            .context("Failed to expand pid_file path")?
            .into_owned();

        self.daemon.log_file = shellexpand::full(&self.daemon.log_file)
            .context("Failed to expand log_file path")?
            .into_owned();

        self.status.file = shellexpand::full(&self.status.file)
            .context("Failed to expand status file path")?
            .into_owned();

        Ok(())
    }

    /// Replace the configured roots with the given directories
    pub fn with_roots<I, S>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.workspace.roots = roots
            .into_iter()
            .map(|path| RootEntry {
                path: path.into(),
                name: None,
            })
            .collect();
        self
    }

    /// Interval between continuous pull cycles
    pub fn pull_interval(&self) -> Duration {
        Duration::from_millis(self.continuous_pull.interval)
    }

    /// Per-invocation git timeout, `None` when disabled
    pub fn git_timeout(&self) -> Option<Duration> {
        match self.git.timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// How long a terminal status stays visible
    pub fn status_clear_after(&self) -> Duration {
        Duration::from_millis(self.status.clear_after)
    }
}

impl WorkspaceProvider for Config {
    fn workspace_folders(&self) -> Result<Vec<WorkspaceFolder>> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;

        self.workspace
            .roots
            .iter()
            .map(|root| resolve_root(root, &cwd))
            .collect()
    }
}

/// Turn a configured root into an absolute, normalized workspace folder
fn resolve_root(root: &RootEntry, cwd: &Path) -> Result<WorkspaceFolder> {
    let expanded = shellexpand::full(&root.path)
        .with_context(|| format!("Failed to expand workspace root: {}", root.path))?;

    let path = PathBuf::from(expanded.as_ref());
    let path = if path.is_absolute() {
        path.clean()
    } else {
        cwd.join(path).clean()
    };

    Ok(match &root.name {
        Some(name) => WorkspaceFolder::new(path, name.clone()),
        None => WorkspaceFolder::from_path(path),
    })
}
