//! System health checks for gitpulse
//!
//! This module provides preflight checks to verify the system is properly
//! configured before running sync cycles.

use crate::config::Config;
use crate::discovery::WorkspaceProvider;
use crate::git::git_version;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// Workspace roots status
    pub workspace: CheckResult,
    /// Scheduler configuration (warning only)
    pub schedule: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: true,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub async fn run(config: &Config) -> Self {
        Self {
            git: Self::check_git().await,
            workspace: Self::check_workspace(config),
            schedule: Self::check_schedule(config),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.git.passed && self.workspace.passed
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        [&self.git, &self.workspace, &self.schedule]
            .into_iter()
            .filter(|r| r.is_warning)
            .collect()
    }

    /// All checks with their display names
    pub fn all_checks(&self) -> Vec<(&'static str, &CheckResult)> {
        vec![
            ("Git", &self.git),
            ("Workspace", &self.workspace),
            ("Schedule", &self.schedule),
        ]
    }

    async fn check_git() -> CheckResult {
        match git_version().await {
            Ok(version) => CheckResult::ok(version),
            Err(e) => CheckResult::error_with_details(
                "git is not available",
                format!("{:#}\nInstall git and make sure it is on PATH", e),
            ),
        }
    }

    fn check_workspace(config: &Config) -> CheckResult {
        let folders = match config.workspace_folders() {
            Ok(folders) => folders,
            Err(e) => {
                return CheckResult::error_with_details(
                    "Workspace roots could not be resolved",
                    format!("{:#}", e),
                )
            }
        };

        if folders.is_empty() {
            return CheckResult::warning_with_details(
                "No workspace roots configured",
                "Add entries under workspace.roots or pass --root",
            );
        }

        let missing: Vec<String> = folders
            .iter()
            .filter(|folder| !folder.path.is_dir())
            .map(|folder| folder.path.display().to_string())
            .collect();

        if missing.is_empty() {
            let listing = folders
                .iter()
                .map(|folder| format!("{} ({})", folder.path.display(), folder.name))
                .collect::<Vec<_>>()
                .join("\n");
            CheckResult::ok_with_details(format!("{} workspace root(s) found", folders.len()), listing)
        } else {
            CheckResult::warning_with_details(
                format!("{} of {} workspace roots are missing", missing.len(), folders.len()),
                missing.join("\n"),
            )
        }
    }

    fn check_schedule(config: &Config) -> CheckResult {
        if !config.enabled {
            return CheckResult::warning("Scheduler is disabled (enabled: false)");
        }

        if config.continuous_pull.enabled {
            CheckResult::ok(format!(
                "Continuous pull every {}s",
                config.pull_interval().as_secs_f64()
            ))
        } else {
            CheckResult::ok("Single sync on daemon start (continuous pull disabled)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_workspace_is_warning() {
        let result = HealthCheck::check_workspace(&Config::default());
        assert!(result.passed);
        assert!(result.is_warning);
    }

    #[test]
    fn test_missing_root_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_roots([
            dir.path().to_string_lossy().to_string(),
            "/nonexistent/gitpulse/root".to_string(),
        ]);

        let result = HealthCheck::check_workspace(&config);
        assert!(result.is_warning);
        assert!(result.details.unwrap().contains("/nonexistent/gitpulse/root"));
    }

    #[test]
    fn test_existing_roots_pass() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_roots([dir.path().to_string_lossy().to_string()]);

        let result = HealthCheck::check_workspace(&config);
        assert!(result.passed);
        assert!(!result.is_warning);
    }

    #[test]
    fn test_disabled_schedule_warns() {
        let mut config = Config::default();
        config.enabled = false;
        assert!(HealthCheck::check_schedule(&config).is_warning);
    }
}
