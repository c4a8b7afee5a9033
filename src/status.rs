//! Single-slot status indicator
//!
//! The orchestrator overwrites the slot on every transition and clears it a
//! short while after a terminal state.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// What the status indicator currently shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
    pub label: String,
    pub tooltip: String,
    pub updated_at: DateTime<Local>,
}

impl StatusLine {
    pub fn new(label: impl Into<String>, tooltip: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            tooltip: tooltip.into(),
            updated_at: Local::now(),
        }
    }
}

/// Receiver of status transitions
pub trait StatusSink: Send + Sync {
    fn show(&self, status: &StatusLine);
    fn hide(&self);
}

/// In-memory status slot, optionally mirrored to a JSON file
#[derive(Debug, Default)]
pub struct StatusBoard {
    current: Mutex<Option<StatusLine>>,
    mirror: Option<Arc<Mirror>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also write the current status to `path` (removed when hidden)
    pub fn with_mirror(path: impl Into<PathBuf>) -> Self {
        Self {
            current: Mutex::new(None),
            mirror: Some(Arc::new(Mirror::new(path.into()))),
        }
    }

    pub fn current(&self) -> Option<StatusLine> {
        self.lock().clone()
    }

    /// Read a status previously mirrored by another process
    pub fn read_mirror(path: &Path) -> Result<Option<StatusLine>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read status file: {:?}", path))?;
        let status = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse status file: {:?}", path))?;

        Ok(Some(status))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<StatusLine>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StatusSink for StatusBoard {
    fn show(&self, status: &StatusLine) {
        debug!("Status: {} ({})", status.label, status.tooltip);
        *self.lock() = Some(status.clone());

        if let Some(mirror) = &self.mirror {
            mirror.update(Some(status.clone()));
        }
    }

    fn hide(&self) {
        self.lock().take();

        if let Some(mirror) = &self.mirror {
            mirror.update(None);
        }
    }
}

/// JSON copy of the slot on disk
///
/// Writes run on the blocking pool when a runtime is available. Each update
/// carries a generation and an older one never overwrites a newer one.
#[derive(Debug)]
struct Mirror {
    path: PathBuf,
    issued: AtomicU64,
    applied: Mutex<u64>,
}

impl Mirror {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
        }
    }

    fn update(self: &Arc<Self>, status: Option<StatusLine>) {
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let mirror = self.clone();
        let write = move || {
            if let Err(e) = mirror.apply(generation, status.as_ref()) {
                warn!("Failed to mirror status: {:#}", e);
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(write);
            }
            Err(_) => write(),
        }
    }

    fn apply(&self, generation: u64, status: Option<&StatusLine>) -> Result<()> {
        let mut applied = self.applied.lock().unwrap_or_else(|e| e.into_inner());
        if *applied > generation {
            return Ok(());
        }
        *applied = generation;

        let path = &self.path;
        match status {
            Some(status) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create status directory: {:?}", parent))?;
                }
                let content = serde_json::to_string_pretty(status).context("Failed to serialize status")?;
                std::fs::write(path, content)
                    .with_context(|| format!("Failed to write status file: {:?}", path))?;
            }
            None => {
                if path.exists() {
                    std::fs::remove_file(path)
                        .with_context(|| format!("Failed to remove status file: {:?}", path))?;
                }
            }
        }

        Ok(())
    }
}
