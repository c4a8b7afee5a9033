/// Common test utilities and helpers for gitpulse tests
use anyhow::{anyhow, Result};
use assert_fs::prelude::*;
use assert_fs::TempDir;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use gitpulse::{PullOutput, StatusLine, StatusSink, Vcs, WorkspaceFolder};

/// Temporary workspace root with helpers to lay out repositories
pub struct TestWorkspace {
    pub root: TempDir,
}

#[allow(dead_code)]
impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Create `<root>/<name>/.git`
    pub fn make_repo(&self, name: &str) -> PathBuf {
        self.root
            .child(name)
            .child(".git")
            .create_dir_all()
            .expect("Failed to create repository");
        self.root.child(name).path().to_path_buf()
    }

    /// Create a plain directory that is not a repository
    pub fn make_dir(&self, name: &str) -> PathBuf {
        self.root
            .child(name)
            .create_dir_all()
            .expect("Failed to create directory");
        self.root.child(name).path().to_path_buf()
    }

    pub fn folder(&self) -> WorkspaceFolder {
        WorkspaceFolder::new(self.root.path(), "workspace")
    }

    pub fn roots(&self) -> Vec<WorkspaceFolder> {
        vec![self.folder()]
    }

    /// Write a config file that does not point at any workspace roots
    pub fn write_empty_config(&self) -> PathBuf {
        let config = self.root.child("gitpulse.yml");
        config
            .write_str("workspace:\n  roots: []\n")
            .expect("Failed to write test config");
        config.path().to_path_buf()
    }
}

/// Scripted behaviour for one repository
#[derive(Debug, Clone, Default)]
pub struct FakeRepo {
    pub ahead: u32,
    pub fetch_error: Option<String>,
    pub detached: bool,
}

#[allow(dead_code)]
impl FakeRepo {
    pub fn ahead(ahead: u32) -> Self {
        Self {
            ahead,
            ..Default::default()
        }
    }

    pub fn failing_fetch(error: &str) -> Self {
        Self {
            fetch_error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn detached() -> Self {
        Self {
            detached: true,
            ..Default::default()
        }
    }
}

/// In-memory [`Vcs`] keyed by repository path; unknown paths are up to date
#[derive(Default)]
pub struct FakeVcs {
    repos: HashMap<PathBuf, FakeRepo>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    pulls: Mutex<Vec<PathBuf>>,
}

#[allow(dead_code)]
impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(mut self, path: impl Into<PathBuf>, repo: FakeRepo) -> Self {
        self.repos.insert(path.into(), repo);
        self
    }

    /// Block every fetch until the gate has permits
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Total number of git operations issued
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn pulled(&self) -> Vec<PathBuf> {
        self.pulls.lock().unwrap().clone()
    }

    fn repo(&self, path: &Path) -> FakeRepo {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.repos.get(path).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn fetch(&self, path: &Path) -> Result<()> {
        let repo = self.repo(path);

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await?;
        }

        match repo.fetch_error {
            Some(error) => Err(anyhow!(error)),
            None => Ok(()),
        }
    }

    async fn current_branch(&self, path: &Path) -> Result<Option<String>> {
        let repo = self.repo(path);
        Ok((!repo.detached).then(|| "main".to_string()))
    }

    async fn ahead_count(&self, path: &Path, _branch: &str) -> Result<u32> {
        Ok(self.repo(path).ahead)
    }

    async fn pull(&self, path: &Path) -> Result<PullOutput> {
        self.repo(path);
        self.pulls.lock().unwrap().push(path.to_path_buf());
        Ok(PullOutput {
            stdout: "Fast-forward".to_string(),
            stderr: String::new(),
        })
    }
}

/// Status event observed by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Show(String),
    Hide,
}

type ShowHook = Box<dyn Fn(&StatusLine) + Send + Sync>;

/// Status sink that records every call, with an optional hook on show
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
    on_show: Option<ShowHook>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook(hook: impl Fn(&StatusLine) + Send + Sync + 'static) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            on_show: Some(Box::new(hook)),
        }
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StatusEvent::Show(label) => Some(label),
                StatusEvent::Hide => None,
            })
            .collect()
    }
}

impl StatusSink for RecordingSink {
    fn show(&self, status: &StatusLine) {
        self.events
            .lock()
            .unwrap()
            .push(StatusEvent::Show(status.label.clone()));
        if let Some(hook) = &self.on_show {
            hook(status);
        }
    }

    fn hide(&self) {
        self.events.lock().unwrap().push(StatusEvent::Hide);
    }
}
