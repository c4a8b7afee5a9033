//! Repository discovery across workspace roots
//!
//! A workspace root that is itself a git repository is synced as-is. Otherwise
//! only its immediate subdirectories are considered; discovery never recurses
//! deeper than one level.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::context::CancelToken;

/// Directory name marking a git working tree
const GIT_MARKER: &str = ".git";

/// A workspace root supplied by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceFolder {
    pub path: PathBuf,
    pub name: String,
}

impl WorkspaceFolder {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }

    /// Folder named after the last component of its path
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = display_name(&path);
        Self { path, name }
    }
}

/// A repository selected for synchronization in the current cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct RepoDescriptor {
    pub path: PathBuf,
    pub name: String,
}

impl RepoDescriptor {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

/// Source of the workspace roots for a cycle
///
/// Resolving may fail (for example, an unexpandable path); the orchestrator
/// reports that as a cycle error.
pub trait WorkspaceProvider: Send + Sync {
    fn workspace_folders(&self) -> Result<Vec<WorkspaceFolder>>;
}

impl WorkspaceProvider for Vec<WorkspaceFolder> {
    fn workspace_folders(&self) -> Result<Vec<WorkspaceFolder>> {
        Ok(self.clone())
    }
}

/// Memoizing "is this directory a git repository" check
///
/// Results are keyed by the exact path given, no canonicalization is applied.
/// Entries are never invalidated: a directory that gains or loses its `.git`
/// after the first check keeps its original answer for the process lifetime.
#[derive(Debug, Default)]
pub struct RepoClassifier {
    cache: Mutex<HashMap<PathBuf, bool>>,
    probes: AtomicU64,
}

impl RepoClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `path` is a git repository. Never fails, probe errors
    /// are cached as `false`.
    pub async fn is_repository(&self, path: &Path) -> bool {
        if let Some(cached) = self.cached(path) {
            return cached;
        }

        self.probes.fetch_add(1, Ordering::Relaxed);
        let is_repo = match tokio::fs::try_exists(path.join(GIT_MARKER)).await {
            Ok(exists) => exists,
            Err(e) => {
                debug!("Failed to probe {}: {}", path.display(), e);
                false
            }
        };

        self.lock_cache().insert(path.to_path_buf(), is_repo);
        is_repo
    }

    /// Number of filesystem probes performed (cache misses)
    pub fn probes(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.lock_cache().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, path: &Path) -> Option<bool> {
        self.lock_cache().get(path).copied()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, bool>> {
        // Entries are idempotent booleans, a poisoned map is still consistent
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Produces the list of repositories to synchronize from workspace roots
pub struct Scanner<'a> {
    classifier: &'a RepoClassifier,
}

impl<'a> Scanner<'a> {
    pub fn new(classifier: &'a RepoClassifier) -> Self {
        Self { classifier }
    }

    /// Scan roots in order, stopping early once `cancel` is set
    ///
    /// Subfolders of a single root are classified concurrently, so their
    /// relative order in the result is not meaningful.
    pub async fn scan(&self, roots: &[WorkspaceFolder], cancel: &CancelToken) -> Vec<RepoDescriptor> {
        let mut repositories = Vec::new();

        for root in roots {
            if cancel.is_cancelled() {
                info!("Operation cancelled.");
                break;
            }

            if self.classifier.is_repository(&root.path).await {
                repositories.push(RepoDescriptor::new(&root.path, &root.name));
                continue;
            }

            info!(
                "{} is not a git repository. Checking immediate subfolders (one level deep)...",
                root.name
            );

            let subfolders = match list_subfolders(&root.path).await {
                Ok(subfolders) => subfolders,
                Err(e) => {
                    warn!("Error reading immediate subfolders in {}: {:#}", root.path.display(), e);
                    Vec::new()
                }
            };

            info!("Found {} immediate subfolders to check.", subfolders.len());

            let checks = join_all(subfolders.iter().map(|subfolder| async move {
                (subfolder, self.classifier.is_repository(subfolder).await)
            }))
            .await;

            let before = repositories.len();
            repositories.extend(
                checks
                    .into_iter()
                    .filter(|(_, is_repo)| *is_repo)
                    .map(|(subfolder, _)| RepoDescriptor::new(subfolder, display_name(subfolder))),
            );

            info!(
                "Found {} git repositories in {}",
                repositories.len() - before,
                root.name
            );
        }

        debug!(
            "Classification cache holds {} entries after {} probes",
            self.classifier.len(),
            self.classifier.probes()
        );

        repositories
    }
}

/// Immediate child directories of `path`, never recursing further
pub async fn list_subfolders(path: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("Failed to read directory: {}", path.display()))?;

    let mut subfolders = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("Failed to list directory: {}", path.display()))?
    {
        let file_type = entry
            .file_type()
            .await
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;

        if file_type.is_dir() {
            subfolders.push(entry.path());
        }
    }

    Ok(subfolders)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn make_repo(path: &Path) {
        std::fs::create_dir_all(path.join(GIT_MARKER)).unwrap();
    }

    fn names(repos: &[RepoDescriptor]) -> HashSet<String> {
        repos.iter().map(|r| r.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_classifier_caches_result() {
        let dir = TempDir::new().unwrap();
        make_repo(dir.path());

        let classifier = RepoClassifier::new();
        assert!(classifier.is_repository(dir.path()).await);
        assert!(classifier.is_repository(dir.path()).await);
        assert_eq!(classifier.probes(), 1);
        assert_eq!(classifier.len(), 1);
    }

    #[tokio::test]
    async fn test_classifier_cache_is_never_invalidated() {
        let dir = TempDir::new().unwrap();

        let classifier = RepoClassifier::new();
        assert!(!classifier.is_repository(dir.path()).await);

        make_repo(dir.path());
        assert!(!classifier.is_repository(dir.path()).await);
        assert_eq!(classifier.probes(), 1);
    }

    #[tokio::test]
    async fn test_classifier_missing_path_is_false() {
        let classifier = RepoClassifier::new();
        assert!(!classifier.is_repository(Path::new("/nonexistent/gitpulse/path")).await);
    }

    #[tokio::test]
    async fn test_root_repository_skips_children() {
        let dir = TempDir::new().unwrap();
        make_repo(dir.path());
        make_repo(&dir.path().join("child"));

        let classifier = RepoClassifier::new();
        let roots = vec![WorkspaceFolder::new(dir.path(), "root")];
        let repos = Scanner::new(&classifier).scan(&roots, &CancelToken::new()).await;

        assert_eq!(repos, vec![RepoDescriptor::new(dir.path(), "root")]);
        assert_eq!(classifier.probes(), 1);
    }

    #[tokio::test]
    async fn test_only_repository_subfolders_are_selected() {
        let dir = TempDir::new().unwrap();
        make_repo(&dir.path().join("a"));
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        make_repo(&dir.path().join("c"));
        std::fs::write(dir.path().join("notes.txt"), "not a dir").unwrap();

        let classifier = RepoClassifier::new();
        let roots = vec![WorkspaceFolder::from_path(dir.path())];
        let repos = Scanner::new(&classifier).scan(&roots, &CancelToken::new()).await;

        let expected: HashSet<String> = ["a", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names(&repos), expected);
        assert_eq!(repos.len(), 2);
    }

    #[tokio::test]
    async fn test_scan_is_one_level_deep() {
        let dir = TempDir::new().unwrap();
        make_repo(&dir.path().join("group").join("nested"));

        let classifier = RepoClassifier::new();
        let roots = vec![WorkspaceFolder::from_path(dir.path())];
        let repos = Scanner::new(&classifier).scan(&roots, &CancelToken::new()).await;

        assert!(repos.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_root_yields_nothing() {
        let classifier = RepoClassifier::new();
        let roots = vec![WorkspaceFolder::from_path("/nonexistent/gitpulse/root")];
        let repos = Scanner::new(&classifier).scan(&roots, &CancelToken::new()).await;

        assert!(repos.is_empty());
    }

    #[tokio::test]
    async fn test_roots_visited_in_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        make_repo(first.path());
        make_repo(second.path());

        let classifier = RepoClassifier::new();
        let roots = vec![
            WorkspaceFolder::new(second.path(), "second"),
            WorkspaceFolder::new(first.path(), "first"),
        ];
        let repos = Scanner::new(&classifier).scan(&roots, &CancelToken::new()).await;

        let order: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(order, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_cancelled_scan_stops_before_roots() {
        let dir = TempDir::new().unwrap();
        make_repo(dir.path());

        let classifier = RepoClassifier::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let roots = vec![WorkspaceFolder::from_path(dir.path())];
        let repos = Scanner::new(&classifier).scan(&roots, &cancel).await;

        assert!(repos.is_empty());
        assert_eq!(classifier.probes(), 0);
    }
}
