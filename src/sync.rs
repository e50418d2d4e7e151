//! Install and update of tracked tools.
//!
//! Each tool is processed independently: a failure is recorded in its
//! [`SyncEntry`] and never stops the rest of the batch.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use chrono::Utc;
use tracing::{debug, info, warn};
use crate::config::Settings;
use crate::error::SyncError;
use crate::registry::Registry;
use crate::tool::{Tool, ToolKind};
use crate::util::{clear_dir, is_missing_or_empty, remove_path};
use crate::vcs::{is_working_copy, UpdateOutcome, Vcs};

/// Lifecycle of a tool during one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Pending,
    Materializing,
    Syncing,
    Ready,
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Pending => "pending",
            SyncState::Materializing => "materializing",
            SyncState::Syncing => "syncing",
            SyncState::Ready => "ready",
            SyncState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Install,
    Update,
}

/// Outcome for a single tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
    pub name: String,
    pub state: SyncState,
    pub error: Option<SyncError>,
    pub detail: String,
}

impl SyncEntry {
    fn ready(name: &str, detail: &str) -> Self {
        SyncEntry {
            name: name.to_string(),
            state: SyncState::Ready,
            error: None,
            detail: detail.to_string(),
        }
    }

    fn failed(name: &str, error: SyncError) -> Self {
        SyncEntry {
            name: name.to_string(),
            state: SyncState::Failed,
            detail: error.to_string(),
            error: Some(error),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == SyncState::Ready
    }
}

/// Per-tool results of a batch, sorted by tool name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub entries: Vec<SyncEntry>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| !e.is_ready())
    }

    pub fn ready(&self) -> impl Iterator<Item = &SyncEntry> {
        self.entries.iter().filter(|e| e.is_ready())
    }

    pub fn failed(&self) -> impl Iterator<Item = &SyncEntry> {
        self.entries.iter().filter(|e| !e.is_ready())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Deadline for each git invocation.
    pub timeout: Duration,
    /// Number of worker threads.
    pub jobs: usize,
}

impl From<&Settings> for SyncOptions {
    fn from(settings: &Settings) -> Self {
        SyncOptions {
            timeout: settings.sync_timeout(),
            jobs: settings.jobs,
        }
    }
}

pub struct SyncEngine<V: Vcs> {
    vcs: V,
    options: SyncOptions,
}

impl<V: Vcs> SyncEngine<V> {
    pub fn new(vcs: V, options: SyncOptions) -> Self {
        SyncEngine { vcs, options }
    }

    /// Materializes a tool.
    ///
    /// Git tools are cloned into their path; a path that already holds a
    /// working copy of the same remote counts as installed. Local tools only
    /// need to exist.
    pub fn install(&self, tool: &Tool) -> SyncEntry {
        transition(tool, SyncState::Pending, SyncState::Materializing);
        let entry = match tool.kind() {
            ToolKind::Local => {
                if tool.path().exists() {
                    SyncEntry::ready(tool.name(), "present")
                } else {
                    SyncEntry::failed(tool.name(), SyncError::PathMissing(tool.path().to_path_buf()))
                }
            }
            ToolKind::Git { source_url } => match self.clone_into_place(tool, source_url) {
                Ok(detail) => SyncEntry::ready(tool.name(), detail),
                Err(e) => SyncEntry::failed(tool.name(), e),
            },
        };
        transition(tool, SyncState::Materializing, entry.state);
        entry
    }

    /// Brings a materialized tool up to date.
    pub fn update(&self, tool: &Tool) -> SyncEntry {
        transition(tool, SyncState::Ready, SyncState::Syncing);
        let entry = match tool.kind() {
            ToolKind::Local => SyncEntry::ready(tool.name(), "nothing to update"),
            ToolKind::Git { .. } => match self.fast_forward(tool) {
                Ok(UpdateOutcome::Updated) => SyncEntry::ready(tool.name(), "updated"),
                Ok(UpdateOutcome::UpToDate) => SyncEntry::ready(tool.name(), "already up to date"),
                Err(e) => SyncEntry::failed(tool.name(), e),
            },
        };
        transition(tool, SyncState::Syncing, entry.state);
        entry
    }

    /// Runs `action` over `tools`, using up to `jobs` worker threads.
    pub fn run(&self, action: SyncAction, tools: &[Tool]) -> SyncReport {
        let jobs = self.options.jobs.clamp(1, tools.len().max(1));
        let mut entries = if jobs == 1 {
            tools.iter().map(|tool| self.run_one(action, tool)).collect()
        } else {
            debug!("Syncing {} tools on {} workers", tools.len(), jobs);
            let next = AtomicUsize::new(0);
            let results = Mutex::new(Vec::with_capacity(tools.len()));
            thread::scope(|scope| {
                for _ in 0..jobs {
                    scope.spawn(|| {
                        while let Some(tool) = tools.get(next.fetch_add(1, Ordering::Relaxed)) {
                            let entry = self.run_one(action, tool);
                            results
                                .lock()
                                .unwrap_or_else(|poisoned| poisoned.into_inner())
                                .push(entry);
                        }
                    });
                }
            });
            results.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
        };
        entries.sort_by(|a: &SyncEntry, b: &SyncEntry| a.name.cmp(&b.name));
        SyncReport { entries }
    }

    /// Runs `action` over the named tools and records every success in the
    /// registry. Names that are not tracked are skipped.
    pub fn sync<S: AsRef<str>>(&self, registry: &mut Registry, action: SyncAction, names: &[S]) -> SyncReport {
        let tools: Vec<Tool> = names
            .iter()
            .filter_map(|name| {
                let tool = registry.get(name.as_ref()).cloned();
                if tool.is_none() {
                    warn!("Skipping unknown tool '{}'", name.as_ref());
                }
                tool
            })
            .collect();

        let report = self.run(action, &tools);
        let now = Utc::now();
        for entry in report.ready() {
            registry.record_sync(&entry.name, now);
        }
        info!(
            "{:?}: {} ready, {} failed",
            action,
            report.ready().count(),
            report.failed().count()
        );
        report
    }

    /// Installs every tracked tool.
    pub fn install_all(&self, registry: &mut Registry) -> SyncReport {
        let names: Vec<String> = registry.iter().map(|t| t.name().to_string()).collect();
        self.sync(registry, SyncAction::Install, &names)
    }

    /// Updates every tracked tool.
    pub fn update_all(&self, registry: &mut Registry) -> SyncReport {
        let names: Vec<String> = registry.iter().map(|t| t.name().to_string()).collect();
        self.sync(registry, SyncAction::Update, &names)
    }

    fn run_one(&self, action: SyncAction, tool: &Tool) -> SyncEntry {
        match action {
            SyncAction::Install => self.install(tool),
            SyncAction::Update => self.update(tool),
        }
    }

    fn clone_into_place(&self, tool: &Tool, url: &str) -> Result<&'static str, SyncError> {
        let path = tool.path();
        if !is_missing_or_empty(path) {
            if is_working_copy(path)
                && self.vcs.origin_url(path).as_deref() == Some(url)
                && self.vcs.has_checkout(path, self.options.timeout)
            {
                return Ok("already installed");
            }
            return Err(SyncError::CloneError(format!(
                "{} exists and is not a working copy of {}",
                path.display(),
                url
            )));
        }

        let existed = path.exists();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Io(format!("could not create {}: {}", parent.display(), e))
            })?;
        }

        match self.vcs.clone_repo(url, path, self.options.timeout) {
            Ok(()) => Ok("installed"),
            Err(e) => {
                let cleanup = if existed {
                    clear_dir(path)
                } else if path.exists() {
                    remove_path(path)
                } else {
                    Ok(())
                };
                if let Err(cleanup) = cleanup {
                    warn!("Could not remove partial clone {}: {}", path.display(), cleanup);
                }
                Err(e)
            }
        }
    }

    fn fast_forward(&self, tool: &Tool) -> Result<UpdateOutcome, SyncError> {
        let path = tool.path();
        if !path.exists() {
            return Err(SyncError::PathMissing(path.to_path_buf()));
        }
        if !is_working_copy(path) {
            return Err(SyncError::NotARepository(path.to_path_buf()));
        }
        self.vcs.update(path, self.options.timeout)
    }
}

fn transition(tool: &Tool, from: SyncState, to: SyncState) {
    debug!("{}: {} -> {}", tool.name(), from, to);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::Path;
    use tempfile::tempdir;

    /// Scripted backend: clones create a fake working copy; anything whose
    /// URL or path is listed in `broken` fails.
    #[derive(Default)]
    struct FakeVcs {
        broken: HashSet<String>,
        interrupted: HashSet<String>,
        diverged: HashSet<String>,
        stale: HashSet<String>,
    }

    impl Vcs for FakeVcs {
        fn clone_repo(&self, url: &str, dest: &Path, _timeout: Duration) -> Result<(), SyncError> {
            std::fs::create_dir_all(dest.join(".git")).unwrap();
            if self.broken.contains(url) {
                return Err(SyncError::CloneError(format!("could not read from {url}")));
            }
            std::fs::write(
                dest.join(".git").join("config"),
                format!("[remote \"origin\"]\n\turl = {url}\n"),
            )
            .unwrap();
            if self.interrupted.contains(url) {
                return Err(SyncError::NetworkError("clone timed out after 1s".to_string()));
            }
            std::fs::write(dest.join(".git").join("HEAD"), "ref: refs/heads/main\n").unwrap();
            Ok(())
        }

        fn update(&self, path: &Path, _timeout: Duration) -> Result<UpdateOutcome, SyncError> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if self.broken.contains(&name) {
                Err(SyncError::NetworkError("unreachable".to_string()))
            } else if self.diverged.contains(&name) {
                Err(SyncError::MergeConflict("not possible to fast-forward".to_string()))
            } else if self.stale.contains(&name) {
                Ok(UpdateOutcome::Updated)
            } else {
                Ok(UpdateOutcome::UpToDate)
            }
        }

        fn origin_url(&self, path: &Path) -> Option<String> {
            crate::vcs::read_origin_url(path)
        }

        fn has_checkout(&self, path: &Path, _timeout: Duration) -> bool {
            path.join(".git").join("HEAD").exists()
        }
    }

    fn url(name: &str) -> String {
        format!("https://example.com/acme/{name}.git")
    }

    fn registry_with(install_dir: &Path, names: &[&str]) -> Registry {
        let mut registry = Registry::new(Settings::new(install_dir));
        for name in names {
            registry
                .add(Tool::git(&url(name), install_dir, None).unwrap())
                .unwrap();
        }
        registry
    }

    fn options(jobs: usize) -> SyncOptions {
        SyncOptions {
            timeout: Duration::from_secs(5),
            jobs,
        }
    }

    #[test]
    fn test_batch_isolation() {
        for jobs in [1, 3] {
            let dir = tempdir().unwrap();
            let names = ["a", "b", "c", "d", "e"];
            let mut registry = registry_with(dir.path(), &names);
            let vcs = FakeVcs {
                broken: HashSet::from([url("c")]),
                ..FakeVcs::default()
            };
            let engine = SyncEngine::new(vcs, options(jobs));

            let report = engine.install_all(&mut registry);

            let order: Vec<&str> = report.entries.iter().map(|e| e.name.as_str()).collect();
            assert_eq!(order, names);
            assert_eq!(report.ready().count(), 4);
            let failed: Vec<&SyncEntry> = report.failed().collect();
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].name, "c");
            assert_eq!(failed[0].error.as_ref().unwrap().kind(), "CloneError");
            assert!(report.has_failures());

            // partial clone is cleaned up, state recorded only on success
            assert!(!dir.path().join("c").exists());
            assert!(registry.get("c").unwrap().installed().is_none());
            assert!(registry.get("a").unwrap().installed().is_some());
            assert!(registry.get("a").unwrap().last_synced().is_some());
        }
    }

    #[test]
    fn test_install_is_idempotent_for_same_remote() {
        let dir = tempdir().unwrap();
        let mut registry = registry_with(dir.path(), &["foo"]);
        let engine = SyncEngine::new(FakeVcs::default(), options(1));
        assert_eq!(engine.install_all(&mut registry).entries[0].detail, "installed");
        let again = engine.install_all(&mut registry);
        assert!(!again.has_failures());
        assert_eq!(again.entries[0].detail, "already installed");
    }

    #[test]
    fn test_interrupted_clone_into_empty_dir_is_cleared() {
        let dir = tempdir().unwrap();
        let mut registry = registry_with(dir.path(), &["foo"]);
        let target = dir.path().join("foo");
        std::fs::create_dir_all(&target).unwrap();
        let vcs = FakeVcs {
            interrupted: HashSet::from([url("foo")]),
            ..FakeVcs::default()
        };
        let engine = SyncEngine::new(vcs, options(1));

        let first = engine.install_all(&mut registry);
        assert_eq!(first.entries[0].error.as_ref().unwrap().kind(), "NetworkError");
        assert!(target.exists());
        assert!(is_missing_or_empty(&target));

        let second = engine.install_all(&mut registry);
        assert!(!second.entries[0].is_ready());
        assert!(registry.get("foo").unwrap().installed().is_none());
        assert!(registry.get("foo").unwrap().last_synced().is_none());
    }

    #[test]
    fn test_origin_without_checkout_is_not_installed() {
        let dir = tempdir().unwrap();
        let mut registry = registry_with(dir.path(), &["foo"]);
        let git_dir = dir.path().join("foo").join(".git");
        std::fs::create_dir_all(&git_dir).unwrap();
        std::fs::write(
            git_dir.join("config"),
            format!("[remote \"origin\"]\n\turl = {}\n", url("foo")),
        )
        .unwrap();
        let engine = SyncEngine::new(FakeVcs::default(), options(1));

        let report = engine.install_all(&mut registry);
        assert_eq!(report.entries[0].error.as_ref().unwrap().kind(), "CloneError");
        assert!(registry.get("foo").unwrap().installed().is_none());
    }

    #[test]
    fn test_install_refuses_foreign_content() {
        let dir = tempdir().unwrap();
        let mut registry = registry_with(dir.path(), &["foo"]);
        std::fs::create_dir_all(dir.path().join("foo")).unwrap();
        std::fs::write(dir.path().join("foo").join("notes.txt"), "mine").unwrap();
        let engine = SyncEngine::new(FakeVcs::default(), options(1));

        let report = engine.install_all(&mut registry);
        assert_eq!(report.entries[0].error.as_ref().unwrap().kind(), "CloneError");
        assert!(dir.path().join("foo").join("notes.txt").exists());
    }

    #[test]
    fn test_update_outcomes() {
        let dir = tempdir().unwrap();
        let names = ["fresh", "gone", "plain", "split", "stale"];
        let mut registry = registry_with(dir.path(), &names);
        for name in ["fresh", "split", "stale"] {
            std::fs::create_dir_all(dir.path().join(name).join(".git")).unwrap();
        }
        std::fs::create_dir_all(dir.path().join("plain")).unwrap();
        let vcs = FakeVcs {
            diverged: HashSet::from(["split".to_string()]),
            stale: HashSet::from(["stale".to_string()]),
            ..FakeVcs::default()
        };
        let engine = SyncEngine::new(vcs, options(2));

        let report = engine.update_all(&mut registry);
        let by_name = |name: &str| report.entries.iter().find(|e| e.name == name).unwrap();

        assert_eq!(by_name("fresh").detail, "already up to date");
        assert_eq!(by_name("stale").detail, "updated");
        assert_eq!(by_name("gone").error.as_ref().unwrap().kind(), "PathMissing");
        assert_eq!(by_name("plain").error.as_ref().unwrap().kind(), "NotARepository");
        assert_eq!(by_name("split").error.as_ref().unwrap().kind(), "MergeConflict");
        assert!(registry.get("split").unwrap().last_synced().is_none());
        assert!(registry.get("stale").unwrap().last_synced().is_some());
    }

    #[test]
    fn test_local_tools() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("present.sh");
        std::fs::write(&present, "echo").unwrap();
        let mut registry = Registry::new(Settings::new(dir.path()));
        registry.add(Tool::local(&present, None).unwrap()).unwrap();
        registry.add(Tool::local(dir.path().join("missing.sh"), None).unwrap()).unwrap();
        let engine = SyncEngine::new(FakeVcs::default(), options(1));

        let install = engine.install_all(&mut registry);
        assert_eq!(install.entries[0].name, "missing.sh");
        assert_eq!(install.entries[0].error.as_ref().unwrap().kind(), "PathMissing");
        assert!(install.entries[1].is_ready());

        let update = engine.update_all(&mut registry);
        assert!(!update.has_failures());
    }

    #[test]
    fn test_unknown_names_are_skipped() {
        let dir = tempdir().unwrap();
        let mut registry = registry_with(dir.path(), &["foo"]);
        let engine = SyncEngine::new(FakeVcs::default(), options(1));
        let report = engine.sync(&mut registry, SyncAction::Install, &["nope"]);
        assert!(report.entries.is_empty());
    }
}
