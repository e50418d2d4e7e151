//! Discovery of untracked tools below a directory.
//!
//! The scan is a depth-first walk over an explicit stack. Directories are
//! identified by their canonical path, so symlink loops and aliased trees are
//! visited once.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use crate::registry::Registry;
use crate::tool::Tool;
use crate::util::{absolutize, is_executable, real_path};
use crate::vcs::{is_working_copy, read_origin_url};

pub const DEFAULT_ARCHIVE_EXTENSIONS: &[&str] = &[
    "zip", "tar", "gz", "tgz", "xz", "bz2", "7z", "rar", "jar", "whl", "deb", "rpm", "appimage",
];

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Also propose executables and archives as local tools.
    pub detect_local: bool,
    /// Lowercase file extensions treated as archives.
    pub archive_extensions: Vec<String>,
    /// Directory names that are never entered.
    pub skip_dirs: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            detect_local: false,
            archive_extensions: DEFAULT_ARCHIVE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            skip_dirs: Vec::new(),
        }
    }
}

impl ScanOptions {
    fn is_archive(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .is_some_and(|ext| self.archive_extensions.iter().any(|a| *a == ext))
    }

    fn skips(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.skip_dirs.iter().any(|s| s == name))
    }
}

/// Lazy iterator over candidate tools. Never mutates the registry.
pub struct Scan {
    options: ScanOptions,
    tracked: Vec<PathBuf>,
    stack: Vec<PathBuf>,
    visited: HashSet<PathBuf>,
    pending: VecDeque<Tool>,
}

/// Starts a scan of `root`, excluding everything `registry` already tracks.
pub fn scan(root: &Path, registry: &Registry, options: ScanOptions) -> Scan {
    let mut tracked = Vec::new();
    for tool in registry.iter() {
        tracked.push(absolutize(tool.path()));
        let real = real_path(tool.path());
        if !tracked.contains(&real) {
            tracked.push(real);
        }
    }
    Scan {
        options,
        tracked,
        stack: vec![absolutize(root)],
        visited: HashSet::new(),
        pending: VecDeque::new(),
    }
}

impl Scan {
    fn is_tracked(&self, path: &Path) -> bool {
        let real = real_path(path);
        self.tracked
            .iter()
            .any(|t| path.starts_with(t) || real.starts_with(t))
    }

    /// Processes one directory and returns a git candidate if it is one.
    fn visit(&mut self, dir: PathBuf) -> Option<Tool> {
        let canonical = match std::fs::canonicalize(&dir) {
            Ok(path) => path,
            Err(e) => {
                debug!("Skipping {}: {}", dir.display(), e);
                return None;
            }
        };
        if !self.visited.insert(canonical) || self.is_tracked(&dir) {
            return None;
        }

        if is_working_copy(&dir) {
            return git_candidate(&dir);
        }

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot read {}: {}", dir.display(), e);
                return None;
            }
        };
        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();

        let mut subdirs = Vec::new();
        for path in paths {
            // metadata follows symlinks
            let Ok(meta) = std::fs::metadata(&path) else {
                debug!("Skipping dangling entry {}", path.display());
                continue;
            };
            if meta.is_dir() {
                if !self.options.skips(&path) {
                    subdirs.push(path);
                }
            } else if meta.is_file() && self.options.detect_local && self.is_local_candidate(&path) {
                match Tool::local(&path, None) {
                    Ok(tool) => self.pending.push_back(tool),
                    Err(e) => debug!("Skipping {}: {}", path.display(), e),
                }
            }
        }
        self.stack.extend(subdirs.into_iter().rev());
        None
    }

    fn is_local_candidate(&self, path: &Path) -> bool {
        (is_executable(path) || self.options.is_archive(path)) && !self.is_tracked(path)
    }
}

fn git_candidate(dir: &Path) -> Option<Tool> {
    let Some(url) = read_origin_url(dir) else {
        warn!("Skipping {}: repository has no origin remote", dir.display());
        return None;
    };
    let name = dir.file_name()?.to_string_lossy().to_string();
    let install_dir = dir.parent()?;
    match Tool::git(&url, install_dir, Some(&name)) {
        Ok(tool) => Some(tool.with_path(dir)),
        Err(e) => {
            warn!("Skipping {}: {}", dir.display(), e);
            None
        }
    }
}

impl Iterator for Scan {
    type Item = Tool;

    fn next(&mut self) -> Option<Tool> {
        loop {
            if let Some(tool) = self.pending.pop_front() {
                return Some(tool);
            }
            let dir = self.stack.pop()?;
            if let Some(tool) = self.visit(dir) {
                return Some(tool);
            }
        }
    }
}
