//! Version control backend.
//!
//! The sync engine talks to repositories through the [`Vcs`] trait. The
//! production implementation shells out to the `git` binary; every
//! invocation is bounded by a deadline and killed when it expires.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};
use regex::Regex;
use tracing::debug;
use crate::error::SyncError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of a successful update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    UpToDate,
}

/// Operations the sync engine needs from a version control system.
pub trait Vcs: Sync {
    /// Clones `url` into `dest`. `dest` is missing or an empty directory.
    fn clone_repo(&self, url: &str, dest: &Path, timeout: Duration) -> Result<(), SyncError>;

    /// Fetches and fast-forwards the working copy at `path`.
    fn update(&self, path: &Path, timeout: Duration) -> Result<UpdateOutcome, SyncError>;

    /// The `origin` remote of the working copy at `path`, if any.
    fn origin_url(&self, path: &Path) -> Option<String>;

    /// Whether the working copy at `path` has a checked-out commit.
    fn has_checkout(&self, path: &Path, timeout: Duration) -> bool;
}

/// Whether `path` is a git working copy (has a `.git` directory or file).
pub fn is_working_copy(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Reads the `origin` URL straight from a working copy's git config,
/// without running git.
///
/// Supports plain repositories as well as worktrees and submodules whose
/// `.git` is a `gitdir:` file.
pub fn read_origin_url(work_tree: &Path) -> Option<String> {
    let git_dir = resolve_git_dir(work_tree)?;
    let config = std::fs::read_to_string(git_dir.join("config")).ok()?;
    parse_origin_url(&config)
}

fn resolve_git_dir(work_tree: &Path) -> Option<PathBuf> {
    let marker = work_tree.join(".git");
    if marker.is_dir() {
        return Some(marker);
    }
    let content = std::fs::read_to_string(&marker).ok()?;
    let target = content.trim().strip_prefix("gitdir:")?.trim();
    let git_dir = work_tree.join(target);

    // worktrees keep the shared config in the common dir
    match std::fs::read_to_string(git_dir.join("commondir")) {
        Ok(common) => Some(git_dir.join(common.trim())),
        Err(_) => Some(git_dir),
    }
}

static SECTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\[([^\]]*)\]").unwrap());
static ORIGIN_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*remote\s+"origin"\s*$"#).unwrap());
static URL_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*url\s*=\s*(.+?)\s*$").unwrap());

fn parse_origin_url(config: &str) -> Option<String> {
    let mut in_origin = false;
    for line in config.lines() {
        if let Some(section) = SECTION.captures(line) {
            in_origin = ORIGIN_SECTION.is_match(&section[1]);
            continue;
        }
        if in_origin {
            if let Some(url) = URL_KEY.captures(line) {
                return Some(url[1].trim_matches('"').to_string());
            }
        }
    }
    None
}

/// Output of a finished git process.
#[derive(Debug)]
struct GitOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl GitOutput {
    /// Last non-empty stderr line, which is where git puts the reason.
    fn reason(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("git exited with {}", self.status))
    }
}

#[derive(Debug)]
enum RunError {
    TimedOut(Duration),
    Io(std::io::Error),
}

impl From<std::io::Error> for RunError {
    fn from(e: std::io::Error) -> Self {
        RunError::Io(e)
    }
}

impl RunError {
    /// Timeouts are network failures; anything else is local.
    fn into_sync_error(self, action: &str) -> SyncError {
        match self {
            RunError::TimedOut(after) => {
                SyncError::NetworkError(format!("{action} timed out after {}s", after.as_secs()))
            }
            RunError::Io(e) => SyncError::Io(format!("could not run git {action}: {e}")),
        }
    }
}

/// [`Vcs`] backed by the `git` command line client.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        GitCli {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        GitCli {
            program: program.into(),
        }
    }

    /// Runs git with a deadline. Output goes to temporary files so a chatty
    /// child can never block on a full pipe while we poll.
    fn run(&self, args: &[&str], cwd: Option<&Path>, timeout: Duration) -> Result<GitOutput, RunError> {
        let mut stdout = tempfile::tempfile()?;
        let mut stderr = tempfile::tempfile()?;

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(stdout.try_clone()?)
            .stderr(stderr.try_clone()?);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        debug!("Running git {}", args.join(" "));
        let mut child = command.spawn()?;
        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                debug!("git {} killed after {:?}", args.join(" "), timeout);
                return Err(RunError::TimedOut(timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(GitOutput {
            status,
            stdout: read_back(&mut stdout)?,
            stderr: read_back(&mut stderr)?,
        })
    }

    fn head(&self, path: &Path, timeout: Duration) -> Result<String, SyncError> {
        let output = self
            .run(&["rev-parse", "HEAD"], Some(path), timeout)
            .map_err(|e| e.into_sync_error("rev-parse"))?;
        if !output.status.success() {
            return Err(SyncError::NotARepository(path.to_path_buf()));
        }
        Ok(output.stdout.trim().to_string())
    }
}

fn read_back(file: &mut File) -> std::io::Result<String> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

impl Vcs for GitCli {
    fn clone_repo(&self, url: &str, dest: &Path, timeout: Duration) -> Result<(), SyncError> {
        let dest_arg = dest.to_string_lossy();
        let output = self
            .run(&["clone", "--", url, &dest_arg], None, timeout)
            .map_err(|e| e.into_sync_error("clone"))?;
        if !output.status.success() {
            return Err(SyncError::CloneError(output.reason()));
        }
        Ok(())
    }

    fn update(&self, path: &Path, timeout: Duration) -> Result<UpdateOutcome, SyncError> {
        let deadline = Instant::now() + timeout;
        let remaining = || deadline.saturating_duration_since(Instant::now());

        let before = self.head(path, remaining())?;

        let upstream = self
            .run(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"], Some(path), remaining())
            .map_err(|e| e.into_sync_error("rev-parse"))?;
        if !upstream.status.success() {
            return Err(SyncError::NoUpstream(upstream.reason()));
        }

        let fetch = self
            .run(&["fetch", "--quiet"], Some(path), remaining())
            .map_err(|e| e.into_sync_error("fetch"))?;
        if !fetch.status.success() {
            return Err(SyncError::NetworkError(fetch.reason()));
        }

        let merge = self
            .run(&["merge", "--ff-only", "@{u}"], Some(path), remaining())
            .map_err(|e| e.into_sync_error("merge"))?;
        if !merge.status.success() {
            return Err(SyncError::MergeConflict(merge.reason()));
        }

        let after = self.head(path, remaining())?;
        if before == after {
            Ok(UpdateOutcome::UpToDate)
        } else {
            Ok(UpdateOutcome::Updated)
        }
    }

    fn origin_url(&self, path: &Path) -> Option<String> {
        match self.run(&["config", "--get", "remote.origin.url"], Some(path), Duration::from_secs(10)) {
            Ok(output) if output.status.success() => {
                Some(output.stdout.trim().to_string()).filter(|url| !url.is_empty())
            }
            _ => read_origin_url(path),
        }
    }

    fn has_checkout(&self, path: &Path, timeout: Duration) -> bool {
        self.head(path, timeout).is_ok_and(|head| !head.is_empty())
    }
}
