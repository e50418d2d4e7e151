use std::path::{Component, Path, PathBuf};
use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

/// Turns `path` into an absolute, lexically normalized path.
///
/// A leading `~` is expanded to the home directory. `.` and `..` components
/// are resolved without touching the filesystem, so the path does not need to
/// exist.
pub fn absolutize(path: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(expanded),
            Err(_) => expanded,
        }
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Expands a leading `~` to the current user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = crate::global::utils::get_home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Resolves symlinks when the path exists, otherwise falls back to
/// [`absolutize`].
pub fn real_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| absolutize(path))
}

/// Returns true if `dir` is missing or has no entries.
pub fn is_missing_or_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => !dir.exists(),
    }
}

/// Removes a file or a directory tree.
pub fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Removes everything inside `dir` but keeps the directory itself.
pub fn clear_dir(dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        remove_path(&entry?.path())?;
    }
    Ok(())
}

/// Moves a file or directory, copying across filesystems when a plain rename
/// is not possible. Refuses to overwrite an existing destination.
pub fn move_path(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        bail!("destination {} already exists", to.display());
    }
    if !from.exists() {
        bail!("source {} does not exist", from.display());
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create directory {}", parent.display()))?;
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    copy_tree(from, to)?;
    remove_path(from).with_context(|| format!("Could not remove {}", from.display()))?;
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    if from.is_file() {
        std::fs::copy(from, to)
            .with_context(|| format!("Could not copy {} to {}", from.display(), to.display()))?;
        return Ok(());
    }
    for entry in WalkDir::new(from) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(from)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Could not copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Checks if a given path is an executable file on Unix.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Checks if a given path has a Windows executable extension (.exe, .bat, .cmd).
#[cfg(windows)]
pub fn is_executable(path: &Path) -> bool {
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        let ext = ext.to_ascii_lowercase();
        matches!(ext.as_str(), "exe" | "bat" | "cmd")
    } else {
        false
    }
}

/// Returns true for strings that look like a git remote rather than a local path.
pub fn is_git_url(candidate: &str) -> bool {
    let candidate = candidate.trim();
    ["http://", "https://", "git://", "ssh://", "file://", "git@"]
        .iter()
        .any(|prefix| candidate.starts_with(prefix))
}
