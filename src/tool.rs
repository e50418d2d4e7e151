use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::RegistryError;
use crate::util::absolutize;

/// The two kinds of tools the registry knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    /// A git working copy with a remote to clone from and pull.
    Git,
    /// A file or directory referenced in place.
    Local,
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolType::Git => write!(f, "git"),
            ToolType::Local => write!(f, "local"),
        }
    }
}

impl FromStr for ToolType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "git" => Ok(ToolType::Git),
            "local" => Ok(ToolType::Local),
            other => Err(format!("unknown tool type '{other}', expected git or local")),
        }
    }
}

/// Per-variant data of a tool. A git tool always carries its source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolKind {
    Git { source_url: String },
    Local,
}

impl ToolKind {
    pub fn tool_type(&self) -> ToolType {
        match self {
            ToolKind::Git { .. } => ToolType::Git,
            ToolKind::Local => ToolType::Local,
        }
    }
}

/// A set of normalized tags.
///
/// Every tag is trimmed, stripped of inner whitespace and lowercased on the
/// way in; empty tags are dropped and duplicates collapse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Parses a comma-separated tag list such as `"Win, privesc,,web"`.
    pub fn parse(list: &str) -> Self {
        list.split(',').collect()
    }

    /// Normalizes a single tag, returning `None` when nothing is left.
    pub fn normalize(tag: &str) -> Option<String> {
        let tag: String = tag
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();
        if tag.is_empty() { None } else { Some(tag) }
    }

    pub fn insert(&mut self, tag: &str) -> bool {
        match Self::normalize(tag) {
            Some(tag) => self.0.insert(tag),
            None => false,
        }
    }

    pub fn remove(&mut self, tag: &str) -> bool {
        match Self::normalize(tag) {
            Some(tag) => self.0.remove(&tag),
            None => false,
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        Self::normalize(tag).is_some_and(|tag| self.0.contains(&tag))
    }

    pub fn is_superset(&self, other: &TagSet) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn intersects(&self, other: &TagSet) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for tag in iter {
            set.insert(tag.as_ref());
        }
        set
    }
}

impl From<Vec<String>> for TagSet {
    fn from(tags: Vec<String>) -> Self {
        tags.into_iter().collect()
    }
}

impl From<TagSet> for Vec<String> {
    fn from(tags: TagSet) -> Self {
        tags.0.into_iter().collect()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.iter().collect();
        write!(f, "[{}]", tags.join(", "))
    }
}

/// A tracked tool.
///
/// Construct tools with [`Tool::git`] or [`Tool::local`]; both enforce the
/// per-variant invariants, so a `Tool` value is always well-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ToolRecord", into = "ToolRecord")]
pub struct Tool {
    name: String,
    kind: ToolKind,
    path: PathBuf,
    install_dir: PathBuf,
    tags: TagSet,
    added: Option<DateTime<Utc>>,
    installed: Option<DateTime<Utc>>,
    last_synced: Option<DateTime<Utc>>,
}

impl Tool {
    /// Creates a git tool materialized at `install_dir/<name>`.
    ///
    /// The name defaults to the last segment of `source_url` without a
    /// trailing `.git`.
    ///
    /// # Errors
    /// Returns [`RegistryError::InvalidTool`] if the URL is empty or no valid
    /// name can be derived.
    pub fn git<P: AsRef<Path>>(
        source_url: &str,
        install_dir: P,
        name: Option<&str>,
    ) -> Result<Tool, RegistryError> {
        let source_url = source_url.trim();
        if source_url.is_empty() {
            return Err(RegistryError::InvalidTool("git tools need a source url".to_string()));
        }
        let name = match name {
            Some(name) => name.trim().to_string(),
            None => derive_name_from_url(source_url)?,
        };
        validate_name(&name)?;
        let install_dir = absolutize(install_dir.as_ref());
        Ok(Tool {
            path: install_dir.join(&name),
            name,
            kind: ToolKind::Git { source_url: source_url.to_string() },
            install_dir,
            tags: TagSet::new(),
            added: None,
            installed: None,
            last_synced: None,
        })
    }

    /// Creates a local tool referencing `path` in place.
    pub fn local<P: AsRef<Path>>(path: P, name: Option<&str>) -> Result<Tool, RegistryError> {
        let path = absolutize(path.as_ref());
        let name = match name {
            Some(name) => name.trim().to_string(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| {
                    RegistryError::InvalidTool(format!("cannot derive a name from {}", path.display()))
                })?,
        };
        validate_name(&name)?;
        let install_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Ok(Tool {
            name,
            kind: ToolKind::Local,
            path,
            install_dir,
            tags: TagSet::new(),
            added: None,
            installed: None,
            last_synced: None,
        })
    }

    /// Places the tool at an explicit location instead of `install_dir/<name>`.
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = absolutize(path.as_ref());
        self
    }

    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ToolKind {
        &self.kind
    }

    pub fn tool_type(&self) -> ToolType {
        self.kind.tool_type()
    }

    pub fn source_url(&self) -> Option<&str> {
        match &self.kind {
            ToolKind::Git { source_url } => Some(source_url),
            ToolKind::Local => None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn added(&self) -> Option<DateTime<Utc>> {
        self.added
    }

    pub fn installed(&self) -> Option<DateTime<Utc>> {
        self.installed
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.last_synced
    }

    /// Whether the payload currently exists on disk.
    pub fn is_materialized(&self) -> bool {
        self.path.exists()
    }

    pub(crate) fn tags_mut(&mut self) -> &mut TagSet {
        &mut self.tags
    }

    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    pub(crate) fn set_install_dir(&mut self, install_dir: PathBuf) {
        self.install_dir = install_dir;
    }

    pub(crate) fn set_added(&mut self, at: DateTime<Utc>) {
        self.added = Some(at);
    }

    pub(crate) fn mark_synced(&mut self, at: DateTime<Utc>) {
        if self.installed.is_none() {
            self.installed = Some(at);
        }
        self.last_synced = Some(at);
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) {}", self.name, self.tool_type(), self.path.display())
    }
}

/// Derives a tool name from a repository URL.
///
/// Handles `https://host/owner/repo(.git)`, `ssh://...` and scp-like
/// `git@host:owner/repo.git` forms.
pub fn derive_name_from_url(url: &str) -> Result<String, RegistryError> {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(|c| c == '/' || c == ':')
        .next()
        .unwrap_or_default();
    let name = last.strip_suffix(".git").unwrap_or(last);
    validate_name(name)?;
    Ok(name.to_string())
}

pub(crate) fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
        return Err(RegistryError::InvalidTool(format!("'{name}' is not a valid tool name")));
    }
    Ok(())
}

/// On-disk shape of a tool, shared by the config store and bundle import.
#[derive(Debug, Serialize, Deserialize)]
struct ToolRecord {
    name: String,
    #[serde(rename = "type")]
    tool_type: ToolType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
    path: PathBuf,
    install_dir: PathBuf,
    #[serde(default)]
    tags: TagSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    added: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    installed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_synced: Option<DateTime<Utc>>,
}

impl TryFrom<ToolRecord> for Tool {
    type Error = RegistryError;

    fn try_from(record: ToolRecord) -> Result<Self, Self::Error> {
        validate_name(&record.name)?;
        let kind = match (record.tool_type, record.source_url) {
            (ToolType::Git, Some(url)) if !url.trim().is_empty() => ToolKind::Git { source_url: url },
            (ToolType::Git, _) => {
                return Err(RegistryError::InvalidTool(format!(
                    "git tool '{}' has no source_url",
                    record.name
                )));
            }
            (ToolType::Local, None) => ToolKind::Local,
            (ToolType::Local, Some(_)) => {
                return Err(RegistryError::InvalidTool(format!(
                    "local tool '{}' cannot have a source_url",
                    record.name
                )));
            }
        };
        Ok(Tool {
            name: record.name,
            kind,
            path: record.path,
            install_dir: record.install_dir,
            tags: record.tags,
            added: record.added,
            installed: record.installed,
            last_synced: record.last_synced,
        })
    }
}

impl From<Tool> for ToolRecord {
    fn from(tool: Tool) -> Self {
        let tool_type = tool.tool_type();
        let source_url = match tool.kind {
            ToolKind::Git { source_url } => Some(source_url),
            ToolKind::Local => None,
        };
        ToolRecord {
            name: tool.name,
            tool_type,
            source_url,
            path: tool.path,
            install_dir: tool.install_dir,
            tags: tool.tags,
            added: tool.added,
            installed: tool.installed,
            last_synced: tool.last_synced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_normalized() {
        let tags = TagSet::parse(" Win, privesc ,,WIN, web app");
        let collected: Vec<&str> = tags.iter().collect();
        assert_eq!(collected, vec!["privesc", "webapp", "win"]);
        assert!(tags.contains("WIN "));
    }

    #[test]
    fn test_tag_set_deserializes_normalized() {
        let tags: TagSet = serde_json::from_str(r#"["A", "a", " b "]"#).unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("a"));
        assert!(tags.contains("b"));
    }

    #[test]
    fn test_derive_name_from_url() {
        assert_eq!(derive_name_from_url("https://github.com/acme/foo.git").unwrap(), "foo");
        assert_eq!(derive_name_from_url("https://github.com/acme/foo/").unwrap(), "foo");
        assert_eq!(derive_name_from_url("git@github.com:acme/bar.git").unwrap(), "bar");
        assert!(derive_name_from_url("").is_err());
        assert!(derive_name_from_url("https://example.com/.git").is_err());
    }

    #[test]
    fn test_git_tool_lives_under_install_dir() {
        let tool = Tool::git("https://example.com/acme/foo.git", "/opt/tools", None).unwrap();
        assert_eq!(tool.name(), "foo");
        assert_eq!(tool.tool_type(), ToolType::Git);
        assert_eq!(tool.path(), Path::new("/opt/tools/foo"));
        assert_eq!(tool.source_url(), Some("https://example.com/acme/foo.git"));
    }

    #[test]
    fn test_git_tool_requires_url() {
        assert!(Tool::git("   ", "/opt/tools", Some("foo")).is_err());
    }

    #[test]
    fn test_local_tool_references_path() {
        let tool = Tool::local("/home/user/bin/script.sh", None).unwrap();
        assert_eq!(tool.name(), "script.sh");
        assert_eq!(tool.install_dir(), Path::new("/home/user/bin"));
        assert_eq!(tool.source_url(), None);
    }

    #[test]
    fn test_record_without_url_is_rejected() {
        let json = r#"{"name":"foo","type":"git","path":"/a/foo","install_dir":"/a"}"#;
        assert!(serde_json::from_str::<Tool>(json).is_err());
    }

    #[test]
    fn test_record_round_trips_through_serde() {
        let tool = Tool::git("https://example.com/acme/foo.git", "/opt/tools", None)
            .unwrap()
            .with_tags(TagSet::parse("win,privesc"));
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains(r#""type":"git""#));
        let back: Tool = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tool);
    }

    #[test]
    fn test_mark_synced_sets_install_once() {
        let mut tool = Tool::local("/tmp/x", None).unwrap();
        let first = Utc::now();
        tool.mark_synced(first);
        let later = first + chrono::Duration::seconds(5);
        tool.mark_synced(later);
        assert_eq!(tool.installed(), Some(first));
        assert_eq!(tool.last_synced(), Some(later));
    }
}
