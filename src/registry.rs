use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use crate::config::Settings;
use crate::error::RegistryError;
use crate::tool::{TagSet, Tool, ToolKind, ToolType};
use crate::util::{absolutize, remove_path};

/// How a tag filter is matched against a tool's tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MatchMode {
    /// The tool has at least one of the requested tags.
    #[default]
    Any,
    /// The tool has every requested tag.
    All,
}

/// Filter used by [`Registry::find`], export and import.
///
/// Every filter that is `None` places no constraint on its axis.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub tags: Option<TagSet>,
    pub types: Option<BTreeSet<ToolType>>,
    pub mode: MatchMode,
    /// Case-insensitive substring of the tool name.
    pub name: Option<String>,
    /// Only tools synced at or after this instant.
    pub synced_since: Option<DateTime<Utc>>,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_types<I: IntoIterator<Item = ToolType>>(mut self, types: I) -> Self {
        self.types = Some(types.into_iter().collect());
        self
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn matches(&self, tool: &Tool) -> bool {
        self.matches_parts(tool.name(), tool.tool_type(), tool.tags(), tool.last_synced())
    }

    /// Matches raw attributes, for records that are not (yet) tools.
    pub fn matches_parts(
        &self,
        name: &str,
        tool_type: ToolType,
        tags: &TagSet,
        last_synced: Option<DateTime<Utc>>,
    ) -> bool {
        if let Some(wanted) = self.tags.as_ref().filter(|t| !t.is_empty()) {
            let ok = match self.mode {
                MatchMode::Any => tags.intersects(wanted),
                MatchMode::All => tags.is_superset(wanted),
            };
            if !ok {
                return false;
            }
        }
        if let Some(types) = self.types.as_ref().filter(|t| !t.is_empty()) {
            if !types.contains(&tool_type) {
                return false;
            }
        }
        if let Some(needle) = &self.name {
            if !name.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if let Some(since) = self.synced_since {
            if last_synced.is_none_or(|at| at < since) {
                return false;
            }
        }
        true
    }
}

/// A change to a tool's tag set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOp {
    Add(TagSet),
    Remove(TagSet),
    Replace(TagSet),
    Rename { from: String, to: String },
}

/// Everything `modify` may change on a tool, validated and applied together.
#[derive(Debug, Clone, Default)]
pub struct Modification {
    pub tags: Vec<TagOp>,
    pub path: Option<PathBuf>,
    pub install_dir: Option<PathBuf>,
}

/// Outcome of [`Registry::delete`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub removed: Vec<String>,
    pub not_found: Vec<String>,
    /// Tools that were removed from the registry but whose payload could not be deleted.
    pub purge_failed: Vec<(String, String)>,
}

/// The in-memory index of tracked tools plus the global settings.
///
/// Tools are keyed by name, so iteration and [`find`](Registry::find) are
/// always in ascending name order.
#[derive(Debug, Clone)]
pub struct Registry {
    settings: Settings,
    tools: BTreeMap<String, Tool>,
}

impl Registry {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            tools: BTreeMap::new(),
        }
    }

    /// Rebuilds a registry from stored tools, re-checking every invariant.
    pub fn from_parts<I: IntoIterator<Item = Tool>>(
        settings: Settings,
        tools: I,
    ) -> Result<Self, RegistryError> {
        let mut registry = Registry::new(settings);
        for tool in tools {
            registry.check_unique(&tool)?;
            registry.tools.insert(tool.name().to_string(), tool);
        }
        Ok(registry)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Adds a tool.
    ///
    /// # Errors
    /// [`RegistryError::DuplicateName`] or [`RegistryError::DuplicatePath`] if
    /// the tool collides with a tracked one; the registry is left unchanged.
    pub fn add(&mut self, mut tool: Tool) -> Result<&Tool, RegistryError> {
        self.check_unique(&tool)?;
        if tool.added().is_none() {
            tool.set_added(Utc::now());
        }
        let name = tool.name().to_string();
        info!("Tracking {}", tool);
        Ok(self.tools.entry(name).or_insert(tool))
    }

    /// Removes a tool without touching its payload.
    pub fn remove(&mut self, name: &str) -> Option<Tool> {
        self.tools.remove(name)
    }

    /// Removes every named tool, optionally deleting payloads from disk.
    ///
    /// Each name is resolved independently; unknown names are reported in
    /// `not_found` and never abort the rest.
    pub fn delete<I, S>(&mut self, names: I, purge_files: bool) -> DeleteReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: BTreeSet<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        let mut report = DeleteReport::default();
        for name in names {
            let Some(tool) = self.tools.remove(&name) else {
                report.not_found.push(name);
                continue;
            };
            if purge_files && tool.path().exists() {
                if let Err(e) = remove_path(tool.path()) {
                    warn!("Could not delete {}: {}", tool.path().display(), e);
                    report.purge_failed.push((name.clone(), e.to_string()));
                } else {
                    debug!("Deleted {}", tool.path().display());
                }
            }
            report.removed.push(name);
        }
        report
    }

    /// Applies a [`Modification`] to a tool.
    ///
    /// All changes are validated against a copy first; on error nothing is
    /// changed.
    pub fn modify(&mut self, name: &str, change: &Modification) -> Result<&Tool, RegistryError> {
        let current = self
            .tools
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let mut updated = current.clone();

        for op in &change.tags {
            apply_tag_op(&mut updated, op)?;
        }

        if let Some(install_dir) = &change.install_dir {
            let install_dir = absolutize(install_dir);
            if matches!(updated.kind(), ToolKind::Git { .. }) && change.path.is_none() {
                updated.set_path(install_dir.join(updated.name()));
            }
            updated.set_install_dir(install_dir);
        }
        if let Some(path) = &change.path {
            updated.set_path(absolutize(path));
        }

        if updated.path() != current.path() {
            self.check_path_free(updated.path(), Some(name))?;
        }

        debug!("Modified {}", updated);
        let slot = self
            .tools
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        *slot = updated;
        Ok(slot)
    }

    /// Lazily yields the tools matching `query`, ordered by name.
    ///
    /// The iterator borrows the registry; call `find` again to restart.
    pub fn find<'a>(&'a self, query: &'a FindQuery) -> impl Iterator<Item = &'a Tool> + 'a {
        self.tools.values().filter(move |tool| query.matches(tool))
    }

    /// Records a successful install or update.
    pub fn record_sync(&mut self, name: &str, at: DateTime<Utc>) -> bool {
        match self.tools.get_mut(name) {
            Some(tool) => {
                tool.mark_synced(at);
                true
            }
            None => false,
        }
    }

    /// Checks that `tool` could be added without a name or path collision.
    pub fn check_unique(&self, tool: &Tool) -> Result<(), RegistryError> {
        if self.tools.contains_key(tool.name()) {
            return Err(RegistryError::DuplicateName(tool.name().to_string()));
        }
        self.check_path_free(tool.path(), None)
    }

    fn check_path_free(&self, path: &Path, ignore: Option<&str>) -> Result<(), RegistryError> {
        let path = absolutize(path);
        let owner = self
            .tools
            .values()
            .filter(|t| Some(t.name()) != ignore)
            .find(|t| absolutize(t.path()) == path);
        match owner {
            Some(owner) => Err(RegistryError::DuplicatePath {
                path,
                owner: owner.name().to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn apply_tag_op(tool: &mut Tool, op: &TagOp) -> Result<(), RegistryError> {
    match op {
        TagOp::Add(tags) => {
            for tag in tags.iter() {
                tool.tags_mut().insert(tag);
            }
        }
        TagOp::Remove(tags) => {
            for tag in tags.iter() {
                tool.tags_mut().remove(tag);
            }
        }
        TagOp::Replace(tags) => {
            *tool.tags_mut() = tags.clone();
        }
        TagOp::Rename { from, to } => {
            if !tool.tags().contains(from) {
                return Err(RegistryError::TagMissing {
                    tool: tool.name().to_string(),
                    tag: from.clone(),
                });
            }
            if tool.tags().contains(to) {
                return Err(RegistryError::TagExists {
                    tool: tool.name().to_string(),
                    tag: to.clone(),
                });
            }
            let name = tool.name().to_string();
            let tags = tool.tags_mut();
            tags.remove(from);
            if !tags.insert(to) {
                return Err(RegistryError::InvalidTool(format!(
                    "'{to}' is not a valid tag for '{name}'"
                )));
            }
        }
    }
    Ok(())
}
