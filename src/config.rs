//! The persisted configuration store.
//!
//! One TOML document holds the global [`Settings`] and every tracked tool.
//! Writes go to a temporary file in the same directory which is then renamed
//! over the store, so a reader sees either the old or the new document and
//! never a partial one.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use crate::error::StoreError;
use crate::global::utils::{get_default_config_file, get_default_install_dir, get_default_log_file};
use crate::lock::StoreLock;
use crate::registry::Registry;
use crate::schedule::Schedule;
use crate::tool::Tool;

pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 300;

/// Global settings, owned by the [`Registry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Base directory that git tools are cloned into.
    pub default_install_dir: PathBuf,
    /// Install newly added git tools right away.
    #[serde(default)]
    pub auto_install: bool,
    /// Deadline for a single git invocation.
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,
    /// Worker threads used by install and update.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    #[serde(default)]
    pub schedule: Schedule,
}

fn default_sync_timeout() -> u64 {
    DEFAULT_SYNC_TIMEOUT_SECS
}

fn default_jobs() -> usize {
    1
}

impl Settings {
    pub fn new<P: Into<PathBuf>>(default_install_dir: P) -> Self {
        Settings {
            default_install_dir: default_install_dir.into(),
            auto_install: false,
            sync_timeout_secs: DEFAULT_SYNC_TIMEOUT_SECS,
            jobs: default_jobs(),
            schedule: Schedule::default(),
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

#[derive(Deserialize)]
struct StoreDocument {
    settings: Settings,
    #[serde(default)]
    tools: BTreeMap<String, Tool>,
}

#[derive(Serialize)]
struct StoreDocumentRef<'a> {
    settings: &'a Settings,
    tools: BTreeMap<&'a str, &'a Tool>,
}

/// Location of the store plus the defaults used when it does not exist yet.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    default_install_dir: PathBuf,
    at_default_location: bool,
}

impl ConfigStore {
    /// A store at an explicit path. Fresh stores install into `<dir>/tools`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = crate::util::absolutize(&path.into());
        let default_install_dir = path
            .parent()
            .map(|dir| dir.join("tools"))
            .unwrap_or_else(|| PathBuf::from("tools"));
        ConfigStore {
            path,
            default_install_dir,
            at_default_location: false,
        }
    }

    /// The store in the platform config directory.
    pub fn at_default_location() -> Result<Self> {
        let mut store = ConfigStore::new(get_default_config_file()?);
        store.at_default_location = true;
        Ok(store.with_default_install_dir(get_default_install_dir()?))
    }

    pub fn is_default_location(&self) -> bool {
        self.at_default_location
    }

    /// Log file of the scheduled update: the platform data directory for the
    /// default store, next to the store otherwise.
    pub fn update_log_file(&self) -> PathBuf {
        let beside_store = || {
            self.path
                .parent()
                .map(|dir| dir.join("update.log"))
                .unwrap_or_else(|| PathBuf::from("update.log"))
        };
        if self.at_default_location {
            get_default_log_file().unwrap_or_else(|_| beside_store())
        } else {
            beside_store()
        }
    }

    /// Uses `path` when given, else the platform default.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(ConfigStore::new(path)),
            None => ConfigStore::at_default_location(),
        }
    }

    pub fn with_default_install_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.default_install_dir = dir.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn default_settings(&self) -> Settings {
        Settings::new(self.default_install_dir.clone())
    }

    /// Loads the registry, or an empty one with default settings if the store
    /// does not exist yet.
    pub fn load(&self) -> Result<Registry, StoreError> {
        match self.load_existing() {
            Err(StoreError::StoreMissing(_)) => {
                debug!("No store at {}, starting empty", self.path.display());
                Ok(Registry::new(self.default_settings()))
            }
            other => other,
        }
    }

    /// Loads the registry, failing with [`StoreError::StoreMissing`] if there
    /// is no store.
    pub fn load_existing(&self) -> Result<Registry, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::StoreMissing(self.path.clone()));
            }
            Err(e) => return Err(self.corrupt(e)),
        };
        let document: StoreDocument = toml::from_str(&content).map_err(|e| self.corrupt(e))?;

        for (key, tool) in &document.tools {
            if key != tool.name() {
                return Err(self.corrupt(format!(
                    "entry '{}' holds a tool named '{}'",
                    key,
                    tool.name()
                )));
            }
        }
        let registry = Registry::from_parts(document.settings, document.tools.into_values())
            .map_err(|e| self.corrupt(e))?;
        debug!("Loaded {} tools from {}", registry.len(), self.path.display());
        Ok(registry)
    }

    /// Atomically replaces the store with the contents of `registry`.
    pub fn save(&self, registry: &Registry) -> Result<(), StoreError> {
        let document = StoreDocumentRef {
            settings: registry.settings(),
            tools: registry.iter().map(|tool| (tool.name(), tool)).collect(),
        };
        let content = toml::to_string_pretty(&document).map_err(|e| StoreError::StoreWriteError {
            path: self.path.clone(),
            source: std::io::Error::other(e),
        })?;

        let write_error = |source| StoreError::StoreWriteError {
            path: self.path.clone(),
            source,
        };
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(write_error)?;

        let mut temp = NamedTempFile::new_in(dir).map_err(write_error)?;
        temp.write_all(content.as_bytes()).map_err(write_error)?;
        temp.as_file().sync_all().map_err(write_error)?;
        temp.persist(&self.path).map_err(|e| write_error(e.error))?;

        info!("Saved {} tools to {}", registry.len(), self.path.display());
        Ok(())
    }

    /// Takes the writer lock for this store.
    pub fn lock(&self) -> Result<StoreLock, StoreError> {
        StoreLock::acquire(&self.path)
    }

    fn corrupt<E: ToString>(&self, reason: E) -> StoreError {
        StoreError::StoreCorrupt {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::TagSet;
    use tempfile::tempdir;

    fn populated(store: &ConfigStore) -> Registry {
        let mut registry = Registry::new(store.default_settings());
        let foo = Tool::git("https://example.com/acme/foo.git", "/opt/tools", None)
            .unwrap()
            .with_tags(TagSet::parse("win,privesc"));
        registry.add(foo).unwrap();
        registry.add(Tool::local("/home/user/bar", None).unwrap()).unwrap();
        registry
    }

    #[test]
    fn test_missing_store_loads_empty() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.toml"));
        let registry = store.load().unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.settings().default_install_dir, dir.path().join("tools"));
        assert!(matches!(store.load_existing(), Err(StoreError::StoreMissing(_))));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.toml"));
        let mut registry = populated(&store);
        registry.settings_mut().auto_install = true;
        registry.settings_mut().schedule.set("0 3 * * *".parse().unwrap());
        store.save(&registry).unwrap();

        let loaded = store.load_existing().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("foo"), registry.get("foo"));
        assert_eq!(loaded.settings(), registry.settings());

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("[tools.foo]"));
        assert!(text.contains("frequency = \"0 3 * * *\""));
    }

    #[test]
    fn test_corrupt_store_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[settings\nbroken").unwrap();
        let store = ConfigStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::StoreCorrupt { .. })));
    }

    #[test]
    fn test_invariants_are_checked_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let content = r#"
[settings]
default_install_dir = "/opt/tools"

[tools.foo]
name = "foo"
type = "local"
path = "/a/foo"
install_dir = "/a"

[tools.bar]
name = "bar"
type = "local"
path = "/a/foo"
install_dir = "/a"
"#;
        std::fs::write(&path, content).unwrap();
        let store = ConfigStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::StoreCorrupt { .. })));

        let mismatched = r#"
[settings]
default_install_dir = "/opt/tools"

[tools.baz]
name = "bar"
type = "local"
path = "/a/bar"
install_dir = "/a"
"#;
        std::fs::write(&path, mismatched).unwrap();
        assert!(matches!(store.load(), Err(StoreError::StoreCorrupt { .. })));
    }

    #[test]
    fn test_abandoned_write_does_not_affect_load() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.toml"));
        let registry = populated(&store);
        store.save(&registry).unwrap();

        // a writer that died before the rename
        let mut temp = NamedTempFile::new_in(dir.path()).unwrap();
        temp.write_all(b"[settings]\ndefault_install_dir = \"/half").unwrap();
        let _leftover = temp.into_temp_path().keep().unwrap();

        let loaded = store.load_existing().unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_defaults_fill_missing_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[settings]\ndefault_install_dir = \"/opt/tools\"\n").unwrap();
        let registry = ConfigStore::new(&path).load().unwrap();
        assert_eq!(registry.settings().jobs, 1);
        assert_eq!(registry.settings().sync_timeout(), Duration::from_secs(300));
        assert!(!registry.settings().auto_install);
        assert!(registry.is_empty());
    }
}
