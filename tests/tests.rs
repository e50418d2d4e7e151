use std::path::Path;
use tempfile::TempDir;
use tman::*;
use tman::config::ConfigStore;
use tman::transfer::{export, import, ExportOptions};

fn setup_store() -> (TempDir, ConfigStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = ConfigStore::new(temp_dir.path().join("config.toml"));
    let mut registry = store.load().unwrap();
    let foo = Tool::git("https://example.com/acme/foo.git", temp_dir.path().join("tools"), None)
        .unwrap()
        .with_tags(TagSet::parse("win,privesc"));
    let bar = Tool::local(temp_dir.path().join("bar"), None)
        .unwrap()
        .with_tags(TagSet::parse("work"));
    registry.add(foo).unwrap();
    registry.add(bar).unwrap();
    store.save(&registry).unwrap();
    (temp_dir, store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup() {
        let (dir, store) = setup_store();
        assert!(dir.path().join("config.toml").exists());
        let registry = store.load_existing().unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_find_then_delete() {
        let (_dir, store) = setup_store();
        let mut registry = store.load().unwrap();

        let query = FindQuery::new()
            .with_tags(TagSet::parse("win"))
            .with_types([ToolType::Git]);
        let names: Vec<&str> = registry.find(&query).map(|t| t.name()).collect();
        assert_eq!(names, vec!["foo"]);

        let report = registry.delete(["bar", "baz"], false);
        assert_eq!(report.removed, vec!["bar"]);
        assert_eq!(report.not_found, vec!["baz"]);
        store.save(&registry).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("foo").is_some());
    }

    #[test]
    fn test_uniqueness_under_repeated_adds() {
        let (_dir, store) = setup_store();
        let mut registry = store.load().unwrap();
        for _ in 0..3 {
            let again = Tool::git("https://example.com/acme/foo.git", "/elsewhere", None).unwrap();
            assert!(matches!(registry.add(again), Err(RegistryError::DuplicateName(_))));
        }
        assert_eq!(registry.len(), 2);
        let mut paths: Vec<&Path> = registry.iter().map(|t| t.path()).collect();
        paths.dedup();
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_bundle_round_trip_between_stores() {
        let (dir, store) = setup_store();
        let registry = store.load().unwrap();
        let bundle = dir.path().join("bundle.zip");
        export(&registry, &FindQuery::new(), &bundle, ExportOptions::default()).unwrap();

        let other_dir = TempDir::new().unwrap();
        let other = ConfigStore::new(other_dir.path().join("config.toml"));
        let mut fresh = other.load().unwrap();
        let report = import(&mut fresh, &bundle, &FindQuery::new()).unwrap();
        assert_eq!(report.imported, vec!["bar", "foo"]);
        other.save(&fresh).unwrap();

        let reloaded = other.load_existing().unwrap();
        let foo = reloaded.get("foo").unwrap();
        assert_eq!(foo.tags(), registry.get("foo").unwrap().tags());
        assert_eq!(foo.path(), other_dir.path().join("tools").join("foo"));
    }
}
