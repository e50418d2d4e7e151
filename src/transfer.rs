//! Export and import of tool bundles.
//!
//! A bundle is a zip archive with a `manifest.json` describing the exported
//! tools and, optionally, their payloads under `payloads/<name>`. Every
//! payload carries a sha256 digest over its entry names and contents, which
//! is verified before anything is imported.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};
use crate::error::{RegistryError, TransferError};
use crate::registry::{FindQuery, Registry};
use crate::tool::{validate_name, TagSet, Tool, ToolType};
use crate::util::{absolutize, remove_path};

/// Version of the bundle layout written by this build.
pub const FORMAT_VERSION: &str = "1.0.0";
const MANIFEST_NAME: &str = "manifest.json";
const PAYLOAD_DIR: &str = "payloads";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: String,
    pub exported_at: DateTime<Utc>,
    pub tools: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Location on the exporting machine, local tools only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<PayloadInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadInfo {
    pub kind: PayloadKind,
    pub sha256: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    pub include_payloads: bool,
    /// Replace an existing bundle at the destination.
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub exported: Vec<String>,
    /// Tools exported without a payload because nothing was on disk.
    pub missing_payloads: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: Vec<String>,
    pub skipped_duplicate: Vec<String>,
    pub errors: Vec<(String, String)>,
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> TransferError + '_ {
    move |source| TransferError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn zip_error(path: &Path) -> impl Fn(zip::result::ZipError) -> TransferError + '_ {
    move |e| TransferError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::other(e),
    }
}

fn corrupt<E: ToString>(path: &Path, reason: E) -> TransferError {
    TransferError::BundleCorrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Writes the tools matching `query` to a bundle at `destination`.
///
/// The bundle is written to a temporary file next to the destination and
/// renamed into place once complete.
pub fn export(
    registry: &Registry,
    query: &FindQuery,
    destination: &Path,
    options: ExportOptions,
) -> Result<ExportReport, TransferError> {
    let destination = absolutize(destination);
    if destination.exists() && !options.overwrite {
        return Err(TransferError::BundleExists(destination));
    }
    let dir = destination.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_error(dir))?;

    let temp = NamedTempFile::new_in(dir).map_err(io_error(dir))?;
    let mut zip = ZipWriter::new(temp);
    let file_options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut report = ExportReport::default();
    let mut manifest = Manifest {
        format_version: FORMAT_VERSION.to_string(),
        exported_at: Utc::now(),
        tools: Vec::new(),
    };

    for tool in registry.find(query) {
        let mut entry = ManifestEntry {
            name: tool.name().to_string(),
            tool_type: tool.tool_type(),
            tags: tool.tags().clone(),
            source_url: tool.source_url().map(str::to_string),
            path: match tool.tool_type() {
                ToolType::Local => Some(tool.path().to_path_buf()),
                ToolType::Git => None,
            },
            payload: None,
        };
        if options.include_payloads {
            if tool.path().exists() {
                entry.payload = Some(write_payload(&mut zip, tool, file_options)?);
            } else {
                warn!("No payload for {} at {}", tool.name(), tool.path().display());
                report.missing_payloads.push(tool.name().to_string());
            }
        }
        debug!("Exporting {}", tool);
        report.exported.push(entry.name.clone());
        manifest.tools.push(entry);
    }

    zip.start_file(MANIFEST_NAME, file_options)
        .map_err(zip_error(&destination))?;
    let json = serde_json::to_vec_pretty(&manifest).map_err(|e| TransferError::Io {
        path: destination.clone(),
        source: std::io::Error::other(e),
    })?;
    zip.write_all(&json).map_err(io_error(&destination))?;

    let temp = zip.finish().map_err(zip_error(&destination))?;
    temp.as_file().sync_all().map_err(io_error(&destination))?;
    temp.persist(&destination)
        .map_err(|e| io_error(&destination)(e.error))?;

    info!("Exported {} tools to {}", report.exported.len(), destination.display());
    Ok(report)
}

/// One archive entry of a payload, in the order it is written and hashed.
struct PayloadItem {
    entry_name: String,
    source: PathBuf,
    is_dir: bool,
}

fn write_payload<W: Write + std::io::Seek>(
    zip: &mut ZipWriter<W>,
    tool: &Tool,
    options: SimpleFileOptions,
) -> Result<PayloadInfo, TransferError> {
    let root = tool.path();
    let base = format!("{PAYLOAD_DIR}/{}", tool.name());
    let kind = if root.is_dir() { PayloadKind::Dir } else { PayloadKind::File };

    let mut items = Vec::new();
    match kind {
        PayloadKind::File => items.push(PayloadItem {
            entry_name: base,
            source: root.to_path_buf(),
            is_dir: false,
        }),
        PayloadKind::Dir => {
            for entry in WalkDir::new(root) {
                let entry = entry.map_err(|e| TransferError::Io {
                    path: root.to_path_buf(),
                    source: e.into(),
                })?;
                if entry.path_is_symlink() {
                    debug!("Skipping symlink {}", entry.path().display());
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(root)
                    .map_err(|e| corrupt(root, e))?;
                let relative: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect();
                let is_dir = entry.file_type().is_dir();
                let mut entry_name = base.clone();
                for part in &relative {
                    entry_name.push('/');
                    entry_name.push_str(part);
                }
                if is_dir {
                    entry_name.push('/');
                }
                items.push(PayloadItem {
                    entry_name,
                    source: entry.path().to_path_buf(),
                    is_dir,
                });
            }
        }
    }
    items.sort_by(|a, b| a.entry_name.cmp(&b.entry_name));

    let mut hasher = Sha256::new();
    for item in &items {
        hasher.update(item.entry_name.as_bytes());
        hasher.update([0u8]);
        let options = options.unix_permissions(mode_of(&item.source));
        if item.is_dir {
            zip.add_directory(item.entry_name.as_str(), options)
                .map_err(zip_error(&item.source))?;
            continue;
        }
        zip.start_file(item.entry_name.as_str(), options)
            .map_err(zip_error(&item.source))?;
        let mut file = File::open(&item.source).map_err(io_error(&item.source))?;
        let mut buffer = [0u8; 8192];
        loop {
            let read = file.read(&mut buffer).map_err(io_error(&item.source))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            zip.write_all(&buffer[..read]).map_err(io_error(&item.source))?;
        }
    }

    Ok(PayloadInfo {
        kind,
        sha256: hex::encode(hasher.finalize()),
    })
}

#[cfg(unix)]
fn mode_of(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o7777)
        .unwrap_or(0o644)
}

#[cfg(not(unix))]
fn mode_of(path: &Path) -> u32 {
    if path.is_dir() { 0o755 } else { 0o644 }
}

/// Archive entry names belonging to the payload of `name`, sorted.
fn payload_entries(archive: &ZipArchive<File>, name: &str) -> Vec<String> {
    let file_name = format!("{PAYLOAD_DIR}/{name}");
    let dir_prefix = format!("{file_name}/");
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| *n == file_name || n.starts_with(&dir_prefix))
        .map(str::to_string)
        .collect();
    names.sort();
    names
}

/// Opens and fully verifies a bundle: manifest shape, format version and
/// every payload digest.
fn read_bundle(source: &Path) -> Result<(Manifest, ZipArchive<File>), TransferError> {
    let file = File::open(source).map_err(io_error(source))?;
    let mut archive = ZipArchive::new(file).map_err(|e| corrupt(source, e))?;

    let manifest: Manifest = {
        let entry = archive
            .by_name(MANIFEST_NAME)
            .map_err(|_| corrupt(source, "no manifest.json"))?;
        serde_json::from_reader(entry).map_err(|e| corrupt(source, e))?
    };

    let version = Version::parse(&manifest.format_version).map_err(|e| corrupt(source, e))?;
    let supported = Version::parse(FORMAT_VERSION).map_err(|e| corrupt(source, e))?;
    if version.major != supported.major {
        return Err(corrupt(
            source,
            format!("unsupported format version {version}, expected {}.x", supported.major),
        ));
    }

    let mut seen = BTreeSet::new();
    for entry in &manifest.tools {
        validate_name(&entry.name).map_err(|e| corrupt(source, e))?;
        if !seen.insert(entry.name.as_str()) {
            return Err(corrupt(source, format!("tool '{}' listed twice", entry.name)));
        }
        if entry.tool_type == ToolType::Git && entry.source_url.as_deref().is_none_or(|u| u.trim().is_empty()) {
            return Err(corrupt(source, format!("git tool '{}' has no source_url", entry.name)));
        }
        if let Some(payload) = &entry.payload {
            verify_payload(&mut archive, source, &entry.name, payload)?;
        }
    }
    Ok((manifest, archive))
}

fn verify_payload(
    archive: &mut ZipArchive<File>,
    source: &Path,
    name: &str,
    payload: &PayloadInfo,
) -> Result<(), TransferError> {
    let names = payload_entries(archive, name);
    let single = format!("{PAYLOAD_DIR}/{name}");
    let layout_ok = match payload.kind {
        PayloadKind::File => names == [single],
        PayloadKind::Dir => !names.is_empty() && !names.contains(&single),
    };
    if !layout_ok {
        return Err(corrupt(source, format!("payload of '{name}' is missing or malformed")));
    }

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    for entry_name in &names {
        let mut entry = archive.by_name(entry_name).map_err(|e| corrupt(source, e))?;
        hasher.update(entry_name.as_bytes());
        hasher.update([0u8]);
        if entry.is_dir() {
            continue;
        }
        loop {
            let read = entry.read(&mut buffer).map_err(|e| corrupt(source, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
    }
    let digest = hex::encode(hasher.finalize());
    if digest != payload.sha256 {
        return Err(corrupt(source, format!("payload of '{name}' fails its checksum")));
    }
    Ok(())
}

/// Imports the tools of a bundle that match `query`.
///
/// The bundle is verified completely before the registry is touched. Tools
/// whose name or path is already tracked are skipped, never overwritten.
pub fn import(
    registry: &mut Registry,
    source: &Path,
    query: &FindQuery,
) -> Result<ImportReport, TransferError> {
    let source = absolutize(source);
    let (manifest, mut archive) = read_bundle(&source)?;
    debug!(
        "Bundle {} exported at {} holds {} tools",
        source.display(),
        manifest.exported_at,
        manifest.tools.len()
    );

    let install_dir = registry.settings().default_install_dir.clone();
    let mut report = ImportReport::default();

    for entry in &manifest.tools {
        if !query.matches_parts(&entry.name, entry.tool_type, &entry.tags, None) {
            continue;
        }
        let tool = match incoming_tool(entry, &install_dir) {
            Ok(tool) => tool,
            Err(e) => {
                report.errors.push((entry.name.clone(), e.to_string()));
                continue;
            }
        };
        match registry.check_unique(&tool) {
            Err(RegistryError::DuplicateName(_)) | Err(RegistryError::DuplicatePath { .. }) => {
                debug!("Skipping {}: already tracked", entry.name);
                report.skipped_duplicate.push(entry.name.clone());
                continue;
            }
            Err(e) => {
                report.errors.push((entry.name.clone(), e.to_string()));
                continue;
            }
            Ok(()) => {}
        }

        if entry.payload.is_some() {
            if tool.path().exists() {
                report.errors.push((
                    entry.name.clone(),
                    format!("{} already exists", tool.path().display()),
                ));
                continue;
            }
            if let Err(e) = extract_payload(&mut archive, &entry.name, &install_dir) {
                if tool.path().exists() {
                    if let Err(cleanup) = remove_path(tool.path()) {
                        warn!("Could not remove partial payload {}: {}", tool.path().display(), cleanup);
                    }
                }
                report.errors.push((entry.name.clone(), e.to_string()));
                continue;
            }
        }

        match registry.add(tool) {
            Ok(_) => report.imported.push(entry.name.clone()),
            Err(e) => report.errors.push((entry.name.clone(), e.to_string())),
        }
    }

    info!(
        "Imported {} tools from {} ({} skipped, {} errors)",
        report.imported.len(),
        source.display(),
        report.skipped_duplicate.len(),
        report.errors.len()
    );
    Ok(report)
}

fn incoming_tool(entry: &ManifestEntry, install_dir: &Path) -> Result<Tool, RegistryError> {
    let tool = match entry.tool_type {
        ToolType::Git => {
            let url = entry.source_url.as_deref().unwrap_or_default();
            Tool::git(url, install_dir, Some(&entry.name))?
        }
        ToolType::Local if entry.payload.is_some() => {
            Tool::local(install_dir.join(&entry.name), Some(&entry.name))?
        }
        ToolType::Local => {
            let path = entry.path.as_ref().ok_or_else(|| {
                RegistryError::InvalidTool(format!("local tool '{}' has no path", entry.name))
            })?;
            Tool::local(path, Some(&entry.name))?
        }
    };
    Ok(tool.with_tags(entry.tags.clone()))
}

fn extract_payload(
    archive: &mut ZipArchive<File>,
    name: &str,
    install_dir: &Path,
) -> Result<(), TransferError> {
    // directory modes are applied last so read-only directories can still be filled
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();
    for entry_name in payload_entries(archive, name) {
        let mut entry = archive.by_name(&entry_name).map_err(zip_error(install_dir))?;
        let Some(enclosed) = entry.enclosed_name() else {
            warn!("Skipping unsafe entry {}", entry_name);
            continue;
        };
        let Ok(relative) = enclosed.strip_prefix(PAYLOAD_DIR) else {
            continue;
        };
        let target = install_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(io_error(&target))?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(io_error(parent))?;
            }
            let mut out = File::create(&target).map_err(io_error(&target))?;
            std::io::copy(&mut entry, &mut out).map_err(io_error(&target))?;
        }

        if let Some(mode) = entry.unix_mode() {
            if entry.is_dir() {
                dir_modes.push((target, mode & 0o7777));
            } else {
                set_mode(&target, mode & 0o7777)?;
            }
        }
    }

    dir_modes.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
    for (path, mode) in &dir_modes {
        set_mode(path, *mode)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), TransferError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(io_error(path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), TransferError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::registry::MatchMode;
    use tempfile::tempdir;

    fn sample(install_dir: &Path) -> Registry {
        let mut registry = Registry::new(Settings::new(install_dir));
        let foo = Tool::git("https://example.com/acme/foo.git", install_dir, None)
            .unwrap()
            .with_tags(TagSet::parse("win,privesc"));
        let bar = Tool::local("/home/user/bar", None)
            .unwrap()
            .with_tags(TagSet::parse("work"));
        registry.add(foo).unwrap();
        registry.add(bar).unwrap();
        registry
    }

    #[test]
    fn test_round_trip_into_fresh_registry() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("out").join("bundle.zip");
        let original = sample(&dir.path().join("a"));
        let report = export(&original, &FindQuery::new(), &bundle, ExportOptions::default()).unwrap();
        assert_eq!(report.exported, vec!["bar", "foo"]);

        let mut fresh = Registry::new(Settings::new(dir.path().join("b")));
        let report = import(&mut fresh, &bundle, &FindQuery::new()).unwrap();
        assert_eq!(report.imported, vec!["bar", "foo"]);
        assert!(report.errors.is_empty());

        let foo = fresh.get("foo").unwrap();
        assert_eq!(foo.source_url(), Some("https://example.com/acme/foo.git"));
        assert_eq!(foo.tags(), &TagSet::parse("privesc,win"));
        assert_eq!(foo.path(), dir.path().join("b").join("foo"));
        assert_eq!(fresh.get("bar").unwrap().path(), Path::new("/home/user/bar"));
    }

    #[test]
    fn test_reimport_skips_everything() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("bundle.zip");
        let mut original = sample(dir.path());
        export(&original, &FindQuery::new(), &bundle, ExportOptions::default()).unwrap();
        let before: Vec<Tool> = original.iter().cloned().collect();

        let report = import(&mut original, &bundle, &FindQuery::new()).unwrap();
        assert!(report.imported.is_empty());
        assert_eq!(report.skipped_duplicate, vec!["bar", "foo"]);
        let after: Vec<Tool> = original.iter().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_export_respects_filter_and_existing_destination() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("bundle.zip");
        let registry = sample(dir.path());
        let query = FindQuery::new()
            .with_tags(TagSet::parse("win,privesc"))
            .with_mode(MatchMode::All);
        let report = export(&registry, &query, &bundle, ExportOptions::default()).unwrap();
        assert_eq!(report.exported, vec!["foo"]);

        assert!(matches!(
            export(&registry, &query, &bundle, ExportOptions::default()),
            Err(TransferError::BundleExists(_))
        ));
        let overwrite = ExportOptions {
            overwrite: true,
            ..ExportOptions::default()
        };
        assert!(export(&registry, &FindQuery::new(), &bundle, overwrite).is_ok());
    }

    #[test]
    fn test_payloads_travel_with_the_bundle() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let tree = src.join("kit");
        std::fs::create_dir_all(tree.join("bin")).unwrap();
        std::fs::create_dir_all(tree.join("empty")).unwrap();
        std::fs::write(tree.join("bin").join("run"), "#!/bin/sh\necho kit\n").unwrap();
        std::fs::write(src.join("single.sh"), "echo single").unwrap();

        let mut registry = Registry::new(Settings::new(dir.path().join("tools")));
        registry.add(Tool::local(&tree, None).unwrap()).unwrap();
        registry.add(Tool::local(src.join("single.sh"), None).unwrap()).unwrap();
        registry.add(Tool::local(src.join("gone"), None).unwrap()).unwrap();

        let bundle = dir.path().join("bundle.zip");
        let options = ExportOptions {
            include_payloads: true,
            ..ExportOptions::default()
        };
        let report = export(&registry, &FindQuery::new(), &bundle, options).unwrap();
        assert_eq!(report.missing_payloads, vec!["gone"]);

        let target = dir.path().join("elsewhere");
        let mut fresh = Registry::new(Settings::new(&target));
        let report = import(&mut fresh, &bundle, &FindQuery::new()).unwrap();
        assert_eq!(report.imported, vec!["gone", "kit", "single.sh"]);

        assert_eq!(
            std::fs::read_to_string(target.join("kit").join("bin").join("run")).unwrap(),
            "#!/bin/sh\necho kit\n"
        );
        assert!(target.join("kit").join("empty").is_dir());
        assert_eq!(std::fs::read_to_string(target.join("single.sh")).unwrap(), "echo single");
        assert_eq!(fresh.get("kit").unwrap().path(), target.join("kit"));
        assert_eq!(fresh.get("gone").unwrap().path(), src.join("gone"));

        // payload destination already taken: reported, not overwritten
        let mut other = Registry::new(Settings::new(&target));
        let report = import(&mut other, &bundle, &FindQuery::new()).unwrap();
        assert_eq!(report.imported, vec!["gone"]);
        assert_eq!(report.errors.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_directories_are_filled_before_locking() {
        use std::os::unix::fs::PermissionsExt;
        let mode = |path: &Path| std::fs::metadata(path).unwrap().permissions().mode() & 0o7777;
        let chmod = |path: &Path, mode: u32| {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap()
        };

        let dir = tempdir().unwrap();
        let tree = dir.path().join("src").join("kit");
        std::fs::create_dir_all(tree.join("bin")).unwrap();
        std::fs::write(tree.join("bin").join("run"), "run").unwrap();
        chmod(&tree.join("bin"), 0o555);
        chmod(&tree, 0o555);

        let mut registry = Registry::new(Settings::new(dir.path().join("tools")));
        registry.add(Tool::local(&tree, None).unwrap()).unwrap();
        let bundle = dir.path().join("bundle.zip");
        let options = ExportOptions {
            include_payloads: true,
            ..ExportOptions::default()
        };
        export(&registry, &FindQuery::new(), &bundle, options).unwrap();

        let target = dir.path().join("elsewhere");
        let mut fresh = Registry::new(Settings::new(&target));
        let report = import(&mut fresh, &bundle, &FindQuery::new()).unwrap();
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.imported, vec!["kit"]);

        let imported = target.join("kit");
        assert_eq!(std::fs::read_to_string(imported.join("bin").join("run")).unwrap(), "run");
        assert_eq!(mode(&imported), 0o555);
        assert_eq!(mode(&imported.join("bin")), 0o555);

        for path in [&tree, &tree.join("bin"), &imported, &imported.join("bin")] {
            chmod(path, 0o755);
        }
    }

    #[test]
    fn test_corrupt_bundle_mutates_nothing() {
        let dir = tempdir().unwrap();
        let payload = dir.path().join("tool.sh");
        std::fs::write(&payload, "echo original").unwrap();
        let mut registry = Registry::new(Settings::new(dir.path().join("tools")));
        registry.add(Tool::local(&payload, None).unwrap()).unwrap();
        let bundle = dir.path().join("bundle.zip");
        let options = ExportOptions {
            include_payloads: true,
            ..ExportOptions::default()
        };
        export(&registry, &FindQuery::new(), &bundle, options).unwrap();

        // rebuild the archive with the same manifest and a tampered payload
        let mut archive = ZipArchive::new(File::open(&bundle).unwrap()).unwrap();
        let mut manifest = String::new();
        archive.by_name(MANIFEST_NAME).unwrap().read_to_string(&mut manifest).unwrap();
        let tampered = dir.path().join("tampered.zip");
        let mut zip = ZipWriter::new(File::create(&tampered).unwrap());
        zip.start_file("payloads/tool.sh", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"echo evil").unwrap();
        zip.start_file(MANIFEST_NAME, SimpleFileOptions::default()).unwrap();
        zip.write_all(manifest.as_bytes()).unwrap();
        zip.finish().unwrap();

        let mut fresh = Registry::new(Settings::new(dir.path().join("fresh")));
        assert!(matches!(
            import(&mut fresh, &tampered, &FindQuery::new()),
            Err(TransferError::BundleCorrupt { .. })
        ));
        assert!(fresh.is_empty());
        assert!(!dir.path().join("fresh").exists());

        std::fs::write(&tampered, b"not a zip").unwrap();
        assert!(matches!(
            import(&mut fresh, &tampered, &FindQuery::new()),
            Err(TransferError::BundleCorrupt { .. })
        ));
    }

    #[test]
    fn test_future_major_version_is_rejected() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("bundle.zip");
        let mut zip = ZipWriter::new(File::create(&bundle).unwrap());
        zip.start_file(MANIFEST_NAME, SimpleFileOptions::default()).unwrap();
        zip.write_all(br#"{"format_version":"2.0.0","exported_at":"2026-10-17T10:00:00Z","tools":[]}"#)
            .unwrap();
        zip.finish().unwrap();

        let mut registry = Registry::new(Settings::new(dir.path()));
        assert!(matches!(
            import(&mut registry, &bundle, &FindQuery::new()),
            Err(TransferError::BundleCorrupt { .. })
        ));
    }
}
