use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use colored::Colorize;
use tman::config::ConfigStore;
use tman::error::RegistryError;
use tman::global::utils::get_home_dir;
use tman::registry::{FindQuery, Modification, Registry, TagOp};
use tman::scanner::{scan, ScanOptions};
use tman::schedule::CronSpec;
use tman::sync::{SyncAction, SyncEngine, SyncEntry, SyncOptions};
use tman::tool::{TagSet, Tool, ToolType};
use tman::transfer::{export, import, ExportOptions};
use tman::util::{is_git_url, move_path};
use tman::vcs::GitCli;
use crate::cli::{FilterArgs, SyncArgs, TmanCommand, Toggle, CLI};

/// Runs a command. Returns `false` when any target failed.
pub fn execute(cli: CLI) -> Result<bool> {
    let store = ConfigStore::resolve(cli.config.as_deref())?;
    match cli.command {
        TmanCommand::Add { source, name, tags, install_dir, from_file } => {
            let requests = match from_file {
                Some(file) => read_list_file(&file)?,
                None => vec![AddRequest {
                    source: source.ok_or_else(|| anyhow!("Nothing to add"))?,
                    name,
                    tags: tags.as_deref().map(TagSet::parse).unwrap_or_default(),
                    install_dir,
                }],
            };
            execute_add(&store, requests)
        }
        TmanCommand::Delete { names, all, purge } => {
            execute_delete(&store, names, all, purge)
        }
        TmanCommand::Find { filter, name, synced_since, verbose_records } => {
            let mut query = query_from(&filter);
            query.name = name;
            query.synced_since = synced_since.map(start_of_day);
            execute_find(&store, &query, verbose_records)
        }
        TmanCommand::Modify { name, tag_add, tag_rm, tag_set, tag_rename, path, install_dir, move_files } => {
            let mut change = Modification {
                path,
                install_dir,
                ..Modification::default()
            };
            if let Some(tags) = tag_set {
                change.tags.push(TagOp::Replace(TagSet::parse(&tags)));
            }
            if let Some(tags) = tag_add {
                change.tags.push(TagOp::Add(TagSet::parse(&tags)));
            }
            if let Some(tags) = tag_rm {
                change.tags.push(TagOp::Remove(TagSet::parse(&tags)));
            }
            if let Some([from, to]) = tag_rename.as_deref() {
                change.tags.push(TagOp::Rename { from: from.clone(), to: to.clone() });
            }
            execute_modify(&store, &name, &change, move_files)
        }
        TmanCommand::Scan { root, local, add, tags, skip } => {
            let root = match root {
                Some(root) => root,
                None => get_home_dir().ok_or_else(|| anyhow!("Could not determine the home directory"))?,
            };
            let options = ScanOptions {
                detect_local: local,
                skip_dirs: skip,
                ..ScanOptions::default()
            };
            let tags = tags.as_deref().map(TagSet::parse).unwrap_or_default();
            execute_scan(&store, &root, options, add.then_some(tags))
        }
        TmanCommand::Install(args) => {
            execute_sync(&store, SyncAction::Install, args)
        }
        TmanCommand::Update(args) => {
            execute_sync(&store, SyncAction::Update, args)
        }
        TmanCommand::ExportConf { destination, filter, payloads, force } => {
            let options = ExportOptions {
                include_payloads: payloads,
                overwrite: force,
            };
            execute_export(&store, &destination, &query_from(&filter), options)
        }
        TmanCommand::ImportConf { source, filter } => {
            execute_import(&store, &source, &query_from(&filter))
        }
        TmanCommand::Config {
            default_dir,
            auto_install,
            timeout,
            jobs,
            schedule,
            schedule_enable,
            schedule_disable,
            schedule_clear,
        } => {
            let change = ConfigChange {
                default_dir,
                auto_install: auto_install.map(|t| t == Toggle::On),
                timeout,
                jobs,
                schedule,
                schedule_enable,
                schedule_disable,
                schedule_clear,
            };
            execute_config(&store, change)
        }
    }
}

fn ok_line(target: &str, detail: impl std::fmt::Display) {
    println!("{} {}: {}", "ok".green().bold(), target, detail);
}

fn fail_line(target: &str, detail: impl std::fmt::Display) {
    println!("{} {}: {}", "error".red().bold(), target, detail);
}

fn skip_line(target: &str, detail: impl std::fmt::Display) {
    println!("{} {}: {}", "skip".yellow().bold(), target, detail);
}

fn query_from(filter: &FilterArgs) -> FindQuery {
    let mut query = FindQuery::new().with_mode(filter.mode);
    if let Some(tags) = &filter.tags {
        query = query.with_tags(TagSet::parse(tags));
    }
    if !filter.types.is_empty() {
        query = query.with_types(filter.types.iter().copied());
    }
    query
}

fn start_of_day(date: NaiveDate) -> chrono::DateTime<chrono::Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn load_locked(store: &ConfigStore) -> Result<(tman::lock::StoreLock, Registry)> {
    let lock = store.lock()?;
    let registry = store
        .load()
        .with_context(|| format!("Could not load {}", store.path().display()))?;
    Ok((lock, registry))
}

fn load(store: &ConfigStore) -> Result<Registry> {
    store
        .load()
        .with_context(|| format!("Could not load {}", store.path().display()))
}

fn save(store: &ConfigStore, registry: &Registry) -> Result<()> {
    store
        .save(registry)
        .with_context(|| format!("Could not save {}", store.path().display()))
}

fn print_sync_entry(entry: &SyncEntry) {
    match &entry.error {
        None => ok_line(&entry.name, &entry.detail),
        Some(error) => fail_line(&entry.name, format!("[{}] {}", error.kind(), error)),
    }
}

/// Installs freshly tracked git tools when auto-install is on. With
/// `rollback`, tools that fail to install are untracked again.
fn auto_install(registry: &mut Registry, names: &[String], rollback: bool) -> bool {
    if !registry.settings().auto_install || names.is_empty() {
        return true;
    }
    let engine = SyncEngine::new(GitCli::default(), SyncOptions::from(registry.settings()));
    let report = engine.sync(registry, SyncAction::Install, names);
    for entry in &report.entries {
        print_sync_entry(entry);
        if rollback && !entry.is_ready() {
            registry.remove(&entry.name);
            skip_line(&entry.name, "no longer tracked");
        }
    }
    !report.has_failures()
}

/// One tool to add, from the command line or a list file.
#[derive(Debug, Clone, PartialEq)]
pub struct AddRequest {
    source: String,
    name: Option<String>,
    tags: TagSet,
    install_dir: Option<PathBuf>,
}

/// Parses a list file of `source,tag1,tag2,d=/install/dir` lines. Blank
/// lines and `#` comments are ignored.
fn parse_list(content: &str) -> Vec<AddRequest> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let mut parts = line.split(',').map(str::trim);
            let source = parts.next().unwrap_or_default().to_string();
            let mut tags = TagSet::new();
            let mut install_dir = None;
            for part in parts {
                match part.strip_prefix("d=") {
                    Some(dir) => install_dir = Some(PathBuf::from(dir)),
                    None => {
                        tags.insert(part);
                    }
                }
            }
            AddRequest {
                source,
                name: None,
                tags,
                install_dir,
            }
        })
        .collect()
}

fn read_list_file(path: &Path) -> Result<Vec<AddRequest>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    Ok(parse_list(&content))
}

fn tool_for(registry: &Registry, request: &AddRequest) -> Result<Tool, RegistryError> {
    let tool = if is_git_url(&request.source) {
        let install_dir = request
            .install_dir
            .clone()
            .unwrap_or_else(|| registry.settings().default_install_dir.clone());
        Tool::git(&request.source, install_dir, request.name.as_deref())?
    } else {
        let path = tman::util::absolutize(Path::new(&request.source));
        if !path.exists() {
            return Err(RegistryError::InvalidTool(format!("{} does not exist", path.display())));
        }
        Tool::local(path, request.name.as_deref())?
    };
    Ok(tool.with_tags(request.tags.clone()))
}

pub fn execute_add(store: &ConfigStore, requests: Vec<AddRequest>) -> Result<bool> {
    let (_lock, mut registry) = load_locked(store)?;
    let mut all_ok = true;
    let mut new_git = Vec::new();

    for request in &requests {
        let added = tool_for(&registry, request).and_then(|tool| registry.add(tool).cloned());
        match added {
            Ok(tool) => {
                ok_line(tool.name(), format!("tracking {} {}", tool.path().display(), tool.tags()));
                if tool.tool_type() == ToolType::Git {
                    new_git.push(tool.name().to_string());
                }
            }
            Err(e) => {
                fail_line(&request.source, e);
                all_ok = false;
            }
        }
    }

    all_ok &= auto_install(&mut registry, &new_git, true);
    save(store, &registry)?;
    Ok(all_ok)
}

pub fn execute_delete(store: &ConfigStore, names: Vec<String>, all: bool, purge: bool) -> Result<bool> {
    let (_lock, mut registry) = load_locked(store)?;
    let names = if all {
        registry.iter().map(|t| t.name().to_string()).collect()
    } else if names.is_empty() {
        bail!("No tools given, name some or use --all");
    } else {
        names
    };

    let report = registry.delete(&names, purge);
    save(store, &registry)?;

    for name in &report.removed {
        ok_line(name, "deleted");
    }
    for (name, reason) in &report.purge_failed {
        fail_line(name, format!("files not removed: {reason}"));
    }
    for name in &report.not_found {
        fail_line(name, "not tracked");
    }
    Ok(report.not_found.is_empty() && report.purge_failed.is_empty())
}

fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

pub fn execute_find(store: &ConfigStore, query: &FindQuery, verbose_records: bool) -> Result<bool> {
    let registry = load(store)?;
    let mut found = 0;
    for tool in registry.find(query) {
        found += 1;
        println!("{} ({}) {} {}", tool.name().bold(), tool.tool_type(), tool.path().display(), tool.tags());
        if verbose_records {
            if let Some(url) = tool.source_url() {
                println!("    source:      {url}");
            }
            println!("    install dir: {}", tool.install_dir().display());
            println!("    added:       {}", format_time(tool.added()));
            println!("    installed:   {}", format_time(tool.installed()));
            println!("    last synced: {}", format_time(tool.last_synced()));
            println!("    on disk:     {}", if tool.is_materialized() { "yes" } else { "no" });
        }
    }
    if found == 0 {
        println!("No matching tools");
    }
    Ok(true)
}

pub fn execute_modify(store: &ConfigStore, name: &str, change: &Modification, move_files: bool) -> Result<bool> {
    let (_lock, mut registry) = load_locked(store)?;
    let old_path = match registry.get(name) {
        Some(tool) => tool.path().to_path_buf(),
        None => {
            fail_line(name, RegistryError::NotFound(name.to_string()));
            return Ok(false);
        }
    };

    let mut updated = registry.clone();
    let new_path = match updated.modify(name, change) {
        Ok(tool) => tool.path().to_path_buf(),
        Err(e) => {
            fail_line(name, e);
            return Ok(false);
        }
    };

    if move_files && new_path != old_path {
        if old_path.exists() {
            if let Err(e) = move_path(&old_path, &new_path) {
                fail_line(name, format!("{e:#}"));
                return Ok(false);
            }
        } else {
            skip_line(name, format!("nothing to move at {}", old_path.display()));
        }
    }

    registry = updated;
    save(store, &registry)?;
    if let Some(tool) = registry.get(name) {
        ok_line(name, format!("{} {}", tool.path().display(), tool.tags()));
    }
    Ok(true)
}

pub fn execute_scan(store: &ConfigStore, root: &Path, options: ScanOptions, add_with_tags: Option<TagSet>) -> Result<bool> {
    let Some(tags) = add_with_tags else {
        let registry = load(store)?;
        let mut found = 0;
        for candidate in scan(root, &registry, options) {
            found += 1;
            println!("{}", candidate);
        }
        if found == 0 {
            println!("No untracked tools found below {}", root.display());
        }
        return Ok(true);
    };

    let (_lock, mut registry) = load_locked(store)?;
    let candidates: Vec<Tool> = scan(root, &registry, options).collect();
    let mut all_ok = true;
    let mut new_git = Vec::new();
    for candidate in candidates {
        let candidate = candidate.with_tags(tags.clone());
        let label = candidate.path().display().to_string();
        match registry.add(candidate) {
            Ok(tool) => {
                ok_line(tool.name(), format!("tracking {label}"));
                if tool.tool_type() == ToolType::Git {
                    new_git.push(tool.name().to_string());
                }
            }
            Err(e) => {
                fail_line(&label, e);
                all_ok = false;
            }
        }
    }
    all_ok &= auto_install(&mut registry, &new_git, false);
    save(store, &registry)?;
    Ok(all_ok)
}

pub fn execute_sync(store: &ConfigStore, action: SyncAction, args: SyncArgs) -> Result<bool> {
    let (_lock, mut registry) = load_locked(store)?;
    let mut options = SyncOptions::from(registry.settings());
    if let Some(jobs) = args.jobs {
        options.jobs = jobs.max(1);
    }
    if let Some(timeout) = args.timeout {
        options.timeout = Duration::from_secs(timeout);
    }

    let engine = SyncEngine::new(GitCli::default(), options);
    let mut all_ok = true;
    let report = if args.all {
        match action {
            SyncAction::Install => engine.install_all(&mut registry),
            SyncAction::Update => engine.update_all(&mut registry),
        }
    } else if args.names.is_empty() {
        bail!("No tools given, name some or use --all");
    } else {
        let (known, unknown): (Vec<String>, Vec<String>) =
            args.names.into_iter().partition(|name| registry.get(name).is_some());
        for name in &unknown {
            fail_line(name, "not tracked");
            all_ok = false;
        }
        engine.sync(&mut registry, action, &known)
    };
    save(store, &registry)?;

    for entry in &report.entries {
        print_sync_entry(entry);
    }
    Ok(all_ok && !report.has_failures())
}

pub fn execute_export(store: &ConfigStore, destination: &Path, query: &FindQuery, options: ExportOptions) -> Result<bool> {
    let registry = load(store)?;
    let report = export(&registry, query, destination, options)
        .with_context(|| format!("Could not export to {}", destination.display()))?;
    for name in &report.exported {
        ok_line(name, "exported");
    }
    for name in &report.missing_payloads {
        skip_line(name, "no files on disk, exported without payload");
    }
    println!("{} tools written to {}", report.exported.len(), destination.display());
    Ok(true)
}

pub fn execute_import(store: &ConfigStore, source: &Path, query: &FindQuery) -> Result<bool> {
    let (_lock, mut registry) = load_locked(store)?;
    let report = import(&mut registry, source, query)
        .with_context(|| format!("Could not import {}", source.display()))?;

    for name in &report.imported {
        ok_line(name, "imported");
    }
    for name in &report.skipped_duplicate {
        skip_line(name, "already tracked");
    }
    for (name, reason) in &report.errors {
        fail_line(name, reason);
    }

    let new_git: Vec<String> = report
        .imported
        .iter()
        .filter(|name| registry.get(name).is_some_and(|t| t.tool_type() == ToolType::Git))
        .cloned()
        .collect();
    let installed = auto_install(&mut registry, &new_git, false);
    save(store, &registry)?;
    Ok(report.errors.is_empty() && installed)
}

/// Options of the `config` command.
pub struct ConfigChange {
    default_dir: Option<PathBuf>,
    auto_install: Option<bool>,
    timeout: Option<u64>,
    jobs: Option<usize>,
    schedule: Option<String>,
    schedule_enable: bool,
    schedule_disable: bool,
    schedule_clear: bool,
}

impl ConfigChange {
    fn is_empty(&self) -> bool {
        self.default_dir.is_none()
            && self.auto_install.is_none()
            && self.timeout.is_none()
            && self.jobs.is_none()
            && self.schedule.is_none()
            && !self.schedule_enable
            && !self.schedule_disable
            && !self.schedule_clear
    }
}

fn print_settings(store: &ConfigStore, registry: &Registry) {
    let settings = registry.settings();
    println!("config file         {}", store.path().display());
    println!("default_install_dir {}", settings.default_install_dir.display());
    println!("auto_install        {}", if settings.auto_install { "on" } else { "off" });
    println!("sync_timeout_secs   {}", settings.sync_timeout_secs);
    println!("jobs                {}", settings.jobs);

    let program = std::env::current_exe()
        .map(|exe| exe.display().to_string())
        .unwrap_or_else(|_| "tman".to_string());
    let custom_store = (!store.is_default_location()).then(|| store.path());
    match settings.schedule.descriptor(&program, custom_store, &store.update_log_file()) {
        Some(descriptor) => println!("schedule            {descriptor}"),
        None => println!("schedule            not set"),
    }
}

pub fn execute_config(store: &ConfigStore, change: ConfigChange) -> Result<bool> {
    if change.is_empty() {
        let registry = load(store)?;
        print_settings(store, &registry);
        return Ok(true);
    }

    let (_lock, mut registry) = load_locked(store)?;
    let settings = registry.settings_mut();
    if let Some(dir) = change.default_dir {
        settings.default_install_dir = tman::util::absolutize(&dir);
    }
    if let Some(auto_install) = change.auto_install {
        settings.auto_install = auto_install;
    }
    if let Some(timeout) = change.timeout {
        if timeout == 0 {
            bail!("The timeout must be at least one second");
        }
        settings.sync_timeout_secs = timeout;
    }
    if let Some(jobs) = change.jobs {
        if jobs == 0 {
            bail!("At least one job is needed");
        }
        settings.jobs = jobs;
    }
    if change.schedule_clear {
        settings.schedule.clear();
    }
    if let Some(frequency) = change.schedule {
        let frequency: CronSpec = frequency.parse().context("Invalid schedule")?;
        settings.schedule.set(frequency);
    }
    if change.schedule_disable {
        settings.schedule.disable();
    }
    if change.schedule_enable {
        settings.schedule.enable().context("Cannot enable the schedule")?;
    }

    save(store, &registry)?;
    print_settings(store, &registry);
    Ok(true)
}
