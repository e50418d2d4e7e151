//! # tman Core Library
//!
//! This crate contains the core logic of `tman`, a manager for the tools a
//! developer keeps around: git repositories cloned from somewhere, and local
//! scripts, binaries or archives.
//!
//! `tman` tracks every tool in a single registry with tags, clones and
//! fast-forwards git tools, discovers untracked tools on disk, and moves the
//! whole collection between machines as a zip bundle.
//!
//! This library is built for the `tman` CLI, but you can also reuse it as a backend in other tools.
//!
//! ## Modules Overview
//! - [`tool`] – The tool record, tool types and normalized tag sets
//! - [`registry`] – The in-memory index: add, delete, modify and find
//! - [`config`] – Settings and the atomically written TOML store
//! - [`lock`] – Advisory writer lock around the store
//! - [`scanner`] – Discovery of untracked repositories and local tools
//! - [`vcs`] – The git backend with bounded invocations
//! - [`sync`] – Install and update of tools, one result per tool
//! - [`transfer`] – Export and import of bundles with verified payloads
//! - [`schedule`] – The scheduled update job descriptor
//! - [`logging`] – `tracing` subscriber setup for the CLI
//! - [`util`] – Shared path helpers
//! - [`global`] – Platform directories
//! - [`error`] – Error kinds of every layer

pub mod error;
pub mod tool;
pub mod registry;
pub mod config;
pub mod lock;
pub mod scanner;
pub mod vcs;
pub mod sync;
pub mod transfer;
pub mod schedule;
pub mod logging;
pub mod util;
pub mod global;

pub use config::{ConfigStore, Settings};
pub use error::*;
pub use registry::{DeleteReport, FindQuery, MatchMode, Modification, Registry, TagOp};
pub use sync::{SyncAction, SyncEngine, SyncEntry, SyncReport, SyncState};
pub use tool::{TagSet, Tool, ToolKind, ToolType};
