use std::path::PathBuf;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tman::global::utils::CONFIG_ENV_VAR;
use tman::registry::MatchMode;
use tman::tool::ToolType;

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    /// Configuration store to use instead of the default one
    #[clap(long, global = true, env = CONFIG_ENV_VAR, value_name = "FILE")]
    pub(crate) config: Option<PathBuf>,
    /// Print debug output
    #[clap(short, long, global = true)]
    pub(crate) verbose: bool,
    /// Append log output to this file
    #[clap(long, global = true, value_name = "FILE")]
    pub(crate) log_file: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: TmanCommand,
}

/// Tag and type filters shared by `find`, `export-conf` and `import-conf`.
#[derive(Debug, Args, Clone, PartialEq)]
pub struct FilterArgs {
    /// Comma-separated tags
    #[clap(short, long)]
    pub tags: Option<String>,
    /// Tool types to include
    #[clap(long = "type", value_enum, value_delimiter = ',')]
    pub types: Vec<ToolType>,
    /// Whether a tool needs any or all of the tags
    #[clap(long = "match", value_enum, default_value_t = MatchMode::Any)]
    pub mode: MatchMode,
}

#[derive(Debug, Args, Clone, PartialEq)]
pub struct SyncArgs {
    /// Tools to process
    pub names: Vec<String>,
    /// Process every tracked tool
    #[clap(long, conflicts_with = "names")]
    pub all: bool,
    /// Worker threads, overrides the configured value
    #[clap(short, long)]
    pub jobs: Option<usize>,
    /// Seconds before a git operation is aborted, overrides the configured value
    #[clap(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum TmanCommand {
    /// Track a git repository (by URL) or a local file or directory (by path)
    Add {
        /// Repository URL or local path
        #[clap(required_unless_present = "from_file")]
        source: Option<String>,
        /// Name of the tool, derived from the URL or path by default
        #[clap(long)]
        name: Option<String>,
        /// Comma-separated tags
        #[clap(short, long)]
        tags: Option<String>,
        /// Directory git tools are cloned into, defaults to the configured one
        #[clap(short = 'd', long)]
        install_dir: Option<PathBuf>,
        /// Read tools from a file, one `source,tag,...,d=/dir` per line
        #[clap(long, conflicts_with_all = ["source", "name"])]
        from_file: Option<PathBuf>,
    },
    /// Stop tracking tools
    Delete {
        names: Vec<String>,
        /// Delete every tracked tool
        #[clap(long, conflicts_with = "names")]
        all: bool,
        /// Also remove the files from disk
        #[clap(long)]
        purge: bool,
    },
    /// List tracked tools matching the filters
    Find {
        #[command(flatten)]
        filter: FilterArgs,
        /// Case-insensitive part of the tool name
        #[clap(long)]
        name: Option<String>,
        /// Only tools synced on or after this date (YYYY-MM-DD)
        #[clap(long)]
        synced_since: Option<NaiveDate>,
        /// Print every field of each tool
        #[clap(long)]
        verbose_records: bool,
    },
    /// Change the tags or location of a tool
    Modify {
        name: String,
        /// Add comma-separated tags
        #[clap(long, value_name = "TAGS")]
        tag_add: Option<String>,
        /// Remove comma-separated tags
        #[clap(long, value_name = "TAGS")]
        tag_rm: Option<String>,
        /// Replace all tags
        #[clap(long, value_name = "TAGS")]
        tag_set: Option<String>,
        /// Rename a tag
        #[clap(long, num_args = 2, value_names = ["OLD", "NEW"])]
        tag_rename: Option<Vec<String>>,
        /// New path of the tool
        #[clap(long)]
        path: Option<PathBuf>,
        /// New install directory
        #[clap(short = 'd', long)]
        install_dir: Option<PathBuf>,
        /// Move the files on disk to the new location
        #[clap(long = "move")]
        move_files: bool,
    },
    /// Look for untracked repositories and tools below a directory
    Scan {
        /// Directory to scan, defaults to the home directory
        root: Option<PathBuf>,
        /// Also report executables and archives
        #[clap(long)]
        local: bool,
        /// Track everything that is found
        #[clap(long)]
        add: bool,
        /// Tags given to added tools
        #[clap(short, long)]
        tags: Option<String>,
        /// Directory names to skip
        #[clap(long, value_name = "DIR")]
        skip: Vec<String>,
    },
    /// Clone missing git tools and check local ones
    Install(SyncArgs),
    /// Fast-forward git tools to their upstream
    Update(SyncArgs),
    /// Write tracked tools to a bundle
    ExportConf {
        destination: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        /// Include the files of each tool
        #[clap(long)]
        payloads: bool,
        /// Replace an existing bundle
        #[clap(long)]
        force: bool,
    },
    /// Track the tools listed in a bundle
    ImportConf {
        source: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Show or change settings
    Config {
        /// Directory git tools are cloned into
        #[clap(long)]
        default_dir: Option<PathBuf>,
        /// Install git tools as soon as they are added
        #[clap(long, value_enum)]
        auto_install: Option<Toggle>,
        /// Seconds before a git operation is aborted
        #[clap(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Worker threads for install and update
        #[clap(short, long)]
        jobs: Option<usize>,
        /// Cron frequency of the scheduled update, e.g. "0 3 * * *"
        #[clap(long, value_name = "CRON")]
        schedule: Option<String>,
        /// Enable the scheduled update
        #[clap(long, conflicts_with = "schedule_disable")]
        schedule_enable: bool,
        /// Disable the scheduled update
        #[clap(long)]
        schedule_disable: bool,
        /// Remove the scheduled update
        #[clap(long, conflicts_with_all = ["schedule", "schedule_enable", "schedule_disable"])]
        schedule_clear: bool,
    },
}
