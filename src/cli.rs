// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `fsmirror`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "fsmirror",
    version,
    about = "Mirror directory trees with hardlink deduplication and watch paths for changes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Fsmirror.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FSMIRROR_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Copy SOURCE to DESTINATION.
    Copy(CopyArgs),

    /// Create a hash index (root plus 256 shard directories).
    InitIndex {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Print stat changes of the given paths until Ctrl-C.
    Watch(WatchArgs),
}

/// Flags of the `copy` subcommand. Each flag overrides the config file.
#[derive(Debug, Clone, Args)]
pub struct CopyArgs {
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    #[arg(value_name = "DESTINATION")]
    pub destination: PathBuf,

    /// Deduplicate regular files through the hash index at PATH.
    #[arg(long, value_name = "PATH")]
    pub index: Option<PathBuf>,

    /// Rewrite index entries that were modified externally.
    #[arg(long)]
    pub auto_repair: bool,

    /// Make new index entries read-only.
    #[arg(long)]
    pub read_only: bool,

    /// Stamp every copied entry with a fixed timestamp.
    #[arg(long)]
    pub stable_time: bool,

    /// Process directory entries in sorted order.
    #[arg(long)]
    pub stable_sort: bool,

    /// Replace conflicting destination entries.
    #[arg(long)]
    pub overwrite: bool,

    /// Print the planned operations without applying them.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Poll interval in milliseconds.
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
