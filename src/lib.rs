// src/lib.rs

pub mod cli;
pub mod config;
pub mod copy;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::{CliArgs, Command, CopyArgs, WatchArgs};
use crate::config::loader::load_or_default;
use crate::config::model::ConfigFile;
use crate::copy::{CopyOptions, LinkStrategy};
use crate::fs::{DiskFileSystem, FileSystem};
use crate::watch::{StatSnapshot, WatcherRegistry};

/// High-level entry point used by `main.rs`.
///
/// Loads the config (if any), merges CLI overrides and dispatches to the
/// selected subcommand against the local disk.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_or_default(args.config.as_deref())?;

    match args.command {
        Command::Copy(copy_args) => run_copy(&cfg, copy_args).await,
        Command::InitIndex { path } => {
            let fs = DiskFileSystem::new();
            let root = copy::init_index(&fs, &absolute(&path)?).await?;
            println!("index ready at {}", root.display());
            Ok(())
        }
        Command::Watch(watch_args) => run_watch(&cfg, watch_args).await,
    }
}

/// Merge `[copy]`/`[index]` from the config with the CLI flags.
///
/// Flags can only switch behaviour on; `--index` replaces the configured
/// index path.
pub fn merge_copy_options(cfg: &ConfigFile, args: &CopyArgs) -> CopyOptions {
    let mut options = cfg.copy_options();
    options.stable_time |= args.stable_time;
    options.stable_sort |= args.stable_sort;
    options.overwrite |= args.overwrite;

    options.link_strategy = match options.link_strategy.take() {
        Some(LinkStrategy::HardlinkFromIndex {
            index_path,
            auto_repair,
            read_only,
        }) => Some(LinkStrategy::HardlinkFromIndex {
            index_path: args.index.clone().unwrap_or(index_path),
            auto_repair: auto_repair || args.auto_repair,
            read_only: read_only || args.read_only,
        }),
        None => args.index.clone().map(|index_path| LinkStrategy::HardlinkFromIndex {
            index_path,
            auto_repair: args.auto_repair,
            read_only: args.read_only,
        }),
    };
    options
}

async fn run_copy(cfg: &ConfigFile, args: CopyArgs) -> Result<()> {
    let fs = DiskFileSystem::new();
    let mut options = merge_copy_options(cfg, &args);
    let source = absolute(&args.source)?;
    let destination = absolute(&args.destination)?;

    if let Some(LinkStrategy::HardlinkFromIndex { index_path, .. }) = &mut options.link_strategy {
        *index_path = absolute(index_path)?;
        if !args.dry_run {
            copy::init_index(&fs, index_path).await?;
        }
    }

    if args.dry_run {
        let plan = copy::plan_copy(&fs, &destination, &fs, &source, &options).await?;
        for op in plan.batches.structural().iter().chain(plan.batches.finishing()) {
            println!("{op:?}");
        }
        println!(
            "{} operation(s), {}",
            plan.batches.len(),
            if plan.updated { "changes pending" } else { "up to date" }
        );
        return Ok(());
    }

    let updated = copy::copy(&fs, &destination, &fs, &source, &options)
        .await
        .with_context(|| format!("copying {} to {}", source.display(), destination.display()))?;
    println!("{}", if updated { "updated" } else { "up to date" });
    Ok(())
}

async fn run_watch(cfg: &ConfigFile, args: WatchArgs) -> Result<()> {
    let fs: Arc<dyn FileSystem> = Arc::new(DiskFileSystem::new());
    let registry = WatcherRegistry::global();

    let mut options = cfg.watch_options();
    if let Some(ms) = args.interval_ms {
        options.interval = Duration::from_millis(ms.max(1));
    }

    for path in &args.paths {
        let path = absolute(path)?;
        let shown = path.display().to_string();
        registry
            .watch_with_options(&fs, &path, options, move |current, previous| {
                println!("{shown}: {}", describe_change(current, previous));
            })
            .await?;
    }
    info!(paths = args.paths.len(), interval = ?options.interval, "watching; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    registry.dispose(&fs);
    Ok(())
}

fn describe_change(current: &StatSnapshot, previous: &StatSnapshot) -> String {
    match (previous.exists(), current.exists()) {
        (false, true) => "created".to_string(),
        (true, false) => "removed".to_string(),
        (false, false) => "missing".to_string(),
        (true, true) => format!(
            "changed (size {} -> {}, mtime {} -> {})",
            previous.size, current.size, previous.mtime, current.mtime
        ),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("resolving {}", path.display()))
}
