// src/copy/mod.rs

//! Recursive copy engine.
//!
//! A copy runs in two phases:
//!
//! 1. **Plan**: walk the source tree, compare every entry against the
//!    destination, and record the required mutations in an
//!    [`OperationBatches`]. Nothing is written during this phase.
//! 2. **Execute**: apply the structural batch in order, then the finishing
//!    batch concurrently (see [`ops`]).
//!
//! - [`handlers`] decides what to do for one directory, file or symlink.
//! - [`index`] manages the content-addressed hash index used by
//!   [`LinkStrategy::HardlinkFromIndex`].
//! - [`ops`] defines the operations and their executor.

pub mod handlers;
pub mod index;
pub mod ops;

use std::path::{Path, PathBuf};

use filetime::FileTime;
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info};

use crate::errors::{FsMirrorError, Result};
use crate::fs::{maybe_lstat, mkdirp, EntryKind, FileSystem, Stat};

use handlers::Outcome;

pub use index::{
    decide, index_entry_path, init_index, DestinationAction, DestinationState, IndexDecision,
    IndexState,
};
pub use ops::{execute_batches, Operation, OperationBatches};

/// Fixed timestamp (seconds since the Unix epoch, 1984-06-22) used for
/// `stable_time` output and to mark pristine index entries.
///
/// Every consumer of one index must agree on this value.
pub const SAFE_TIME: i64 = 456_789_000;

pub fn safe_time() -> FileTime {
    FileTime::from_unix_time(SAFE_TIME, 0)
}

/// Deduplication policy for regular files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStrategy {
    /// Store each distinct content once under `index_path` and hardlink
    /// destinations to it.
    HardlinkFromIndex {
        index_path: PathBuf,
        /// Rewrite index entries found modified behind our back.
        auto_repair: bool,
        /// Drop write permission on index entries once written.
        read_only: bool,
    },
}

/// Options for one copy invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    pub link_strategy: Option<LinkStrategy>,
    /// Stamp every copied entry with [`SAFE_TIME`] instead of the source times.
    pub stable_time: bool,
    /// Visit directory entries sorted and one at a time.
    pub stable_sort: bool,
    /// Replace destination entries that conflict with the source.
    pub overwrite: bool,
}

/// Result of planning a copy without executing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyPlan {
    /// Whether anything at or below the destination needs changing.
    pub updated: bool,
    pub batches: OperationBatches,
}

/// Shared, read-only state for one tree walk.
pub(crate) struct CopyContext<'a> {
    pub(crate) destination: &'a dyn FileSystem,
    pub(crate) source: &'a dyn FileSystem,
    pub(crate) options: &'a CopyOptions,
    /// Timestamps are set through the follow-symlink primitive because the
    /// destination backend can't stamp links themselves.
    pub(crate) follow_for_times: bool,
}

/// Copy `source` (on `source_fs`) to `destination` (on `destination_fs`).
///
/// Missing ancestors of `destination` are created first. Returns whether
/// anything had to change.
///
/// # Errors
///
/// Fails if `source` does not exist, if an entry that is neither a
/// directory, regular file nor symbolic link is found, or if any structural
/// or finishing operation fails. Structural operations applied before a
/// failure are not rolled back.
pub async fn copy(
    destination_fs: &dyn FileSystem,
    destination: &Path,
    source_fs: &dyn FileSystem,
    source: &Path,
    options: &CopyOptions,
) -> Result<bool> {
    let destination = destination_fs.normalize(destination);
    let source = source_fs.normalize(source);
    info!(?source, ?destination, ?options, "starting copy");

    let (atime, mtime) = if options.stable_time {
        (safe_time(), safe_time())
    } else {
        let stat = source_fs.lstat(&source).await?;
        (stat.atime, stat.mtime)
    };
    if let Some(parent) = destination.parent() {
        mkdirp(destination_fs, parent, Some((atime, mtime))).await?;
    }

    let plan = plan_normalized(destination_fs, &destination, source_fs, &source, options).await?;
    info!(
        updated = plan.updated,
        structural = plan.batches.structural().len(),
        finishing = plan.batches.finishing().len(),
        "copy planned"
    );

    execute_batches(destination_fs, source_fs, plan.batches).await?;
    info!(?destination, "copy finished");
    Ok(plan.updated)
}

/// Walk `source` and compute the operations a [`copy`] would perform,
/// without modifying anything.
pub async fn plan_copy(
    destination_fs: &dyn FileSystem,
    destination: &Path,
    source_fs: &dyn FileSystem,
    source: &Path,
    options: &CopyOptions,
) -> Result<CopyPlan> {
    let destination = destination_fs.normalize(destination);
    let source = source_fs.normalize(source);
    plan_normalized(destination_fs, &destination, source_fs, &source, options).await
}

async fn plan_normalized(
    destination_fs: &dyn FileSystem,
    destination: &Path,
    source_fs: &dyn FileSystem,
    source: &Path,
    options: &CopyOptions,
) -> Result<CopyPlan> {
    let ctx = CopyContext {
        destination: destination_fs,
        source: source_fs,
        options,
        follow_for_times: !destination_fs.supports_symlink_times(),
    };

    let mut batches = OperationBatches::new();
    let updated = copy_entry(&ctx, &mut batches, destination, source, true).await?;
    Ok(CopyPlan { updated, batches })
}

fn target_times(options: &CopyOptions, source_stat: &Stat) -> (FileTime, FileTime) {
    if options.stable_time {
        (safe_time(), safe_time())
    } else {
        (source_stat.atime, source_stat.mtime)
    }
}

/// Plan one entry and everything below it. Returns whether it was updated.
pub(crate) fn copy_entry<'a>(
    ctx: &'a CopyContext<'a>,
    batches: &'a mut OperationBatches,
    destination: &'a Path,
    source: &'a Path,
    did_parent_exist: bool,
) -> BoxFuture<'a, Result<bool>> {
    async move {
        let mut destination_stat = if did_parent_exist {
            maybe_lstat(ctx.destination, destination).await?
        } else {
            None
        };
        let source_stat = ctx.source.lstat(source).await?;

        let outcome = match source_stat.kind {
            EntryKind::Directory => {
                handlers::copy_folder(
                    ctx,
                    batches,
                    destination,
                    &mut destination_stat,
                    source,
                    &source_stat,
                    did_parent_exist,
                )
                .await?
            }
            EntryKind::File => {
                handlers::copy_file(
                    ctx,
                    batches,
                    destination,
                    &mut destination_stat,
                    source,
                    &source_stat,
                )
                .await?
            }
            EntryKind::Symlink => {
                handlers::copy_symlink(ctx, batches, destination, &mut destination_stat, source)
            }
            EntryKind::Other => {
                return Err(FsMirrorError::UnsupportedFileType {
                    path: source.to_path_buf(),
                    kind: format!("{:?}", source_stat.kind),
                });
            }
        };

        let mut updated = match outcome {
            // Destination left untouched; skip the metadata step too.
            Outcome::Conflict => return Ok(false),
            Outcome::Unchanged => false,
            Outcome::Changed => true,
        };

        let via_index = source_stat.is_file()
            && matches!(
                ctx.options.link_strategy,
                Some(LinkStrategy::HardlinkFromIndex { .. })
            );
        if via_index {
            return Ok(updated);
        }

        let (atime, mtime) = target_times(ctx.options, &source_stat);
        let times_match = destination_stat.is_some_and(|s| s.atime == atime && s.mtime == mtime);
        if updated || !times_match {
            batches.push_finishing(Operation::SetTimes {
                path: destination.to_path_buf(),
                atime,
                mtime,
                follow: ctx.follow_for_times,
            });
            updated = true;
        }

        let mode_matches =
            destination_stat.is_some_and(|s| s.permissions() == source_stat.permissions());
        if !source_stat.is_symlink() && !mode_matches {
            batches.push_finishing(Operation::SetMode {
                path: destination.to_path_buf(),
                mode: source_stat.permissions(),
            });
            updated = true;
        }

        debug!(?destination, updated, "planned entry");
        Ok(updated)
    }
    .boxed()
}
