// src/copy/handlers.rs

//! Per-entry copy handlers.
//!
//! Each handler looks at one source entry and the current state of its
//! destination and schedules whatever operations are needed to materialize
//! it. Handlers never touch the destination directly.
//!
//! `destination_stat` is updated in place: when a handler schedules the
//! removal of a conflicting entry, it resets it to `None` so the
//! orchestrator's metadata step treats the destination as fresh.

use std::path::Path;

use futures::future::try_join_all;
use tracing::{debug, warn};

use super::index::{decide, index_entry_path, DestinationAction, DestinationState, IndexDecision, IndexState};
use super::ops::{Operation, OperationBatches};
use super::{copy_entry, safe_time, CopyContext, LinkStrategy};
use crate::errors::{FsMirrorError, Result};
use crate::fs::{maybe_lstat, Stat};

/// Result of running a handler on one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The destination holds a conflicting entry we may not replace; it is
    /// left exactly as it is.
    Conflict,
    /// Nothing structural was needed.
    Unchanged,
    /// The entry, or something below it, was (re)created.
    Changed,
}

impl Outcome {
    fn from_updated(updated: bool) -> Self {
        if updated {
            Outcome::Changed
        } else {
            Outcome::Unchanged
        }
    }
}

/// Schedule removal of an existing destination entry when `overwrite` allows
/// it. Returns `false` when the entry must be kept.
fn clear_conflict(
    ctx: &CopyContext<'_>,
    batches: &mut OperationBatches,
    destination: &Path,
    destination_stat: &mut Option<Stat>,
) -> bool {
    if !ctx.options.overwrite {
        debug!(?destination, "destination exists; skipping (overwrite disabled)");
        return false;
    }
    batches.push_structural(Operation::Remove {
        path: destination.to_path_buf(),
    });
    *destination_stat = None;
    true
}

pub(crate) async fn copy_folder(
    ctx: &CopyContext<'_>,
    batches: &mut OperationBatches,
    destination: &Path,
    destination_stat: &mut Option<Stat>,
    source: &Path,
    source_stat: &Stat,
    did_parent_exist: bool,
) -> Result<Outcome> {
    if destination_stat.is_some_and(|stat| !stat.is_dir())
        && !clear_conflict(ctx, batches, destination, destination_stat)
    {
        return Ok(Outcome::Conflict);
    }

    let mut updated = false;
    if destination_stat.is_none() {
        batches.push_structural(Operation::CreateDir {
            path: destination.to_path_buf(),
            mode: source_stat.mode,
        });
        updated = true;
    }

    let mut entries = ctx.source.read_dir(source).await?;
    let children_parent_exists = did_parent_exist && destination_stat.is_some();

    if ctx.options.stable_sort {
        entries.sort();
        for name in &entries {
            let child_destination = destination.join(name);
            let child_source = source.join(name);
            updated |= copy_entry(
                ctx,
                batches,
                &child_destination,
                &child_source,
                children_parent_exists,
            )
            .await?;
        }
    } else {
        let children = try_join_all(entries.iter().map(|name| async move {
            let child_destination = destination.join(name);
            let child_source = source.join(name);
            let mut child_batches = OperationBatches::new();
            let child_updated = copy_entry(
                ctx,
                &mut child_batches,
                &child_destination,
                &child_source,
                children_parent_exists,
            )
            .await?;
            Ok::<_, FsMirrorError>((child_updated, child_batches))
        }))
        .await?;

        for (child_updated, child_batches) in children {
            updated |= child_updated;
            batches.append(child_batches);
        }
    }

    Ok(Outcome::from_updated(updated))
}

pub(crate) async fn copy_file(
    ctx: &CopyContext<'_>,
    batches: &mut OperationBatches,
    destination: &Path,
    destination_stat: &mut Option<Stat>,
    source: &Path,
    source_stat: &Stat,
) -> Result<Outcome> {
    match &ctx.options.link_strategy {
        Some(LinkStrategy::HardlinkFromIndex {
            index_path,
            auto_repair,
            read_only,
        }) => {
            copy_file_via_index(
                ctx,
                batches,
                destination,
                destination_stat,
                source,
                source_stat,
                index_path,
                *auto_repair,
                *read_only,
            )
            .await
        }
        None => Ok(copy_file_direct(ctx, batches, destination, destination_stat, source)),
    }
}

fn copy_file_direct(
    ctx: &CopyContext<'_>,
    batches: &mut OperationBatches,
    destination: &Path,
    destination_stat: &mut Option<Stat>,
    source: &Path,
) -> Outcome {
    if destination_stat.is_some() && !clear_conflict(ctx, batches, destination, destination_stat) {
        return Outcome::Conflict;
    }

    batches.push_structural(Operation::CopyContent {
        source: source.to_path_buf(),
        destination: destination.to_path_buf(),
    });
    Outcome::Changed
}

#[allow(clippy::too_many_arguments)]
async fn copy_file_via_index(
    ctx: &CopyContext<'_>,
    batches: &mut OperationBatches,
    destination: &Path,
    destination_stat: &mut Option<Stat>,
    source: &Path,
    source_stat: &Stat,
    index_root: &Path,
    auto_repair: bool,
    read_only: bool,
) -> Result<Outcome> {
    let hash = ctx.source.checksum_file(source).await?;
    let index_path = index_entry_path(index_root, &hash);
    let index_stat = maybe_lstat(ctx.destination, &index_path).await?;
    let index_state = IndexState::classify(index_stat.as_ref());

    let destination_state = match (*destination_stat, index_stat) {
        (None, _) => DestinationState::Absent,
        (Some(dst), Some(idx)) => {
            if is_linked(ctx, destination, &dst, &idx, &hash).await? {
                DestinationState::Linked
            } else {
                DestinationState::Unrelated
            }
        }
        (Some(_), None) => DestinationState::Unrelated,
    };

    if destination_state == DestinationState::Linked && index_state == IndexState::Modified {
        warn!(index = ?index_path, ?destination, auto_repair, "index entry was modified externally");
    }

    let decision = decide(destination_state, index_state, auto_repair, ctx.options.overwrite);
    debug!(?destination, hash = %hash, ?index_state, ?destination_state, ?decision, "index decision");

    let (rewrite, action) = match decision {
        IndexDecision::Reject => return Ok(Outcome::Conflict),
        IndexDecision::Reuse { destination } => (false, destination),
        IndexDecision::Rewrite { destination } => (true, destination),
    };

    if action == DestinationAction::Replace {
        batches.push_structural(Operation::Remove {
            path: destination.to_path_buf(),
        });
        *destination_stat = None;
    }

    if rewrite {
        batches.push_structural(Operation::WriteIndexEntry {
            source: source.to_path_buf(),
            index_path: index_path.clone(),
        });
    }

    if action != DestinationAction::Keep {
        batches.push_structural(Operation::Link {
            existing: index_path.clone(),
            path: destination.to_path_buf(),
        });
    }

    if rewrite {
        batches.push_finishing(Operation::SetTimes {
            path: index_path.clone(),
            atime: safe_time(),
            mtime: safe_time(),
            follow: ctx.follow_for_times,
        });
        if read_only {
            batches.push_finishing(Operation::SetMode {
                path: index_path,
                mode: source_stat.permissions() & 0o555,
            });
        }
    }

    // Hardlinked content carries the index entry's metadata; the orchestrator
    // skips its metadata pass for these files. The outcome only tells the
    // parent directory that its listing changed.
    Ok(Outcome::from_updated(rewrite || action != DestinationAction::Keep))
}

/// Whether the destination already is a hardlink to the index entry.
///
/// Backends without stable inodes fall back to comparing content hashes.
async fn is_linked(
    ctx: &CopyContext<'_>,
    destination: &Path,
    destination_stat: &Stat,
    index_stat: &Stat,
    hash: &str,
) -> Result<bool> {
    if !destination_stat.is_file() {
        return Ok(false);
    }
    if ctx.destination.supports_inodes() {
        return Ok(destination_stat.same_inode(index_stat));
    }
    Ok(ctx.destination.checksum_file(destination).await? == hash)
}

pub(crate) fn copy_symlink(
    ctx: &CopyContext<'_>,
    batches: &mut OperationBatches,
    destination: &Path,
    destination_stat: &mut Option<Stat>,
    source: &Path,
) -> Outcome {
    if destination_stat.is_some() && !clear_conflict(ctx, batches, destination, destination_stat) {
        return Outcome::Conflict;
    }

    batches.push_structural(Operation::Symlink {
        source: source.to_path_buf(),
        destination: destination.to_path_buf(),
    });
    Outcome::Changed
}
