// src/copy/index.rs

//! Content-addressed hash index used for hardlink deduplication.
//!
//! Layout: `<root>/<first two hex chars>/<full hash>.dat`. Sharding on the
//! first byte of the hash keeps each directory to 1/256th of the pool.
//!
//! An entry whose mtime equals [`SAFE_TIME`](super::SAFE_TIME) is pristine.
//! Any other mtime means something wrote through one of its hardlinks.

use std::path::{Path, PathBuf};

use futures::future::try_join_all;
use tracing::debug;

use super::safe_time;
use crate::errors::Result;
use crate::fs::{mkdirp, FileSystem, Stat};

/// Number of shard directories (`00`..`ff`).
pub const SHARD_COUNT: usize = 256;

/// Extension of index blobs.
pub const ENTRY_EXTENSION: &str = "dat";

/// Create `index_root` and its 256 shard directories.
///
/// Idempotent: directories that already exist are left alone. Returns the
/// root for chaining.
pub async fn init_index(destination: &dyn FileSystem, index_root: &Path) -> Result<PathBuf> {
    let index_root = destination.normalize(index_root);
    mkdirp(destination, &index_root, None).await?;

    try_join_all((0..SHARD_COUNT).map(|shard| {
        let dir = index_root.join(format!("{shard:02x}"));
        async move {
            match destination.mkdir(&dir, None).await {
                Err(err) if err.is_already_exists() => Ok(()),
                other => other,
            }
        }
    }))
    .await?;

    debug!(root = ?index_root, "hash index initialised");
    Ok(index_root)
}

/// Path of the index entry for `hash`.
pub fn index_entry_path(index_root: &Path, hash: &str) -> PathBuf {
    let shard = hash.get(..2).unwrap_or(hash);
    index_root
        .join(shard)
        .join(format!("{hash}.{ENTRY_EXTENSION}"))
}

/// Freshness of an index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Missing,
    Pristine,
    /// Timestamp no longer matches the sentinel: written to externally.
    Modified,
}

impl IndexState {
    pub fn classify(index_stat: Option<&Stat>) -> Self {
        match index_stat {
            None => IndexState::Missing,
            Some(stat) if stat.mtime == safe_time() => IndexState::Pristine,
            Some(_) => IndexState::Modified,
        }
    }
}

/// Relationship between the destination path and the index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationState {
    Absent,
    /// Hardlink to the index entry.
    Linked,
    /// Holds content that doesn't come from the index entry.
    Unrelated,
}

/// What to do with the destination path once the index entry is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationAction {
    /// Already linked; leave it.
    Keep,
    /// Nothing there yet; link it.
    Link,
    /// Remove the unrelated entry, then link.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDecision {
    /// Use the existing index entry as is.
    Reuse { destination: DestinationAction },
    /// Write the index entry from the source before linking.
    Rewrite { destination: DestinationAction },
    /// Leave the destination untouched and report "not updated".
    Reject,
}

/// Decide how to materialize a file through the index.
///
/// A copy never writes through an unrelated destination in place, since that
/// file may itself be shared; it is either replaced (`overwrite`) or left
/// alone.
pub fn decide(
    destination: DestinationState,
    index: IndexState,
    auto_repair: bool,
    overwrite: bool,
) -> IndexDecision {
    use DestinationState::{Absent, Linked, Unrelated};

    let fill = |action| match index {
        IndexState::Missing => IndexDecision::Rewrite { destination: action },
        IndexState::Pristine | IndexState::Modified => IndexDecision::Reuse { destination: action },
    };

    match (destination, index) {
        (Absent, _) => fill(DestinationAction::Link),
        // Rewritten in place, which repairs every hardlink to the entry.
        (Linked, IndexState::Modified) if auto_repair => IndexDecision::Rewrite {
            destination: DestinationAction::Keep,
        },
        (Linked, IndexState::Pristine | IndexState::Modified) => IndexDecision::Reuse {
            destination: DestinationAction::Keep,
        },
        (Linked, IndexState::Missing) | (Unrelated, _) if overwrite => {
            fill(DestinationAction::Replace)
        }
        _ => IndexDecision::Reject,
    }
}
