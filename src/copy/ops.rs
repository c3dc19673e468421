// src/copy/ops.rs

//! Deferred copy operations and their executor.
//!
//! Planning a copy produces an [`OperationBatches`] value instead of touching
//! the destination directly:
//!
//! - the *structural* batch creates, removes, writes and links entries. Later
//!   operations may depend on earlier ones (a file written into a directory
//!   created just before it), so it runs strictly in recorded order;
//! - the *finishing* batch only updates timestamps and permission bits of
//!   entries that are structurally complete, so it runs concurrently.

use std::path::{Path, PathBuf};

use filetime::FileTime;
use futures::future::try_join_all;
use tracing::{debug, info};

use crate::errors::Result;
use crate::fs::{maybe_lstat, with_lock, FileSystem};

/// One deferred filesystem mutation.
///
/// `source` paths refer to the source backend, every other path to the
/// destination backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Remove whatever is at `path`, recursively.
    Remove { path: PathBuf },
    /// Create a directory; an "already exists" race is not an error.
    CreateDir { path: PathBuf, mode: u32 },
    /// Read `source` fully and write it to `destination`.
    CopyContent { source: PathBuf, destination: PathBuf },
    /// Write `source`'s content into the index entry, holding the entry lock.
    WriteIndexEntry { source: PathBuf, index_path: PathBuf },
    /// Hardlink `existing` at `path`.
    Link { existing: PathBuf, path: PathBuf },
    /// Recreate the symbolic link `source` at `destination`.
    Symlink { source: PathBuf, destination: PathBuf },
    SetTimes {
        path: PathBuf,
        atime: FileTime,
        mtime: FileTime,
        /// Follow a final symlink (used when the backend can't stamp links).
        follow: bool,
    },
    SetMode { path: PathBuf, mode: u32 },
}

impl Operation {
    /// Whether this operation belongs in the structural batch.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Operation::SetTimes { .. } | Operation::SetMode { .. })
    }

    /// The destination-side path this operation mutates.
    pub fn target(&self) -> &Path {
        match self {
            Operation::Remove { path }
            | Operation::CreateDir { path, .. }
            | Operation::Link { path, .. }
            | Operation::SetTimes { path, .. }
            | Operation::SetMode { path, .. } => path,
            Operation::CopyContent { destination, .. }
            | Operation::Symlink { destination, .. } => destination,
            Operation::WriteIndexEntry { index_path, .. } => index_path,
        }
    }
}

/// The two ordered operation lists accumulated while walking a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationBatches {
    structural: Vec<Operation>,
    finishing: Vec<Operation>,
}

impl OperationBatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_structural(&mut self, op: Operation) {
        debug_assert!(op.is_structural(), "metadata operation in structural batch");
        debug!(?op, "scheduled structural operation");
        self.structural.push(op);
    }

    pub fn push_finishing(&mut self, op: Operation) {
        debug_assert!(!op.is_structural(), "structural operation in finishing batch");
        debug!(?op, "scheduled finishing operation");
        self.finishing.push(op);
    }

    /// Move every operation of `other` to the end of the matching batch.
    pub fn append(&mut self, mut other: OperationBatches) {
        self.structural.append(&mut other.structural);
        self.finishing.append(&mut other.finishing);
    }

    pub fn structural(&self) -> &[Operation] {
        &self.structural
    }

    pub fn finishing(&self) -> &[Operation] {
        &self.finishing
    }

    pub fn len(&self) -> usize {
        self.structural.len() + self.finishing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structural.is_empty() && self.finishing.is_empty()
    }
}

/// Run both batches: structural operations one at a time in order, then all
/// finishing operations concurrently.
///
/// The first structural failure stops the run; nothing already applied is
/// rolled back.
pub async fn execute_batches(
    destination: &dyn FileSystem,
    source: &dyn FileSystem,
    batches: OperationBatches,
) -> Result<()> {
    let OperationBatches {
        structural,
        finishing,
    } = batches;
    let (structural_count, finishing_count) = (structural.len(), finishing.len());

    for op in &structural {
        apply(destination, source, op).await?;
    }

    try_join_all(finishing.iter().map(|op| apply(destination, source, op))).await?;

    info!(
        structural = structural_count,
        finishing = finishing_count,
        "applied copy operations"
    );
    Ok(())
}

async fn apply(destination: &dyn FileSystem, source: &dyn FileSystem, op: &Operation) -> Result<()> {
    debug!(?op, "applying operation");
    match op {
        Operation::Remove { path } => destination.remove(path).await,
        Operation::CreateDir { path, mode } => match destination.mkdir(path, Some(*mode)).await {
            Err(err) if err.is_already_exists() => {
                debug!(?path, "directory appeared concurrently");
                Ok(())
            }
            other => other,
        },
        Operation::CopyContent {
            source: from,
            destination: to,
        } => {
            let content = source.read_file(from).await?;
            destination.write_file(to, &content).await
        }
        Operation::WriteIndexEntry {
            source: from,
            index_path,
        } => {
            with_lock(destination, index_path, || async {
                let content = source.read_file(from).await?;
                // Rewriting a read-only entry in place needs the owner write bit.
                if let Some(stat) = maybe_lstat(destination, index_path).await? {
                    if stat.is_file() && stat.permissions() & 0o200 == 0 {
                        destination
                            .chmod(index_path, stat.permissions() | 0o200)
                            .await?;
                    }
                }
                destination.write_file(index_path, &content).await
            })
            .await
        }
        Operation::Link { existing, path } => destination.link(existing, path).await,
        Operation::Symlink {
            source: from,
            destination: to,
        } => {
            let target = source.read_link(from).await?;
            let converted = destination.from_portable(&source.to_portable(&target));
            destination.symlink(&converted, to).await
        }
        Operation::SetTimes {
            path,
            atime,
            mtime,
            follow,
        } => {
            if *follow {
                destination.set_times(path, *atime, *mtime).await
            } else {
                destination.set_symlink_times(path, *atime, *mtime).await
            }
        }
        Operation::SetMode { path, mode } => destination.chmod(path, *mode).await,
    }
}
