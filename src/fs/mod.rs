// src/fs/mod.rs

//! Pluggable filesystem interface.
//!
//! Everything in the copy engine and the watch subsystem talks to a
//! [`FileSystem`] trait object instead of `std::fs`, so the same algorithms run
//! against the real disk ([`disk::DiskFileSystem`]) or an in-memory store
//! ([`memory::MemoryFileSystem`]).
//!
//! Backends only implement primitive operations. Composite helpers that every
//! backend shares ([`maybe_lstat`], [`mkdirp`], [`lock::with_lock`]) live here
//! as free functions over `&dyn FileSystem`.

use std::ffi::OsString;
use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use filetime::FileTime;
use tracing::debug;

use crate::errors::{FsMirrorError, Result};

pub mod disk;
pub mod lock;
pub mod memory;

pub use disk::DiskFileSystem;
pub use lock::with_lock;
pub use memory::{ListingOrder, MemoryFileSystem};

/// Type of a filesystem entry, as reported by `lstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    /// Sockets, FIFOs, devices: nothing the copy engine can materialize.
    Other,
}

/// Backend-neutral subset of `stat(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub kind: EntryKind,
    /// Permission bits (`0o7777` mask); the type lives in `kind`.
    pub mode: u32,
    pub size: u64,
    pub dev: u64,
    pub ino: u64,
    pub nlink: u64,
    pub atime: FileTime,
    pub mtime: FileTime,
}

impl Stat {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    /// `rwx` bits for user/group/other.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o777
    }

    /// Whether both stats describe the same underlying inode.
    pub fn same_inode(&self, other: &Stat) -> bool {
        self.dev == other.dev && self.ino == other.ino
    }
}

/// Abstract filesystem interface.
///
/// Paths handed to a backend are expected to be normalized with that
/// backend's own [`FileSystem::normalize`].
#[async_trait]
pub trait FileSystem: Send + Sync + Debug {
    /// Stat `path` without following a final symbolic link.
    async fn lstat(&self, path: &Path) -> Result<Stat>;

    /// Stat `path`, following symbolic links.
    async fn stat(&self, path: &Path) -> Result<Stat>;

    /// Create a single directory. Fails with `AlreadyExists` if anything is
    /// already present at `path`.
    async fn mkdir(&self, path: &Path, mode: Option<u32>) -> Result<()>;

    /// Return the names of the entries in a directory, in backend order.
    async fn read_dir(&self, path: &Path) -> Result<Vec<OsString>>;

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Create or truncate `path` and write `contents` into it.
    ///
    /// Writing to an existing file reuses its inode, so every hardlink to it
    /// observes the new content.
    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Create `path` only if nothing exists there yet.
    ///
    /// Returns `false` (not an error) when the path is already taken.
    async fn create_exclusive(&self, path: &Path, contents: &[u8]) -> Result<bool>;

    /// Create a hardlink at `path` pointing at `existing`.
    async fn link(&self, existing: &Path, path: &Path) -> Result<()>;

    /// Create a symbolic link at `path` whose target is `target`.
    async fn symlink(&self, target: &Path, path: &Path) -> Result<()>;

    async fn read_link(&self, path: &Path) -> Result<PathBuf>;

    /// Remove `path`, recursively if it is a directory.
    async fn remove(&self, path: &Path) -> Result<()>;

    async fn chmod(&self, path: &Path, mode: u32) -> Result<()>;

    /// Update access/modification times, following symbolic links.
    async fn set_times(&self, path: &Path, atime: FileTime, mtime: FileTime) -> Result<()>;

    /// Update the times of a symbolic link itself.
    ///
    /// Only called when [`FileSystem::supports_symlink_times`] is true.
    async fn set_symlink_times(&self, path: &Path, _atime: FileTime, _mtime: FileTime) -> Result<()> {
        Err(FsMirrorError::Other(anyhow::anyhow!(
            "setting symlink timestamps is not supported (on {:?})",
            path
        )))
    }

    fn supports_symlink_times(&self) -> bool {
        false
    }

    /// Whether `(dev, ino)` identifies file content stably on this backend.
    fn supports_inodes(&self) -> bool {
        true
    }

    fn normalize(&self, path: &Path) -> PathBuf {
        normalize_lexically(path)
    }

    /// Convert a path into the `/`-separated portable form used to move
    /// symlink targets between backends.
    fn to_portable(&self, path: &Path) -> String {
        path.to_string_lossy().replace('\\', "/")
    }

    /// Inverse of [`FileSystem::to_portable`].
    fn from_portable(&self, portable: &str) -> PathBuf {
        PathBuf::from(portable)
    }

    /// Hex-encoded BLAKE3 digest of the file's content.
    async fn checksum_file(&self, path: &Path) -> Result<String> {
        let content = self.read_file(path).await?;
        Ok(blake3::hash(&content).to_hex().to_string())
    }
}

/// Lexically normalize a path: drop `.` components and resolve `..` against
/// preceding normal components. Symbolic links are not consulted.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// `lstat` that maps an absent path to `None`.
///
/// Only "does not exist" conditions are swallowed; anything else (permission
/// errors, I/O failures) propagates.
pub async fn maybe_lstat(fs: &dyn FileSystem, path: &Path) -> Result<Option<Stat>> {
    match fs.lstat(path).await {
        Ok(stat) => Ok(Some(stat)),
        Err(FsMirrorError::NotFound(_)) | Err(FsMirrorError::NotADirectory(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Create `path` and every missing ancestor.
///
/// Newly created directories get `times` as `(atime, mtime)` when given, or
/// inherit their parent's times otherwise. Times are applied once the whole
/// chain exists, since creating a child bumps its parent's mtime. Returns the
/// first directory that had to be created, if any.
pub async fn mkdirp(
    fs: &dyn FileSystem,
    path: &Path,
    times: Option<(FileTime, FileTime)>,
) -> Result<Option<PathBuf>> {
    let mut chain: Vec<&Path> = path
        .ancestors()
        .filter(|p| !p.as_os_str().is_empty() && p.parent().is_some())
        .collect();
    chain.reverse();

    let mut created = Vec::new();
    for dir in chain {
        if let Some(stat) = maybe_lstat(fs, dir).await? {
            if !stat.is_dir() && !stat.is_symlink() {
                return Err(FsMirrorError::NotADirectory(dir.to_path_buf()));
            }
            continue;
        }

        match fs.mkdir(dir, None).await {
            Ok(()) => {}
            Err(err) if err.is_already_exists() => continue,
            Err(err) => return Err(err),
        }
        debug!(dir = ?dir, "created missing ancestor directory");
        created.push(dir);
    }

    // Outermost first, so inherited times come from an already stamped parent.
    for dir in &created {
        let (atime, mtime) = match (times, dir.parent()) {
            (Some(times), _) => times,
            (None, Some(parent)) => {
                let parent_stat = fs.stat(parent).await?;
                (parent_stat.atime, parent_stat.mtime)
            }
            (None, None) => continue,
        };
        fs.set_times(dir, atime, mtime).await?;
    }

    Ok(created.first().map(|dir| dir.to_path_buf()))
}
