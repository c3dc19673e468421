// src/fs/memory.rs

//! In-memory [`FileSystem`] backend.
//!
//! Entries map paths to inode numbers, so hardlinks share content and
//! metadata exactly like on a POSIX disk. Timestamps come from a logical clock
//! that advances one second per mutation, which keeps tests deterministic
//! while still letting "later" writes have later mtimes.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use filetime::FileTime;

use super::{normalize_lexically, EntryKind, FileSystem, Stat};
use crate::errors::{FsMirrorError, Result};

/// First value of the logical clock (2023-11-14T22:13:20Z).
const CLOCK_EPOCH: i64 = 1_700_000_000;

const MAX_SYMLINK_HOPS: usize = 40;

static NEXT_DEVICE: AtomicU64 = AtomicU64::new(1);

/// Order in which [`MemoryFileSystem::read_dir`] reports entries.
///
/// Real filesystems return directory entries in an unspecified order; tests
/// use the non-sorted variants to emulate that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingOrder {
    #[default]
    Sorted,
    Reversed,
    /// Sorted, then rotated left by the given amount.
    Rotated(usize),
}

#[derive(Debug, Clone)]
enum NodeData {
    File(Vec<u8>),
    Dir,
    Symlink(PathBuf),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    mode: u32,
    nlink: u64,
    atime: FileTime,
    mtime: FileTime,
}

#[derive(Debug)]
struct State {
    entries: BTreeMap<PathBuf, u64>,
    nodes: HashMap<u64, Node>,
    next_ino: u64,
    clock: i64,
    listing: ListingOrder,
}

#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    device: u64,
    state: Arc<Mutex<State>>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        let now = FileTime::from_unix_time(CLOCK_EPOCH, 0);
        let mut state = State {
            entries: BTreeMap::new(),
            nodes: HashMap::new(),
            next_ino: 2,
            clock: CLOCK_EPOCH,
            listing: ListingOrder::Sorted,
        };
        // Ensure root exists
        state.nodes.insert(
            1,
            Node {
                data: NodeData::Dir,
                mode: 0o755,
                nlink: 1,
                atime: now,
                mtime: now,
            },
        );
        state.entries.insert(PathBuf::from("/"), 1);

        Self {
            device: NEXT_DEVICE.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn set_listing_order(&self, order: ListingOrder) {
        self.state().listing = order;
    }

    /// Synchronously add a file, creating missing parent directories.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = self.key(path.as_ref());
        let mut state = self.state();
        state.ensure_dir_chain(path.parent());
        state.insert_node(&path, NodeData::File(content.into()), 0o644);
    }

    /// Synchronously add a directory, creating missing parents.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = self.key(path.as_ref());
        self.state().ensure_dir_chain(Some(&path));
    }

    /// Synchronously add a symbolic link, creating missing parents.
    pub fn add_symlink(&self, target: impl AsRef<Path>, path: impl AsRef<Path>) {
        let path = self.key(path.as_ref());
        let mut state = self.state();
        state.ensure_dir_chain(path.parent());
        state.insert_node(
            &path,
            NodeData::Symlink(target.as_ref().to_path_buf()),
            0o777,
        );
    }

    /// Number of distinct inodes currently allocated (root included).
    pub fn inode_count(&self) -> usize {
        self.state().nodes.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(&self, path: &Path) -> PathBuf {
        normalize_lexically(&Path::new("/").join(path))
    }

    fn stat_of(&self, ino: u64, node: &Node) -> Stat {
        let (kind, size) = match &node.data {
            NodeData::File(content) => (EntryKind::File, content.len() as u64),
            NodeData::Dir => (EntryKind::Directory, 0),
            NodeData::Symlink(target) => {
                (EntryKind::Symlink, target.as_os_str().len() as u64)
            }
        };
        Stat {
            kind,
            mode: node.mode,
            size,
            dev: self.device,
            ino,
            nlink: node.nlink,
            atime: node.atime,
            mtime: node.mtime,
        }
    }
}

fn io_error(path: &Path, kind: io::ErrorKind) -> FsMirrorError {
    FsMirrorError::from_io(path, io::Error::from(kind))
}

impl State {
    fn tick(&mut self) -> FileTime {
        self.clock += 1;
        FileTime::from_unix_time(self.clock, 0)
    }

    fn node(&self, path: &Path) -> Result<(u64, &Node)> {
        let ino = *self
            .entries
            .get(path)
            .ok_or_else(|| io_error(path, io::ErrorKind::NotFound))?;
        let node = self
            .nodes
            .get(&ino)
            .ok_or_else(|| io_error(path, io::ErrorKind::NotFound))?;
        Ok((ino, node))
    }

    /// Follow symbolic links at the final component.
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let mut current = path.to_path_buf();
        for _ in 0..MAX_SYMLINK_HOPS {
            let (_, node) = self.node(&current)?;
            match &node.data {
                NodeData::Symlink(target) => {
                    let base = current.parent().unwrap_or(Path::new("/"));
                    current = normalize_lexically(&base.join(target));
                }
                _ => return Ok(current),
            }
        }
        Err(FsMirrorError::Other(anyhow::anyhow!(
            "too many levels of symbolic links: {:?}",
            path
        )))
    }

    /// Check that `path` can be created: parent is a directory, slot is free.
    fn check_vacant(&self, path: &Path) -> Result<()> {
        if self.entries.contains_key(path) {
            return Err(io_error(path, io::ErrorKind::AlreadyExists));
        }
        let parent = path.parent().unwrap_or(Path::new("/"));
        let (_, node) = self.node(parent)?;
        match node.data {
            NodeData::Dir => Ok(()),
            _ => Err(io_error(parent, io::ErrorKind::NotADirectory)),
        }
    }

    fn touch_parent(&mut self, path: &Path, now: FileTime) {
        if let Some(parent) = path.parent() {
            if let Some(ino) = self.entries.get(parent).copied() {
                if let Some(node) = self.nodes.get_mut(&ino) {
                    node.mtime = now;
                }
            }
        }
    }

    fn insert_node(&mut self, path: &Path, data: NodeData, mode: u32) -> u64 {
        let now = self.tick();
        let ino = self.next_ino;
        self.next_ino += 1;
        self.nodes.insert(
            ino,
            Node {
                data,
                mode,
                nlink: 1,
                atime: now,
                mtime: now,
            },
        );
        self.entries.insert(path.to_path_buf(), ino);
        self.touch_parent(path, now);
        ino
    }

    fn ensure_dir_chain(&mut self, path: Option<&Path>) {
        let Some(path) = path else { return };
        if self.entries.contains_key(path) {
            return;
        }
        self.ensure_dir_chain(path.parent());
        self.insert_node(path, NodeData::Dir, 0o755);
    }

    fn unlink(&mut self, path: &Path) {
        if let Some(ino) = self.entries.remove(path) {
            let drop_node = match self.nodes.get_mut(&ino) {
                Some(node) => {
                    node.nlink = node.nlink.saturating_sub(1);
                    node.nlink == 0
                }
                None => false,
            };
            if drop_node {
                self.nodes.remove(&ino);
            }
        }
    }

    fn children(&self, dir: &Path) -> Vec<OsString> {
        self.entries
            .range(dir.to_path_buf()..)
            .skip(1)
            .take_while(|(p, _)| p.starts_with(dir))
            .filter(|(p, _)| p.parent() == Some(dir))
            .filter_map(|(p, _)| p.file_name().map(|n| n.to_os_string()))
            .collect()
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn lstat(&self, path: &Path) -> Result<Stat> {
        let path = self.key(path);
        let state = self.state();
        let (ino, node) = state.node(&path)?;
        Ok(self.stat_of(ino, node))
    }

    async fn stat(&self, path: &Path) -> Result<Stat> {
        let path = self.key(path);
        let state = self.state();
        let resolved = state.resolve(&path)?;
        let (ino, node) = state.node(&resolved)?;
        Ok(self.stat_of(ino, node))
    }

    async fn mkdir(&self, path: &Path, mode: Option<u32>) -> Result<()> {
        let path = self.key(path);
        let mut state = self.state();
        state.check_vacant(&path)?;
        state.insert_node(&path, NodeData::Dir, mode.unwrap_or(0o755) & 0o7777);
        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<OsString>> {
        let path = self.key(path);
        let state = self.state();
        let resolved = state.resolve(&path)?;
        let (_, node) = state.node(&resolved)?;
        if !matches!(node.data, NodeData::Dir) {
            return Err(io_error(&path, io::ErrorKind::NotADirectory));
        }

        let mut names = state.children(&resolved);
        match state.listing {
            ListingOrder::Sorted => {}
            ListingOrder::Reversed => names.reverse(),
            ListingOrder::Rotated(n) => {
                if !names.is_empty() {
                    let len = names.len();
                    names.rotate_left(n % len);
                }
            }
        }
        Ok(names)
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let path = self.key(path);
        let state = self.state();
        let resolved = state.resolve(&path)?;
        match &state.node(&resolved)?.1.data {
            NodeData::File(content) => Ok(content.clone()),
            NodeData::Dir => Err(io_error(&path, io::ErrorKind::IsADirectory)),
            NodeData::Symlink(_) => Err(io_error(&path, io::ErrorKind::NotFound)),
        }
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let path = self.key(path);
        let mut state = self.state();

        let target = match state.resolve(&path) {
            Ok(resolved) => resolved,
            Err(err) if err.is_not_found() => {
                state.check_vacant(&path)?;
                state.insert_node(&path, NodeData::File(contents.to_vec()), 0o644);
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let ino = state.node(&target)?.0;
        let now = state.tick();
        let node = state
            .nodes
            .get_mut(&ino)
            .ok_or_else(|| io_error(&path, io::ErrorKind::NotFound))?;
        if !matches!(node.data, NodeData::File(_)) {
            return Err(io_error(&path, io::ErrorKind::IsADirectory));
        }
        node.data = NodeData::File(contents.to_vec());
        node.mtime = now;
        Ok(())
    }

    async fn create_exclusive(&self, path: &Path, contents: &[u8]) -> Result<bool> {
        let path = self.key(path);
        let mut state = self.state();
        match state.check_vacant(&path) {
            Ok(()) => {
                state.insert_node(&path, NodeData::File(contents.to_vec()), 0o644);
                Ok(true)
            }
            Err(err) if err.is_already_exists() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn link(&self, existing: &Path, path: &Path) -> Result<()> {
        let existing = self.key(existing);
        let path = self.key(path);
        let mut state = self.state();

        let (ino, node) = state.node(&existing)?;
        if matches!(node.data, NodeData::Dir) {
            return Err(FsMirrorError::from_io(
                &existing,
                io::Error::from(io::ErrorKind::PermissionDenied),
            ));
        }
        state.check_vacant(&path)?;

        let now = state.tick();
        if let Some(node) = state.nodes.get_mut(&ino) {
            node.nlink += 1;
        }
        state.entries.insert(path.clone(), ino);
        state.touch_parent(&path, now);
        Ok(())
    }

    async fn symlink(&self, target: &Path, path: &Path) -> Result<()> {
        let path = self.key(path);
        let mut state = self.state();
        state.check_vacant(&path)?;
        state.insert_node(&path, NodeData::Symlink(target.to_path_buf()), 0o777);
        Ok(())
    }

    async fn read_link(&self, path: &Path) -> Result<PathBuf> {
        let path = self.key(path);
        let state = self.state();
        match &state.node(&path)?.1.data {
            NodeData::Symlink(target) => Ok(target.clone()),
            _ => Err(io_error(&path, io::ErrorKind::InvalidInput)),
        }
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        let path = self.key(path);
        let mut state = self.state();
        state.node(&path)?;

        let doomed: Vec<PathBuf> = state
            .entries
            .range(path.clone()..)
            .take_while(|(p, _)| p.starts_with(&path))
            .map(|(p, _)| p.clone())
            .collect();
        for p in doomed {
            state.unlink(&p);
        }

        let now = state.tick();
        state.touch_parent(&path, now);
        Ok(())
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        let path = self.key(path);
        let mut state = self.state();
        let resolved = state.resolve(&path)?;
        let ino = state.node(&resolved)?.0;
        if let Some(node) = state.nodes.get_mut(&ino) {
            node.mode = mode & 0o7777;
        }
        Ok(())
    }

    async fn set_times(&self, path: &Path, atime: FileTime, mtime: FileTime) -> Result<()> {
        let path = self.key(path);
        let mut state = self.state();
        let resolved = state.resolve(&path)?;
        let ino = state.node(&resolved)?.0;
        if let Some(node) = state.nodes.get_mut(&ino) {
            node.atime = atime;
            node.mtime = mtime;
        }
        Ok(())
    }

    async fn set_symlink_times(&self, path: &Path, atime: FileTime, mtime: FileTime) -> Result<()> {
        let path = self.key(path);
        let mut state = self.state();
        let ino = state.node(&path)?.0;
        if let Some(node) = state.nodes.get_mut(&ino) {
            node.atime = atime;
            node.mtime = mtime;
        }
        Ok(())
    }

    fn supports_symlink_times(&self) -> bool {
        true
    }

    fn normalize(&self, path: &Path) -> PathBuf {
        self.key(path)
    }
}
