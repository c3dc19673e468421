use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use filetime::FileTime;
use fsmirror::errors::Result;
use fsmirror::fs::{FileSystem, Stat};

/// A mutating call observed by [`RecordingFileSystem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsCall {
    Mkdir(PathBuf),
    WriteFile(PathBuf),
    CreateExclusive(PathBuf),
    Link { existing: PathBuf, path: PathBuf },
    Symlink(PathBuf),
    Remove(PathBuf),
    Chmod(PathBuf, u32),
    SetTimes(PathBuf),
    SetSymlinkTimes(PathBuf),
}

impl FsCall {
    pub fn path(&self) -> &Path {
        match self {
            FsCall::Mkdir(p)
            | FsCall::WriteFile(p)
            | FsCall::CreateExclusive(p)
            | FsCall::Symlink(p)
            | FsCall::Remove(p)
            | FsCall::Chmod(p, _)
            | FsCall::SetTimes(p)
            | FsCall::SetSymlinkTimes(p) => p,
            FsCall::Link { path, .. } => path,
        }
    }
}

/// Wraps another backend and records every mutating call, in order.
///
/// Reads pass through unrecorded.
#[derive(Debug, Clone)]
pub struct RecordingFileSystem<F> {
    inner: F,
    calls: Arc<Mutex<Vec<FsCall>>>,
    hide_inodes: bool,
}

impl<F: FileSystem> RecordingFileSystem<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
            hide_inodes: false,
        }
    }

    /// Report `supports_inodes() == false`, forcing content comparison.
    pub fn without_inodes(mut self) -> Self {
        self.hide_inodes = true;
        self
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn calls(&self) -> Vec<FsCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: FsCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl<F: FileSystem> FileSystem for RecordingFileSystem<F> {
    async fn lstat(&self, path: &Path) -> Result<Stat> {
        self.inner.lstat(path).await
    }

    async fn stat(&self, path: &Path) -> Result<Stat> {
        self.inner.stat(path).await
    }

    async fn mkdir(&self, path: &Path, mode: Option<u32>) -> Result<()> {
        self.record(FsCall::Mkdir(path.to_path_buf()));
        self.inner.mkdir(path, mode).await
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<OsString>> {
        self.inner.read_dir(path).await
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read_file(path).await
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.record(FsCall::WriteFile(path.to_path_buf()));
        self.inner.write_file(path, contents).await
    }

    async fn create_exclusive(&self, path: &Path, contents: &[u8]) -> Result<bool> {
        self.record(FsCall::CreateExclusive(path.to_path_buf()));
        self.inner.create_exclusive(path, contents).await
    }

    async fn link(&self, existing: &Path, path: &Path) -> Result<()> {
        self.record(FsCall::Link {
            existing: existing.to_path_buf(),
            path: path.to_path_buf(),
        });
        self.inner.link(existing, path).await
    }

    async fn symlink(&self, target: &Path, path: &Path) -> Result<()> {
        self.record(FsCall::Symlink(path.to_path_buf()));
        self.inner.symlink(target, path).await
    }

    async fn read_link(&self, path: &Path) -> Result<PathBuf> {
        self.inner.read_link(path).await
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        self.record(FsCall::Remove(path.to_path_buf()));
        self.inner.remove(path).await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        self.record(FsCall::Chmod(path.to_path_buf(), mode));
        self.inner.chmod(path, mode).await
    }

    async fn set_times(&self, path: &Path, atime: FileTime, mtime: FileTime) -> Result<()> {
        self.record(FsCall::SetTimes(path.to_path_buf()));
        self.inner.set_times(path, atime, mtime).await
    }

    async fn set_symlink_times(&self, path: &Path, atime: FileTime, mtime: FileTime) -> Result<()> {
        self.record(FsCall::SetSymlinkTimes(path.to_path_buf()));
        self.inner.set_symlink_times(path, atime, mtime).await
    }

    fn supports_symlink_times(&self) -> bool {
        self.inner.supports_symlink_times()
    }

    fn supports_inodes(&self) -> bool {
        !self.hide_inodes && self.inner.supports_inodes()
    }

    fn normalize(&self, path: &Path) -> PathBuf {
        self.inner.normalize(path)
    }

    fn to_portable(&self, path: &Path) -> String {
        self.inner.to_portable(path)
    }

    fn from_portable(&self, portable: &str) -> PathBuf {
        self.inner.from_portable(portable)
    }

    async fn checksum_file(&self, path: &Path) -> Result<String> {
        self.inner.checksum_file(path).await
    }
}
