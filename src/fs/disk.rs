// src/fs/disk.rs

//! [`FileSystem`] implementation over the real disk (unix).

use std::ffi::OsString;
use std::fs::{Metadata, Permissions};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use filetime::FileTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{EntryKind, FileSystem, Stat};
use crate::errors::{FsMirrorError, Result};

/// Implementation that uses `tokio::fs` and `filetime`.
#[derive(Debug, Clone, Default)]
pub struct DiskFileSystem;

impl DiskFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn stat_from_metadata(meta: &Metadata) -> Stat {
    let file_type = meta.file_type();
    let kind = if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    };

    Stat {
        kind,
        mode: meta.mode() & 0o7777,
        size: meta.len(),
        dev: meta.dev(),
        ino: meta.ino(),
        nlink: meta.nlink(),
        atime: FileTime::from_last_access_time(meta),
        mtime: FileTime::from_last_modification_time(meta),
    }
}

/// Run a blocking `filetime` call off the async worker.
async fn blocking<F>(path: &Path, f: F) -> Result<()>
where
    F: FnOnce(&Path) -> std::io::Result<()> + Send + 'static,
{
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || f(&owned).map_err(|e| FsMirrorError::from_io(&owned, e)))
        .await
        .map_err(|e| FsMirrorError::Other(e.into()))?
}

#[async_trait]
impl FileSystem for DiskFileSystem {
    async fn lstat(&self, path: &Path) -> Result<Stat> {
        let meta = fs::symlink_metadata(path)
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))?;
        Ok(stat_from_metadata(&meta))
    }

    async fn stat(&self, path: &Path) -> Result<Stat> {
        let meta = fs::metadata(path)
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))?;
        Ok(stat_from_metadata(&meta))
    }

    async fn mkdir(&self, path: &Path, mode: Option<u32>) -> Result<()> {
        let mut builder = fs::DirBuilder::new();
        if let Some(mode) = mode {
            builder.mode(mode & 0o7777);
        }
        builder
            .create(path)
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<OsString>> {
        let mut entries = fs::read_dir(path)
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))?
        {
            names.push(entry.file_name());
        }
        Ok(names)
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        fs::write(path, contents)
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))
    }

    async fn create_exclusive(&self, path: &Path, contents: &[u8]) -> Result<bool> {
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(FsMirrorError::from_io(path, e)),
        };
        file.write_all(contents)
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))?;
        file.flush()
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))?;
        Ok(true)
    }

    async fn link(&self, existing: &Path, path: &Path) -> Result<()> {
        fs::hard_link(existing, path)
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))
    }

    async fn symlink(&self, target: &Path, path: &Path) -> Result<()> {
        fs::symlink(target, path)
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))
    }

    async fn read_link(&self, path: &Path) -> Result<PathBuf> {
        fs::read_link(path)
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path)
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))?;
        let res = if meta.is_dir() {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        };
        res.map_err(|e| FsMirrorError::from_io(path, e))
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, Permissions::from_mode(mode & 0o7777))
            .await
            .map_err(|e| FsMirrorError::from_io(path, e))
    }

    async fn set_times(&self, path: &Path, atime: FileTime, mtime: FileTime) -> Result<()> {
        blocking(path, move |p| filetime::set_file_times(p, atime, mtime)).await
    }

    async fn set_symlink_times(&self, path: &Path, atime: FileTime, mtime: FileTime) -> Result<()> {
        blocking(path, move |p| filetime::set_symlink_file_times(p, atime, mtime)).await
    }

    fn supports_symlink_times(&self) -> bool {
        true
    }
}
