#![allow(dead_code)]

use std::path::{Path, PathBuf};

use filetime::FileTime;
use fsmirror::fs::{EntryKind, FileSystem};

pub use fsmirror_test_utils::{init_tracing, with_timeout, CopyOptionsBuilder, TreeBuilder};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Metadata and content of one entry, relative to the snapshot root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub mode: u32,
    pub atime: FileTime,
    pub mtime: FileTime,
    pub content: Option<Vec<u8>>,
    pub link_target: Option<PathBuf>,
}

/// Walk `root` (without following symlinks) and capture every entry, sorted
/// by path.
pub async fn snapshot_tree(fs: &dyn FileSystem, root: &Path) -> Vec<EntrySnapshot> {
    let mut out = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let path = root.join(&relative);
        let stat = fs.lstat(&path).await.expect("lstat during snapshot");

        let content = if stat.is_file() {
            Some(fs.read_file(&path).await.expect("read during snapshot"))
        } else {
            None
        };
        let link_target = if stat.is_symlink() {
            Some(fs.read_link(&path).await.expect("readlink during snapshot"))
        } else {
            None
        };
        if stat.is_dir() {
            for name in fs.read_dir(&path).await.expect("read_dir during snapshot") {
                pending.push(relative.join(name));
            }
        }

        out.push(EntrySnapshot {
            path: relative,
            kind: stat.kind,
            mode: stat.permissions(),
            atime: stat.atime,
            mtime: stat.mtime,
            content,
            link_target,
        });
    }

    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

pub async fn read_string(fs: &dyn FileSystem, path: impl AsRef<Path>) -> String {
    let bytes = fs.read_file(path.as_ref()).await.expect("read file");
    String::from_utf8(bytes).expect("utf-8 content")
}
