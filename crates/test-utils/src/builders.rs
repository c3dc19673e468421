#![allow(dead_code)]

use std::path::{Path, PathBuf};

use fsmirror::copy::{CopyOptions, LinkStrategy};
use fsmirror::fs::MemoryFileSystem;

/// Builder for in-memory source trees.
///
/// Paths are relative to the builder's root.
pub struct TreeBuilder {
    fs: MemoryFileSystem,
    root: PathBuf,
}

impl TreeBuilder {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::on(MemoryFileSystem::new(), root)
    }

    /// Build into an existing filesystem.
    pub fn on(fs: MemoryFileSystem, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        fs.add_dir(&root);
        Self { fs, root }
    }

    pub fn file(self, path: &str, content: &str) -> Self {
        self.fs.add_file(self.root.join(path), content.as_bytes().to_vec());
        self
    }

    pub fn dir(self, path: &str) -> Self {
        self.fs.add_dir(self.root.join(path));
        self
    }

    pub fn symlink(self, path: &str, target: &str) -> Self {
        self.fs.add_symlink(target, self.root.join(path));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn build(self) -> MemoryFileSystem {
        self.fs
    }
}

/// Builder for `CopyOptions`.
#[derive(Default)]
pub struct CopyOptionsBuilder {
    options: CopyOptions,
}

impl CopyOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stable_time(mut self) -> Self {
        self.options.stable_time = true;
        self
    }

    pub fn stable_sort(mut self) -> Self {
        self.options.stable_sort = true;
        self
    }

    pub fn overwrite(mut self) -> Self {
        self.options.overwrite = true;
        self
    }

    pub fn index(mut self, index_path: impl Into<PathBuf>) -> Self {
        self.options.link_strategy = Some(LinkStrategy::HardlinkFromIndex {
            index_path: index_path.into(),
            auto_repair: false,
            read_only: false,
        });
        self
    }

    pub fn auto_repair(mut self) -> Self {
        if let Some(LinkStrategy::HardlinkFromIndex { auto_repair, .. }) =
            &mut self.options.link_strategy
        {
            *auto_repair = true;
        }
        self
    }

    pub fn read_only(mut self) -> Self {
        if let Some(LinkStrategy::HardlinkFromIndex { read_only, .. }) =
            &mut self.options.link_strategy
        {
            *read_only = true;
        }
        self
    }

    pub fn build(self) -> CopyOptions {
        self.options
    }
}
