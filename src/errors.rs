// src/errors.rs

//! Crate-wide error type and helpers.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsMirrorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("No such file or directory: {0:?}")]
    NotFound(PathBuf),

    #[error("File already exists: {0:?}")]
    AlreadyExists(PathBuf),

    #[error("Not a directory: {0:?}")]
    NotADirectory(PathBuf),

    #[error("Is a directory: {0:?}")]
    IsADirectory(PathBuf),

    #[error("Directory not empty: {0:?}")]
    DirectoryNotEmpty(PathBuf),

    #[error("Unsupported file type at {path:?} ({kind})")]
    UnsupportedFileType { path: PathBuf, kind: String },

    #[error("Couldn't acquire a lock in a reasonable time (via {0:?})")]
    LockTimeout(PathBuf),

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FsMirrorError {
    /// Wrap an `io::Error` raised while touching `path`, mapping the error
    /// kinds the copy engine branches on to dedicated variants.
    pub fn from_io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => FsMirrorError::NotFound(path),
            io::ErrorKind::AlreadyExists => FsMirrorError::AlreadyExists(path),
            io::ErrorKind::NotADirectory => FsMirrorError::NotADirectory(path),
            io::ErrorKind::IsADirectory => FsMirrorError::IsADirectory(path),
            io::ErrorKind::DirectoryNotEmpty => FsMirrorError::DirectoryNotEmpty(path),
            _ => FsMirrorError::Io { path, source },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsMirrorError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, FsMirrorError::AlreadyExists(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FsMirrorError>;
