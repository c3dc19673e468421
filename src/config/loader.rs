// src/config/loader.rs

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{FsMirrorError, Result};

/// Name of the config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "Fsmirror.toml";

/// Parse TOML text into a `RawConfigFile` without semantic validation.
pub fn parse_str(contents: &str) -> Result<RawConfigFile> {
    Ok(toml::from_str(contents)?)
}

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] to also
/// check value ranges.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents =
        std::fs::read_to_string(path).map_err(|err| FsMirrorError::from_io(path, err))?;
    parse_str(&contents)
}

/// Load a configuration file from path and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    ConfigFile::try_from(raw_config)
}

/// Load `path` if given, else the default file if present, else defaults.
///
/// An explicitly named file must exist; the default one is optional.
pub fn load_or_default(path: Option<&Path>) -> Result<ConfigFile> {
    match path {
        Some(path) => load_and_validate(path),
        None => {
            let default = default_config_path();
            if default.is_file() {
                debug!(path = ?default, "loading default config file");
                load_and_validate(&default)
            } else {
                Ok(ConfigFile::default())
            }
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}
