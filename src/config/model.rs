// src/config/model.rs

use std::path::PathBuf;

use serde::Deserialize;

use crate::watch::DEFAULT_INTERVAL;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [copy]
/// stable_time = true
/// stable_sort = true
/// overwrite = false
///
/// [index]
/// path = ".fsmirror/index"
/// auto_repair = true
/// read_only = false
///
/// [watch]
/// interval_ms = 5007
/// persistent = true
/// ```
///
/// Every section is optional. Without `[index]`, files are copied directly.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub copy: CopySection,

    #[serde(default)]
    pub index: Option<IndexSection>,

    #[serde(default)]
    pub watch: WatchSection,
}

/// `[copy]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopySection {
    #[serde(default)]
    pub stable_time: bool,

    #[serde(default)]
    pub stable_sort: bool,

    #[serde(default)]
    pub overwrite: bool,
}

/// `[index]` section: enables hardlink deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSection {
    pub path: PathBuf,

    #[serde(default)]
    pub auto_repair: bool,

    #[serde(default)]
    pub read_only: bool,
}

/// `[watch]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_persistent")]
    pub persistent: bool,
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL.as_millis() as u64
}

fn default_persistent() -> bool {
    true
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            persistent: default_persistent(),
        }
    }
}

/// Validated configuration. Build it with `ConfigFile::try_from`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub copy: CopySection,
    pub index: Option<IndexSection>,
    pub watch: WatchSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        copy: CopySection,
        index: Option<IndexSection>,
        watch: WatchSection,
    ) -> Self {
        Self { copy, index, watch }
    }
}
