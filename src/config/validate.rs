// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::copy::{CopyOptions, LinkStrategy};
use crate::errors::{FsMirrorError, Result};
use crate::watch::WatchOptions;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FsMirrorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.copy, raw.index, raw.watch))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_index(cfg)?;
    validate_watch(cfg)?;
    Ok(())
}

fn validate_index(cfg: &RawConfigFile) -> Result<()> {
    if let Some(index) = &cfg.index {
        if index.path.as_os_str().is_empty() {
            return Err(FsMirrorError::ConfigError(
                "[index].path must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_watch(cfg: &RawConfigFile) -> Result<()> {
    if cfg.watch.interval_ms == 0 {
        return Err(FsMirrorError::ConfigError(
            "[watch].interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

impl ConfigFile {
    /// Copy options described by `[copy]` and `[index]`.
    pub fn copy_options(&self) -> CopyOptions {
        CopyOptions {
            link_strategy: self.index.as_ref().map(|index| LinkStrategy::HardlinkFromIndex {
                index_path: index.path.clone(),
                auto_repair: index.auto_repair,
                read_only: index.read_only,
            }),
            stable_time: self.copy.stable_time,
            stable_sort: self.copy.stable_sort,
            overwrite: self.copy.overwrite,
        }
    }

    /// Watch options described by `[watch]`.
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            persistent: self.watch.persistent,
            interval: Duration::from_millis(self.watch.interval_ms),
            ..WatchOptions::default()
        }
    }
}
