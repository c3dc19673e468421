// src/watch/registry.rs

//! Table of active watchers, keyed by filesystem instance and path.
//!
//! At most one [`StatWatcher`] exists per (instance, path). Watchers are
//! created on the first registration and stopped and removed as soon as
//! their last listener goes away. Instances are retired explicitly with
//! [`WatcherRegistry::dispose`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{debug, info};

use super::poller::{ListenerId, StatSnapshot, StatWatcher, WatchOptions};
use crate::errors::Result;
use crate::fs::FileSystem;

/// Identity of a filesystem instance.
///
/// Every watcher keeps its instance alive through an `Arc`, so an address
/// can't be reused while its table holds watchers. A table emptied by
/// `unwatch`/`unwatch_all` holds no `Arc`; it stays until
/// [`WatcherRegistry::dispose`] and carries no state a later instance at the
/// same address could observe besides [`WatcherRegistry::knows`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FsKey(usize);

impl FsKey {
    fn of(fs: &Arc<dyn FileSystem>) -> Self {
        FsKey(Arc::as_ptr(fs) as *const () as usize)
    }
}

type PathTable = HashMap<PathBuf, Arc<StatWatcher>>;

/// Handle returned by a successful registration.
#[derive(Debug, Clone)]
pub struct WatchRegistration {
    path: PathBuf,
    listener: ListenerId,
    watcher: Arc<StatWatcher>,
}

impl WatchRegistration {
    /// Normalized path being watched.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pass to [`WatcherRegistry::unwatch`] to remove just this listener.
    pub fn listener_id(&self) -> ListenerId {
        self.listener
    }

    /// The watcher shared by every listener of this path.
    pub fn watcher(&self) -> &Arc<StatWatcher> {
        &self.watcher
    }
}

#[derive(Debug, Default)]
pub struct WatcherRegistry {
    tables: Mutex<HashMap<FsKey, PathTable>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> &'static WatcherRegistry {
        static GLOBAL: OnceLock<WatcherRegistry> = OnceLock::new();
        GLOBAL.get_or_init(WatcherRegistry::new)
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<FsKey, PathTable>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Watch `path` with the default options (millisecond timestamps,
    /// persistent, 5007 ms interval).
    pub async fn watch<F>(
        &self,
        fs: &Arc<dyn FileSystem>,
        path: &Path,
        listener: F,
    ) -> Result<WatchRegistration>
    where
        F: Fn(&StatSnapshot, &StatSnapshot) + Send + Sync + 'static,
    {
        self.watch_with_options(fs, path, WatchOptions::default(), listener)
            .await
    }

    /// Watch `path`, sharing the existing watcher if there is one.
    ///
    /// `options.bigint` only takes effect for the registration that creates
    /// the watcher.
    pub async fn watch_with_options<F>(
        &self,
        fs: &Arc<dyn FileSystem>,
        path: &Path,
        options: WatchOptions,
        listener: F,
    ) -> Result<WatchRegistration>
    where
        F: Fn(&StatSnapshot, &StatSnapshot) + Send + Sync + 'static,
    {
        let path = fs.normalize(path);

        let (watcher, created) = {
            let mut tables = self.tables();
            let table = tables.entry(FsKey::of(fs)).or_default();
            match table.get(&path) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let watcher = StatWatcher::new(Arc::clone(fs), path.clone(), options.bigint);
                    table.insert(path.clone(), Arc::clone(&watcher));
                    (watcher, true)
                }
            }
        };

        let listener_id = match watcher.register(options, Arc::new(listener)) {
            Ok(id) => id,
            Err(err) => {
                if created {
                    self.remove_if_idle(fs, &path, &watcher);
                }
                return Err(err);
            }
        };

        if created {
            info!(?path, "watching path");
            watcher.start().await?;
        }

        Ok(WatchRegistration {
            path,
            listener: listener_id,
            watcher,
        })
    }

    /// Remove `listener` from the watcher on `path`, or every listener when
    /// `None`. A watcher left without listeners is stopped and dropped.
    pub fn unwatch(&self, fs: &Arc<dyn FileSystem>, path: &Path, listener: Option<ListenerId>) {
        let path = fs.normalize(path);
        let key = FsKey::of(fs);

        let stopped = {
            let mut tables = self.tables();
            let Some(table) = tables.get_mut(&key) else {
                return;
            };
            let Some(watcher) = table.get(&path) else {
                return;
            };

            match listener {
                Some(id) => {
                    watcher.unregister(id);
                }
                None => watcher.stop(),
            }

            if watcher.listener_count() == 0 {
                table.remove(&path)
            } else {
                None
            }
        };

        if let Some(watcher) = stopped {
            watcher.stop();
            info!(?path, "stopped watching path");
        }
    }

    /// Unwatch every path registered for `fs`.
    pub fn unwatch_all(&self, fs: &Arc<dyn FileSystem>) {
        let watchers: Vec<Arc<StatWatcher>> = {
            let mut tables = self.tables();
            match tables.get_mut(&FsKey::of(fs)) {
                Some(table) => table.drain().map(|(_, watcher)| watcher).collect(),
                None => return,
            }
        };

        debug!(count = watchers.len(), "unwatching all paths");
        for watcher in watchers {
            watcher.stop();
        }
    }

    /// Unwatch everything for `fs` and forget the instance.
    pub fn dispose(&self, fs: &Arc<dyn FileSystem>) {
        self.unwatch_all(fs);
        self.tables().remove(&FsKey::of(fs));
    }

    /// Number of live watchers for `fs`.
    pub fn watcher_count(&self, fs: &Arc<dyn FileSystem>) -> usize {
        self.tables()
            .get(&FsKey::of(fs))
            .map_or(0, |table| table.len())
    }

    pub fn is_watching(&self, fs: &Arc<dyn FileSystem>, path: &Path) -> bool {
        let path = fs.normalize(path);
        self.tables()
            .get(&FsKey::of(fs))
            .is_some_and(|table| table.contains_key(&path))
    }

    /// The watcher currently serving `path`, if any.
    pub fn watcher_for(&self, fs: &Arc<dyn FileSystem>, path: &Path) -> Option<Arc<StatWatcher>> {
        let path = fs.normalize(path);
        self.tables()
            .get(&FsKey::of(fs))
            .and_then(|table| table.get(&path))
            .cloned()
    }

    /// Whether any table exists for `fs`, even an empty one.
    pub fn knows(&self, fs: &Arc<dyn FileSystem>) -> bool {
        self.tables().contains_key(&FsKey::of(fs))
    }

    fn remove_if_idle(&self, fs: &Arc<dyn FileSystem>, path: &Path, watcher: &Arc<StatWatcher>) {
        let mut tables = self.tables();
        if let Some(table) = tables.get_mut(&FsKey::of(fs)) {
            let same = table
                .get(path)
                .is_some_and(|current| Arc::ptr_eq(current, watcher));
            if same && watcher.listener_count() == 0 {
                table.remove(path);
            }
        }
    }
}
