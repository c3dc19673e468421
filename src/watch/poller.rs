// src/watch/poller.rs

//! Stat-polling watcher for a single path.
//!
//! Backends have no native change notification, so a [`StatWatcher`]
//! re-stats its path on a timer and reports `(current, previous)` snapshots
//! whenever they differ. Each registered listener owns one interval task;
//! all tasks feed the same `poll`, so a change is reported once per tick of
//! any listener.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use filetime::FileTime;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::errors::{FsMirrorError, Result};
use crate::fs::{EntryKind, FileSystem, Stat};

/// Default poll interval for listeners registered without options.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5007);

/// Delay before a watcher on a missing path reports its initial state.
const MISSING_REEMIT_DELAY: Duration = Duration::from_millis(3);

/// Callback receiving `(current, previous)` snapshots.
pub type Listener = Arc<dyn Fn(&StatSnapshot, &StatSnapshot) + Send + Sync>;

/// Identifies one listener registration on a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Per-registration watch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Keep full timestamp precision instead of truncating to milliseconds.
    pub bigint: bool,
    /// Whether this listener keeps the watcher referenced (see
    /// [`StatWatcher::has_ref`]).
    pub persistent: bool,
    pub interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            bigint: false,
            persistent: true,
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Point-in-time view of a watched path.
///
/// A missing path is represented by [`StatSnapshot::empty`], where every
/// field is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatSnapshot {
    pub kind: Option<EntryKind>,
    pub mode: u32,
    pub size: u64,
    pub dev: u64,
    pub ino: u64,
    pub nlink: u64,
    pub atime: FileTime,
    pub mtime: FileTime,
}

impl StatSnapshot {
    pub fn empty() -> Self {
        Self {
            kind: None,
            mode: 0,
            size: 0,
            dev: 0,
            ino: 0,
            nlink: 0,
            atime: FileTime::zero(),
            mtime: FileTime::zero(),
        }
    }

    pub fn from_stat(stat: &Stat, bigint: bool) -> Self {
        let time = |t: FileTime| if bigint { t } else { truncate_to_millis(t) };
        Self {
            kind: Some(stat.kind),
            mode: stat.mode,
            size: stat.size,
            dev: stat.dev,
            ino: stat.ino,
            nlink: stat.nlink,
            atime: time(stat.atime),
            mtime: time(stat.mtime),
        }
    }

    pub fn exists(&self) -> bool {
        self.kind.is_some()
    }
}

fn truncate_to_millis(t: FileTime) -> FileTime {
    let nanos = t.nanoseconds() / 1_000_000 * 1_000_000;
    FileTime::from_unix_time(t.unix_seconds(), nanos)
}

/// Lifecycle of a [`StatWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Created, not polling yet.
    Ready,
    Running,
    /// Terminal. A new registration on the same path gets a fresh watcher.
    Stopped,
}

struct ListenerEntry {
    listener: Listener,
    persistent: bool,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    state: WatcherState,
    last: StatSnapshot,
    listeners: BTreeMap<ListenerId, ListenerEntry>,
    next_id: u64,
}

/// Polling watcher shared by every listener of one (filesystem, path) pair.
pub struct StatWatcher {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    bigint: bool,
    inner: Mutex<Inner>,
}

impl fmt::Debug for StatWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner();
        f.debug_struct("StatWatcher")
            .field("path", &self.path)
            .field("bigint", &self.bigint)
            .field("state", &inner.state)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl StatWatcher {
    pub fn new(fs: Arc<dyn FileSystem>, path: PathBuf, bigint: bool) -> Arc<Self> {
        Arc::new(Self {
            fs,
            path,
            bigint,
            inner: Mutex::new(Inner {
                state: WatcherState::Ready,
                last: StatSnapshot::empty(),
                listeners: BTreeMap::new(),
                next_id: 0,
            }),
        })
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> WatcherState {
        self.inner().state
    }

    pub fn listener_count(&self) -> usize {
        self.inner().listeners.len()
    }

    /// Last snapshot observed by the watcher.
    pub fn last_snapshot(&self) -> StatSnapshot {
        self.inner().last
    }

    /// Whether any listener asked to keep the watcher referenced.
    pub fn has_ref(&self) -> bool {
        self.inner().listeners.values().any(|entry| entry.persistent)
    }

    /// Take the initial snapshot and move to [`WatcherState::Running`].
    ///
    /// If the path doesn't exist, listeners receive `(empty, empty)` shortly
    /// afterwards so they learn about the initial state.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let handle = current_runtime()?;
        {
            let mut inner = self.inner();
            if inner.state != WatcherState::Ready {
                return Ok(());
            }
            inner.state = WatcherState::Running;
        }

        let initial = self.snapshot().await;
        self.inner().last = initial;
        debug!(path = ?self.path, exists = initial.exists(), "watcher started");

        if !initial.exists() {
            let weak = Arc::downgrade(self);
            handle.spawn(async move {
                tokio::time::sleep(MISSING_REEMIT_DELAY).await;
                if let Some(watcher) = weak.upgrade() {
                    watcher.emit_initial();
                }
            });
        }
        Ok(())
    }

    fn emit_initial(&self) {
        let (listeners, last) = {
            let inner = self.inner();
            if inner.state != WatcherState::Running {
                return;
            }
            (collect_listeners(&inner), inner.last)
        };
        for listener in listeners {
            listener(&last, &last);
        }
    }

    /// Register a listener and start its interval task.
    pub fn register(
        self: &Arc<Self>,
        options: WatchOptions,
        listener: Listener,
    ) -> Result<ListenerId> {
        let handle = current_runtime()?;
        let mut inner = self.inner();
        if inner.state == WatcherState::Stopped {
            return Err(FsMirrorError::Other(anyhow::anyhow!(
                "watcher for {:?} is stopped",
                self.path
            )));
        }

        let id = ListenerId(inner.next_id);
        inner.next_id += 1;

        let task = handle.spawn(poll_loop(Arc::downgrade(self), options.interval));
        inner.listeners.insert(
            id,
            ListenerEntry {
                listener,
                persistent: options.persistent,
                interval: options.interval,
                task: Some(task),
            },
        );
        debug!(path = ?self.path, ?id, interval = ?options.interval, "listener registered");
        Ok(id)
    }

    /// Remove one listener. Returns `true` if it was registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let removed = self.inner().listeners.remove(&id);
        match removed {
            Some(mut entry) => {
                if let Some(task) = entry.task.take() {
                    task.abort();
                }
                debug!(path = ?self.path, ?id, "listener removed");
                true
            }
            None => false,
        }
    }

    /// Poll intervals of the current listeners.
    pub fn intervals(&self) -> Vec<Duration> {
        self.inner()
            .listeners
            .values()
            .map(|entry| entry.interval)
            .collect()
    }

    /// Stop polling and drop every listener. Terminal.
    pub fn stop(&self) {
        let entries = {
            let mut inner = self.inner();
            inner.state = WatcherState::Stopped;
            std::mem::take(&mut inner.listeners)
        };
        for (_, mut entry) in entries {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
        }
        debug!(path = ?self.path, "watcher stopped");
    }

    /// Re-stat the path and notify listeners if anything changed.
    pub async fn poll(&self) {
        if self.state() != WatcherState::Running {
            return;
        }
        let current = self.snapshot().await;

        let (listeners, previous) = {
            let mut inner = self.inner();
            if inner.state != WatcherState::Running || inner.last == current {
                return;
            }
            let previous = std::mem::replace(&mut inner.last, current);
            (collect_listeners(&inner), previous)
        };

        trace!(path = ?self.path, ?current, ?previous, "change detected");
        for listener in listeners {
            listener(&current, &previous);
        }
    }

    async fn snapshot(&self) -> StatSnapshot {
        match self.fs.stat(&self.path).await {
            Ok(stat) => StatSnapshot::from_stat(&stat, self.bigint),
            Err(err) => {
                if !matches!(
                    err,
                    FsMirrorError::NotFound(_) | FsMirrorError::NotADirectory(_)
                ) {
                    debug!(path = ?self.path, error = %err, "stat failed while polling");
                }
                StatSnapshot::empty()
            }
        }
    }
}

impl Drop for StatWatcher {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in inner.listeners.values_mut() {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
        }
    }
}

fn collect_listeners(inner: &Inner) -> Vec<Listener> {
    inner
        .listeners
        .values()
        .map(|entry| Arc::clone(&entry.listener))
        .collect()
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|err| {
        FsMirrorError::Other(anyhow::anyhow!("watching requires a tokio runtime: {err}"))
    })
}

async fn poll_loop(watcher: Weak<StatWatcher>, period: Duration) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(watcher) = watcher.upgrade() else {
            break;
        };
        watcher.poll().await;
    }
}
