// src/fs/lock.rs

//! Advisory per-path locks built from exclusive file creation.
//!
//! A lock on `p` is the file `p.flock` holding the owner's pid and a
//! per-acquisition token (`pid:token`). Because the lock is an ordinary file
//! on the backend itself, it serializes writers across processes sharing that
//! backend, not only tasks in this process.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::FileSystem;
use crate::errors::{FsMirrorError, Result};

const LOCK_SUFFIX: &str = ".flock";

/// Delay between two acquisition attempts (one frame at 60 Hz).
const RETRY_INTERVAL: Duration = Duration::from_micros(1_000_000 / 60);

/// Give up acquiring after this long.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);

/// A lock file whose owner can't be read is assumed to be mid-creation for
/// this long; after that it is treated as abandoned.
const UNREADABLE_GRACE: Duration = Duration::from_millis(500);

pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(LOCK_SUFFIX);
    PathBuf::from(os)
}

/// Tokens of the locks currently held by this process.
static HELD: Mutex<BTreeSet<u64>> = Mutex::new(BTreeSet::new());

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Marks one acquisition as live for as long as it exists.
///
/// Dropping it, including when the future owning it is abandoned, tells
/// other tasks of this process that a lock file with its token is stale.
struct HeldLock {
    token: u64,
}

impl HeldLock {
    fn new() -> Self {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        held_tokens().insert(token);
        Self { token }
    }

    fn owner(&self) -> String {
        format!("{}:{}", std::process::id(), self.token)
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        held_tokens().remove(&self.token);
    }
}

fn held_tokens() -> MutexGuard<'static, BTreeSet<u64>> {
    HELD.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `f` while holding the lock scoped to `path`.
///
/// The lock is released whether `f` succeeds or fails; failure to release is
/// logged, not returned. If the returned future is dropped before it
/// completes, the lock file stays behind: the next acquirer in this process
/// breaks it immediately, other processes once this one has exited.
pub async fn with_lock<F, Fut, T>(fs: &dyn FileSystem, path: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let lock_path = lock_path_for(path);
    let held = acquire(fs, &lock_path).await?;

    let result = f().await;

    if let Err(err) = fs.remove(&lock_path).await {
        warn!(lock = ?lock_path, error = %err, "failed to release lock");
    } else {
        debug!(lock = ?lock_path, "released lock");
    }
    drop(held);

    result
}

async fn acquire(fs: &dyn FileSystem, lock_path: &Path) -> Result<HeldLock> {
    let started = Instant::now();
    let held = HeldLock::new();
    let owner = held.owner();

    loop {
        if fs.create_exclusive(lock_path, owner.as_bytes()).await? {
            debug!(lock = ?lock_path, "acquired lock");
            return Ok(held);
        }

        if !holder_is_alive(fs, lock_path, started).await {
            warn!(lock = ?lock_path, "breaking stale lock");
            // Losing this race to another breaker is fine; retry either way.
            let _ = fs.remove(lock_path).await;
            continue;
        }

        if started.elapsed() >= ACQUIRE_TIMEOUT {
            return Err(FsMirrorError::LockTimeout(lock_path.to_path_buf()));
        }
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

/// Parse `pid` or `pid:token`.
fn parse_owner(content: &str) -> Option<(u32, Option<u64>)> {
    let mut parts = content.trim().splitn(2, ':');
    let pid = parts.next()?.parse().ok()?;
    let token = match parts.next() {
        Some(token) => Some(token.parse().ok()?),
        None => None,
    };
    Some((pid, token))
}

async fn holder_is_alive(fs: &dyn FileSystem, lock_path: &Path, started: Instant) -> bool {
    let owner = match fs.read_file(lock_path).await {
        Ok(content) => parse_owner(&String::from_utf8_lossy(&content)),
        Err(_) => None,
    };

    match owner {
        Some((pid, token)) if pid == std::process::id() => {
            token.is_none_or(|token| held_tokens().contains(&token))
        }
        Some((pid, _)) => process_is_alive(pid),
        None => started.elapsed() < UNREADABLE_GRACE,
    }
}

#[cfg(target_os = "linux")]
fn process_is_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_is_alive(_pid: u32) -> bool {
    true
}
