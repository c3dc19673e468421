// src/watch/mod.rs

//! Change notification for [`FileSystem`](crate::fs::FileSystem) backends.
//!
//! This module is responsible for:
//! - polling a path's stat on a timer and reporting differences
//!   ([`poller::StatWatcher`]);
//! - sharing one watcher between every listener of the same filesystem
//!   instance and path, and tearing it down when the last listener leaves
//!   ([`registry::WatcherRegistry`]).

pub mod poller;
pub mod registry;

pub use poller::{
    Listener, ListenerId, StatSnapshot, StatWatcher, WatchOptions, WatcherState, DEFAULT_INTERVAL,
};
pub use registry::{WatchRegistration, WatcherRegistry};
