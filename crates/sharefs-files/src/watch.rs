//! Watches on catalogued directories.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::SystemTime;

#[derive(Debug)]
struct Watch {
    path: PathBuf,
    mtime: SystemTime,
    observers: HashSet<Ipv4Addr>,
}

/// Directories peers have catalogued, keyed by directory handle
#[derive(Debug, Default)]
pub struct WatchTable {
    watches: HashMap<u32, Watch>,
}

impl WatchTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `peer` catalogued `path`
    pub fn observe(&mut self, dir_handle: u32, path: PathBuf, mtime: SystemTime, peer: Ipv4Addr) {
        let watch = self.watches.entry(dir_handle).or_insert_with(|| Watch {
            path,
            mtime,
            observers: HashSet::new(),
        });
        watch.observers.insert(peer);
    }

    /// Remove `peer` from every watch, dropping watches left without observers
    pub fn forget_peer(&mut self, peer: Ipv4Addr) {
        self.watches.retain(|_, w| {
            w.observers.remove(&peer);
            !w.observers.is_empty()
        });
    }

    /// Stat every watched path. Returns the handles whose mtime moved;
    /// watches on vanished paths are dropped.
    pub fn poll(&mut self) -> Vec<u32> {
        let mut changed = Vec::new();
        self.watches.retain(|handle, w| {
            match std::fs::metadata(&w.path).and_then(|m| m.modified()) {
                Ok(mtime) => {
                    if mtime != w.mtime {
                        w.mtime = mtime;
                        changed.push(*handle);
                    }
                    true
                }
                Err(_) => {
                    tracing::debug!("Watched directory {} vanished", w.path.display());
                    false
                }
            }
        });
        changed.sort_unstable();
        changed
    }

    /// Whether `dir_handle` is watched
    pub fn contains(&self, dir_handle: u32) -> bool {
        self.watches.contains_key(&dir_handle)
    }

    /// Number of watches
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    /// Whether nothing is watched
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }
}
