//! Scoped access session manager.
//!
//! Several logical operations may hold the same folder open at once. Each
//! successful `start` bumps a per-path count; each `stop` drops it, and the
//! platform grant is ended only when the count returns to zero. A `stop` with
//! nothing open is a no-op, so the count never goes negative.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};
use wispar_access_core::{AccessState, ScopedResource};

/// Lexically normalize a path so `/a/b`, `/a/b/` and `/a/./b` share one session.
pub fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

pub struct SessionManager {
    resource: Arc<dyn ScopedResource>,
    /// Open sessions: path -> number of unmatched starts
    open: DashMap<PathBuf, usize>,
}

impl SessionManager {
    pub fn new(resource: Arc<dyn ScopedResource>) -> Self {
        Self {
            resource,
            open: DashMap::new(),
        }
    }

    /// Begin scoped access. Returns the platform's answer.
    pub fn start(&self, path: &Path) -> bool {
        let key = normalize(path);
        // The shard lock is held across the platform call so start/stop on
        // one path are serialized.
        let entry = self.open.entry(key.clone());
        if !self.resource.start_accessing(&key) {
            debug!("Scoped access to {} refused by platform", key.display());
            return false;
        }

        let count = match entry {
            Entry::Occupied(mut e) => {
                *e.get_mut() += 1;
                *e.get()
            }
            Entry::Vacant(e) => {
                e.insert(1);
                1
            }
        };
        debug!("Started scoped access to {} (open={})", key.display(), count);
        true
    }

    /// End scoped access. Always `true`; stopping what was never started is a no-op.
    pub fn stop(&self, path: &Path) -> bool {
        let key = normalize(path);
        match self.open.entry(key) {
            Entry::Occupied(mut e) => {
                if *e.get() > 1 {
                    *e.get_mut() -= 1;
                    debug!("Stopped scoped access to {} (open={})", e.key().display(), e.get());
                } else {
                    let (key, _) = e.remove_entry();
                    self.resource.stop_accessing(&key);
                    debug!("Released scoped access to {}", key.display());
                }
            }
            Entry::Vacant(e) => {
                debug!("Stop without start for {}, ignoring", e.key().display());
            }
        }
        true
    }

    /// Begin access for the lifetime of the returned guard.
    pub fn acquire(&self, path: &Path) -> Option<AccessGuard<'_>> {
        if self.start(path) {
            Some(AccessGuard {
                sessions: self,
                path: normalize(path),
            })
        } else {
            None
        }
    }

    pub fn state(&self, path: &Path) -> AccessState {
        match self.open.get(&normalize(path)) {
            Some(count) => AccessState::Open(*count),
            None => AccessState::Closed,
        }
    }

    /// Snapshot of every open path and its count.
    pub fn active(&self) -> Vec<(PathBuf, usize)> {
        let mut active: Vec<_> = self
            .open
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        active.sort();
        active
    }

    /// Close every open session, e.g. on shutdown.
    ///
    /// Returns the number of paths that were still open.
    pub fn release_all(&self) -> usize {
        let paths: Vec<PathBuf> = self.open.iter().map(|e| e.key().clone()).collect();
        let mut released = 0;
        for path in paths {
            if let Some((path, count)) = self.open.remove(&path) {
                warn!(
                    "Releasing {} with {} unmatched start(s)",
                    path.display(),
                    count
                );
                self.resource.stop_accessing(&path);
                released += 1;
            }
        }
        released
    }
}

/// Scoped access held for a lexical scope; stopped on drop, on every exit path.
pub struct AccessGuard<'a> {
    sessions: &'a SessionManager,
    path: PathBuf,
}

impl AccessGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AccessGuard<'_> {
    fn drop(&mut self) {
        self.sessions.stop(&self.path);
    }
}
