//! Platform arbiters deciding whether a path may be accessed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};
use wispar_access_core::ScopedResource;

use crate::session::normalize;

/// How a path came to be vouched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOrigin {
    /// The user picked it in this process
    Selection,
    /// A bookmark for it was resolved in this process
    Bookmark,
}

#[derive(Debug, Clone)]
struct Grant {
    origin: GrantOrigin,
    granted_at: DateTime<Utc>,
}

/// Grant table for the token-based model.
///
/// A path is accessible only once something with the authority to vouch for
/// it (a user selection or a resolved bookmark) has done so in this process,
/// and only while the folder is still a directory the process can list.
///
/// Entries are keyed by normalized path, so re-selecting a folder refreshes
/// its grant instead of adding one. They are never evicted: a grant lives as
/// long as the process, and the table grows only with the number of distinct
/// folders the user picked or resolved. The durable half of the permission is
/// the bookmark the host stores.
#[derive(Debug, Default)]
pub struct GrantTable {
    grants: DashMap<PathBuf, Grant>,
}

impl GrantTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, path: &Path, origin: GrantOrigin) {
        let key = normalize(path);
        debug!("Granting {:?} access to {}", origin, key.display());
        self.grants.insert(
            key,
            Grant {
                origin,
                granted_at: Utc::now(),
            },
        );
    }

    pub fn revoke(&self, path: &Path) -> bool {
        self.grants.remove(&normalize(path)).is_some()
    }

    pub fn origin(&self, path: &Path) -> Option<GrantOrigin> {
        self.grants.get(&normalize(path)).map(|g| g.origin)
    }

    pub fn granted_at(&self, path: &Path) -> Option<DateTime<Utc>> {
        self.grants.get(&normalize(path)).map(|g| g.granted_at)
    }

    /// Number of distinct folders vouched for in this process.
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

/// Whether the process can actually list `path` right now.
fn listable(path: &Path) -> Result<(), std::io::Error> {
    std::fs::read_dir(path).map(|_| ())
}

impl ScopedResource for GrantTable {
    fn start_accessing(&self, path: &Path) -> bool {
        let key = normalize(path);
        if !self.grants.contains_key(&key) {
            debug!("No grant covers {}", key.display());
            return false;
        }
        match listable(&key) {
            Ok(()) => true,
            Err(e) => {
                debug!("Granted access to {} refused: {}", key.display(), e);
                false
            }
        }
    }

    fn stop_accessing(&self, path: &Path) {
        // The grant outlives the session: a later start in this process may reuse it.
        trace!("Stopped accessing {}", path.display());
    }
}

/// Arbiter for the implicit model: the OS' own permission registry decides.
///
/// Access is granted when the folder exists and the process can list it.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilesystemGrants;

impl ScopedResource for FilesystemGrants {
    fn start_accessing(&self, path: &Path) -> bool {
        match listable(path) {
            Ok(()) => true,
            Err(e) => {
                debug!("Implicit access to {} refused: {}", path.display(), e);
                false
            }
        }
    }

    fn stop_accessing(&self, path: &Path) {
        trace!("Stopped accessing {}", path.display());
    }
}
