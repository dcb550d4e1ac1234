use std::path::Path;

use async_trait::async_trait;

use crate::error::AccessError;
use crate::types::{AccessModelKind, PersistentToken, RawSelection, ResolvedPath};

/// Platform arbiter for scoped access to a filesystem location.
///
/// This is the thing the OS provides: it decides whether the process may
/// touch `path` right now. Reference counting and pairing live above it in
/// the session manager, so `start_accessing` must be safe to call while
/// access is already open.
pub trait ScopedResource: Send + Sync {
    /// Begin scoped access. Returns whether the platform granted it.
    fn start_accessing(&self, path: &Path) -> bool;

    /// End scoped access. Called once, when the last session on `path` closes.
    fn stop_accessing(&self, path: &Path);
}

/// One platform security model: token minting/resolution plus start/stop.
///
/// Two variants exist. The token-based model mints app-held bookmarks and can
/// detect staleness. The implicit model relies on the OS' own persistent
/// grant registry: its tokens are plain paths and are never stale. That gap is
/// a platform capability difference.
#[async_trait]
pub trait AccessModel: Send + Sync {
    fn kind(&self) -> AccessModelKind;

    /// Record the transient grant the platform attaches to a fresh user selection.
    ///
    /// Lets the host start scoped access on a just-picked folder in this
    /// process without holding a token.
    fn admit_selection(&self, selection: &RawSelection) -> Result<(), AccessError>;

    /// Turn a one-time selection into a durable token.
    async fn create_token(&self, selection: &RawSelection) -> Result<PersistentToken, AccessError>;

    /// Exchange a stored token for a path.
    ///
    /// On a non-stale success scoped access is already open on the returned
    /// path and the caller owns the matching `stop_access`. A stale result
    /// opens nothing.
    async fn resolve_token(&self, token: &PersistentToken) -> Result<ResolvedPath, AccessError>;

    /// Begin scoped access on a path. Returns whether access was granted.
    fn start_access(&self, path: &Path) -> bool;

    /// End scoped access on a path. Stopping without a start is a no-op; always `true`.
    fn stop_access(&self, path: &Path) -> bool;

    /// Close every session still open. Returns how many paths were open.
    fn release_all(&self) -> usize;
}
