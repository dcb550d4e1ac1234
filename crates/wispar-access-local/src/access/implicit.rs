use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};
use wispar_access_core::{
    AccessError, AccessModel, AccessModelKind, PersistentToken, RawSelection, ResolvedPath,
};

use crate::grants::FilesystemGrants;
use crate::session::SessionManager;

/// Implicit path model: the OS keeps the persistent grant, the app keeps a path.
///
/// Tokens are the absolute path itself and resolution is the identity, so a
/// resolved path is never reported stale. There is no app-held credential to
/// go stale; a folder that vanished simply fails to open.
pub struct ImplicitPathAccess {
    sessions: SessionManager,
}

impl Default for ImplicitPathAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl ImplicitPathAccess {
    pub fn new() -> Self {
        Self {
            sessions: SessionManager::new(Arc::new(FilesystemGrants)),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}

#[async_trait]
impl AccessModel for ImplicitPathAccess {
    fn kind(&self) -> AccessModelKind {
        AccessModelKind::ImplicitPath
    }

    fn admit_selection(&self, selection: &RawSelection) -> Result<(), AccessError> {
        // Nothing to record: the OS granted the selection itself.
        selection.local_path().map(|_| ())
    }

    #[instrument(
        skip(self, selection),
        level = "debug",
        fields(selection = %selection.uri_or_path)
    )]
    async fn create_token(&self, selection: &RawSelection) -> Result<PersistentToken, AccessError> {
        if !selection.is_folder {
            return Err(AccessError::Encoding(
                "only folders can be bookmarked".to_string(),
            ));
        }
        let path = selection.local_path()?;
        let _guard = self
            .sessions
            .acquire(&path)
            .ok_or_else(|| AccessError::AccessDenied { path: path.clone() })?;

        let encoded = path.to_str().ok_or_else(|| {
            AccessError::Encoding(format!("{} is not valid UTF-8", path.display()))
        })?;
        debug!("Using plain path token for {}", encoded);
        Ok(PersistentToken::new(encoded))
    }

    #[instrument(skip(self, token), level = "debug")]
    async fn resolve_token(&self, token: &PersistentToken) -> Result<ResolvedPath, AccessError> {
        let raw = token.as_str();
        if raw.trim().is_empty() {
            return Err(AccessError::Decode("empty token".to_string()));
        }
        let path = PathBuf::from(raw);
        if !path.is_absolute() {
            return Err(AccessError::Decode(format!(
                "token is not an absolute path: {raw}"
            )));
        }

        if !self.sessions.start(&path) {
            return Err(AccessError::AccessDenied { path });
        }
        Ok(ResolvedPath::fresh(path))
    }

    fn start_access(&self, path: &Path) -> bool {
        self.sessions.start(path)
    }

    fn stop_access(&self, path: &Path) -> bool {
        self.sessions.stop(path)
    }

    fn release_all(&self) -> usize {
        self.sessions.release_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wispar_access_core::AccessState;

    #[tokio::test]
    async fn test_token_is_the_path() {
        let dir = TempDir::new().unwrap();
        let access = ImplicitPathAccess::new();
        let selection = RawSelection::folder(dir.path().to_string_lossy());

        let token = access.create_token(&selection).await.unwrap();
        assert_eq!(token.as_str(), dir.path().to_string_lossy());

        let resolved = access.resolve_token(&token).await.unwrap();
        assert_eq!(resolved.absolute_path, dir.path());
        assert!(!resolved.is_stale);
        assert_eq!(access.sessions().state(dir.path()), AccessState::Open(1));
    }

    #[tokio::test]
    async fn test_resolve_rejects_relative_and_missing() {
        let dir = TempDir::new().unwrap();
        let access = ImplicitPathAccess::new();

        let err = access
            .resolve_token(&PersistentToken::new("WisparDB"))
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Decode(_)));

        let missing = dir.path().join("gone");
        let err = access
            .resolve_token(&PersistentToken::new(missing.to_string_lossy()))
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn test_start_stop_start() {
        let dir = TempDir::new().unwrap();
        let access = ImplicitPathAccess::new();

        assert!(access.start_access(dir.path()));
        assert!(access.stop_access(dir.path()));
        assert!(access.start_access(dir.path()));
        assert!(access.stop_access(dir.path()));
        assert!(access.stop_access(dir.path()));
        assert_eq!(access.sessions().state(dir.path()), AccessState::Closed);
    }
}
