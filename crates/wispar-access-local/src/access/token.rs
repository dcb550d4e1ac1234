use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};
use wispar_access_core::{
    AccessError, AccessModel, AccessModelKind, PersistentToken, RawSelection, ResolvedPath,
};

use crate::bookmark::{Bookmark, BookmarkCodec, BookmarkKey, KeyFileError, TargetStatus};
use crate::grants::{GrantOrigin, GrantTable};
use crate::session::SessionManager;

/// Capability-token model: folders are reached through sealed bookmarks.
///
/// Access to a path in this process requires that a user selection or a
/// resolved bookmark vouched for it (see `GrantTable`). The bookmark is the
/// only thing that survives a restart.
pub struct TokenBasedAccess {
    codec: BookmarkCodec,
    grants: Arc<GrantTable>,
    sessions: SessionManager,
}

impl TokenBasedAccess {
    pub fn new(codec: BookmarkCodec) -> Self {
        let grants = Arc::new(GrantTable::new());
        let sessions = SessionManager::new(grants.clone());
        Self {
            codec,
            grants,
            sessions,
        }
    }

    /// Open the model with the installation key stored in `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, KeyFileError> {
        let key = BookmarkKey::load_or_create(data_dir)?;
        Ok(Self::new(BookmarkCodec::new(key)))
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn grants(&self) -> &GrantTable {
        &self.grants
    }
}

#[async_trait]
impl AccessModel for TokenBasedAccess {
    fn kind(&self) -> AccessModelKind {
        AccessModelKind::TokenBased
    }

    fn admit_selection(&self, selection: &RawSelection) -> Result<(), AccessError> {
        if !selection.is_folder {
            return Err(AccessError::InvalidArgument(
                "only folder selections carry a grant".to_string(),
            ));
        }
        let path = selection.local_path()?;
        self.grants.grant(&path, GrantOrigin::Selection);
        Ok(())
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

        // Held only while the bookmark is minted; released on every return below.
        let _guard = self
            .sessions
            .acquire(&path)
            .ok_or_else(|| AccessError::AccessDenied { path: path.clone() })?;

        let bookmark = Bookmark::for_folder(&path)?;
        let token = self.codec.encode(&bookmark)?;
        info!(
            "Created bookmark for {} (key {})",
            bookmark.path.display(),
            self.codec.key_fingerprint()
        );
        Ok(token)
    }

    #[instrument(skip(self, token), level = "debug")]
    async fn resolve_token(&self, token: &PersistentToken) -> Result<ResolvedPath, AccessError> {
        let bookmark = self.codec.decode(token)?;

        match bookmark.check_target() {
            TargetStatus::Missing => {
                warn!("Bookmarked folder {} no longer exists", bookmark.path.display());
                Err(AccessError::StaleBookmark {
                    path: bookmark.path,
                })
            }
            TargetStatus::Replaced => {
                warn!(
                    "Bookmarked folder {} was replaced, bookmark is stale",
                    bookmark.path.display()
                );
                Ok(ResolvedPath::stale(bookmark.path))
            }
            TargetStatus::Present => {
                self.grants.grant(&bookmark.path, GrantOrigin::Bookmark);
                if !self.sessions.start(&bookmark.path) {
                    return Err(AccessError::AccessDenied {
                        path: bookmark.path,
                    });
                }
                Ok(ResolvedPath::fresh(bookmark.path))
            }
        }
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

    fn model() -> TokenBasedAccess {
        TokenBasedAccess::new(BookmarkCodec::new(BookmarkKey::generate()))
    }

    fn selection(path: &Path) -> RawSelection {
        RawSelection::folder(path.to_string_lossy())
    }

    #[tokio::test]
    async fn test_create_requires_selection_grant() {
        let dir = TempDir::new().unwrap();
        let access = model();

        let err = access.create_token(&selection(dir.path())).await.unwrap_err();
        assert!(matches!(err, AccessError::AccessDenied { .. }));

        access.admit_selection(&selection(dir.path())).unwrap();
        access.create_token(&selection(dir.path())).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_releases_access_on_success_and_failure() {
        let dir = TempDir::new().unwrap();
        let access = model();
        access.admit_selection(&selection(dir.path())).unwrap();

        access.create_token(&selection(dir.path())).await.unwrap();
        assert_eq!(access.sessions().state(dir.path()), AccessState::Closed);

        let not_folder = RawSelection {
            uri_or_path: dir.path().to_string_lossy().to_string(),
            is_folder: false,
        };
        assert!(matches!(
            access.create_token(&not_folder).await,
            Err(AccessError::Encoding(_))
        ));
        assert!(access.sessions().active().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_opens_access() {
        let dir = TempDir::new().unwrap();
        let access = model();
        access.admit_selection(&selection(dir.path())).unwrap();
        let token = access.create_token(&selection(dir.path())).await.unwrap();

        let resolved = access.resolve_token(&token).await.unwrap();
        assert!(!resolved.is_stale);
        assert_eq!(resolved.absolute_path, std::fs::canonicalize(dir.path()).unwrap());
        assert_eq!(access.sessions().state(resolved.path()), AccessState::Open(1));
        assert_eq!(
            access.grants().origin(resolved.path()),
            Some(GrantOrigin::Bookmark)
        );

        assert!(access.stop_access(resolved.path()));
        assert_eq!(access.sessions().state(resolved.path()), AccessState::Closed);
    }

    #[tokio::test]
    async fn test_resolve_missing_folder_is_stale_error() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("WisparDB");
        std::fs::create_dir(&folder).unwrap();
        let access = model();
        access.admit_selection(&selection(&folder)).unwrap();
        let token = access.create_token(&selection(&folder)).await.unwrap();

        std::fs::remove_dir(&folder).unwrap();
        let err = access.resolve_token(&token).await.unwrap_err();
        assert!(matches!(err, AccessError::StaleBookmark { .. }));
        assert!(access.sessions().active().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_replaced_folder_is_stale_and_opens_nothing() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("WisparDB");
        std::fs::create_dir(&folder).unwrap();
        let access = model();
        access.admit_selection(&selection(&folder)).unwrap();
        let token = access.create_token(&selection(&folder)).await.unwrap();

        std::fs::remove_dir(&folder).unwrap();
        std::fs::write(&folder, b"impostor").unwrap();
        let resolved = access.resolve_token(&token).await.unwrap();
        assert!(resolved.is_stale);
        assert!(access.sessions().active().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_unreadable_folder_is_denied() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("WisparDB");
        std::fs::create_dir(&folder).unwrap();
        let access = model();
        access.admit_selection(&selection(&folder)).unwrap();
        let token = access.create_token(&selection(&folder)).await.unwrap();

        std::fs::set_permissions(&folder, std::fs::Permissions::from_mode(0o000)).unwrap();
        let privileged = std::fs::read_dir(&folder).is_ok();
        let resolved = access.resolve_token(&token).await;
        let started = access.start_access(&folder);
        std::fs::set_permissions(&folder, std::fs::Permissions::from_mode(0o755)).unwrap();

        if !privileged {
            assert!(matches!(resolved, Err(AccessError::AccessDenied { .. })));
            assert!(!started);
            assert!(access.sessions().active().is_empty());
        }
    }

    #[tokio::test]
    async fn test_start_on_unvouched_path_is_refused() {
        let dir = TempDir::new().unwrap();
        let access = model();
        assert!(!access.start_access(dir.path()));
        assert!(access.stop_access(dir.path()));
    }
}
