use async_trait::async_trait;

use crate::types::{RawSelection, SelectionRequest};

/// Adapter over a native folder chooser.
///
/// Implementations present a single-selection, folder-only chooser and
/// return what the user picked. They never acquire durable permission
/// themselves.
#[async_trait]
pub trait FolderPicker: Send + Sync {
    /// Whether a directory chooser exists on this platform at all.
    fn is_available(&self) -> bool;

    /// Present the chooser and wait for the user.
    ///
    /// Returns `None` when the user cancels or when no chooser is available.
    /// Dropping the returned future dismisses the chooser.
    async fn pick(&self, request: SelectionRequest) -> Option<RawSelection>;
}
