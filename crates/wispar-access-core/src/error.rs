use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Errors raised by pickers, token codecs and the session layer.
///
/// None of these cross the host bridge as a fault: the dispatcher turns every
/// variant into a null/false result (or a tagged error in detailed mode).
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("Folder selection was cancelled")]
    PickCancelled,

    #[error("Invalid persistent token: {0}")]
    Decode(String),

    #[error("Bookmark for {} is stale, the folder must be selected again", .path.display())]
    StaleBookmark { path: PathBuf },

    #[error("Scoped access to {} was denied", .path.display())]
    AccessDenied { path: PathBuf },

    #[error("Failed to create bookmark: {0}")]
    Encoding(String),

    #[error("Method not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AccessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccessError::PickCancelled => ErrorKind::PickCancelled,
            AccessError::Decode(_) => ErrorKind::DecodeError,
            AccessError::StaleBookmark { .. } => ErrorKind::StaleBookmark,
            AccessError::AccessDenied { .. } => ErrorKind::AccessDenied,
            AccessError::Encoding(_) => ErrorKind::EncodingError,
            AccessError::NotImplemented(_) => ErrorKind::NotImplemented,
            AccessError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            AccessError::Io(_) => ErrorKind::Io,
        }
    }

    /// True when the host has to send the user back through folder selection.
    pub fn requires_reselection(&self) -> bool {
        matches!(
            self,
            AccessError::StaleBookmark { .. }
                | AccessError::AccessDenied { .. }
                | AccessError::Decode(_)
        )
    }
}

/// Stable, serializable error code carried in tagged bridge replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PickCancelled,
    DecodeError,
    StaleBookmark,
    AccessDenied,
    EncodingError,
    NotImplemented,
    InvalidArgument,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PickCancelled => "pick_cancelled",
            ErrorKind::DecodeError => "decode_error",
            ErrorKind::StaleBookmark => "stale_bookmark",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::EncodingError => "encoding_error",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorKind::StaleBookmark).unwrap();
        assert_eq!(json, "\"stale_bookmark\"");
        assert_eq!(ErrorKind::StaleBookmark.as_str(), "stale_bookmark");
    }

    #[test]
    fn test_requires_reselection() {
        let stale = AccessError::StaleBookmark {
            path: PathBuf::from("/Documents/WisparDB"),
        };
        assert!(stale.requires_reselection());
        assert!(!AccessError::PickCancelled.requires_reselection());
        assert!(!AccessError::NotImplemented("x".into()).requires_reselection());
    }
}
