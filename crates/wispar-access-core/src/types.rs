use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AccessError;

/// Why the user is being asked to pick a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickPurpose {
    /// One-off export/import location; no durable permission is kept.
    Export,
    /// Relocating the working database; the selection is turned into a persistent token.
    PersistentConfigure,
}

/// What the picker is allowed to return. Only folders are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    #[default]
    Folder,
}

/// Transient request handed to a picker, discarded once the picker returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRequest {
    pub purpose: PickPurpose,
    pub content_kind: ContentKind,
}

impl SelectionRequest {
    pub fn folder(purpose: PickPurpose) -> Self {
        Self {
            purpose,
            content_kind: ContentKind::Folder,
        }
    }
}

/// What a picker returned for one pick operation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSelection {
    /// Absolute path or `file://` URI
    pub uri_or_path: String,
    pub is_folder: bool,
}

impl RawSelection {
    pub fn folder(uri_or_path: impl Into<String>) -> Self {
        Self {
            uri_or_path: uri_or_path.into(),
            is_folder: true,
        }
    }

    /// Convert the selection to a local absolute path.
    ///
    /// Accepts plain absolute paths and `file://` URIs.
    pub fn local_path(&self) -> Result<PathBuf, AccessError> {
        let raw = self.uri_or_path.trim();
        if raw.is_empty() {
            return Err(AccessError::InvalidArgument("empty selection".to_string()));
        }

        let path = if raw.starts_with("file:") {
            let parsed = url::Url::parse(raw)
                .map_err(|e| AccessError::InvalidArgument(format!("malformed URI {raw}: {e}")))?;
            parsed.to_file_path().map_err(|_| {
                AccessError::InvalidArgument(format!("URI does not name a local file: {raw}"))
            })?
        } else {
            PathBuf::from(raw)
        };

        if !path.is_absolute() {
            return Err(AccessError::InvalidArgument(format!(
                "selection is not an absolute path: {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

/// Opaque, durable credential for a previously selected folder.
///
/// The host stores the string in its own configuration and hands it back
/// unchanged; it must not parse or mutate it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistentToken(String);

impl PersistentToken {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for PersistentToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Path obtained by resolving a persistent token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub absolute_path: PathBuf,
    /// The grant can no longer be vouched for; the host must prompt re-selection
    /// and must not do I/O against `absolute_path`.
    pub is_stale: bool,
}

impl ResolvedPath {
    pub fn fresh(absolute_path: impl Into<PathBuf>) -> Self {
        Self {
            absolute_path: absolute_path.into(),
            is_stale: false,
        }
    }

    pub fn stale(absolute_path: impl Into<PathBuf>) -> Self {
        Self {
            absolute_path: absolute_path.into(),
            is_stale: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.absolute_path
    }
}

/// Which platform security model backs the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessModelKind {
    /// Capability tokens: app-held bookmarks exchanged for scoped access.
    #[default]
    #[serde(alias = "token", alias = "bookmark")]
    TokenBased,
    /// Implicit path access: the OS keeps its own persistent grant registry.
    #[serde(alias = "implicit", alias = "path")]
    ImplicitPath,
}

impl FromStr for AccessModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token" | "token_based" | "token-based" | "bookmark" => Ok(Self::TokenBased),
            "implicit" | "implicit_path" | "implicit-path" | "path" => Ok(Self::ImplicitPath),
            other => Err(format!(
                "unknown access model '{other}' (expected 'token' or 'implicit')"
            )),
        }
    }
}

impl std::fmt::Display for AccessModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TokenBased => f.write_str("token"),
            Self::ImplicitPath => f.write_str("implicit"),
        }
    }
}

/// Scoped access state of a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    Closed,
    /// Number of successful starts not yet matched by a stop
    Open(usize),
}
