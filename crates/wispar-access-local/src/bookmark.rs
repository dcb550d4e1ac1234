//! Security-scoped bookmarks for the token-based access model.
//!
//! A bookmark records the canonical folder path and, on Unix, the folder's
//! `(device, inode)` identity so a folder that was deleted and recreated (or
//! replaced by something else) is detected as stale. Bookmarks are sealed with
//! HMAC-SHA256 under a per-installation key so a token minted elsewhere, or
//! edited by hand, never resolves to a path.
//!
//! Token layout before base64 (standard alphabet, padded):
//!
//! ```text
//! +---------+----------------------+----------------------+
//! | version | HMAC-SHA256 (32 B)   | JSON payload         |
//! +---------+----------------------+----------------------+
//! ```

use std::fs::Metadata;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use wispar_access_core::{AccessError, PersistentToken};

const BOOKMARK_VERSION: u8 = 1;
const TAG_LEN: usize = 32;
const KEY_LEN: usize = 32;
const MAX_TOKEN_CHARS: usize = 16 * 1024;
const KEY_MAX_ENCODED_CHARS: usize = 128;

/// File name of the installation key inside the data directory.
pub const KEY_FILE_NAME: &str = "bookmark.key";

type HmacSha256 = Hmac<Sha256>;

/// Filesystem identity of a bookmarked folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub device: u64,
    pub inode: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    pub fn of(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            device: metadata.dev(),
            inode: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    pub fn of(_metadata: &Metadata) -> Option<Self> {
        None
    }
}

/// What is found at a bookmark's path when it is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// Same folder as when the bookmark was made
    Present,
    /// Something exists at the path but it is not the bookmarked folder
    Replaced,
    Missing,
}

/// Decoded bookmark payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bookmark {
    pub path: PathBuf,
    #[serde(default)]
    pub identity: Option<FileIdentity>,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    /// Capture a bookmark for an existing folder.
    pub fn for_folder(path: &Path) -> Result<Self, AccessError> {
        let canonical = std::fs::canonicalize(path).map_err(|e| {
            AccessError::Encoding(format!("cannot canonicalize {}: {e}", path.display()))
        })?;
        let metadata = std::fs::metadata(&canonical).map_err(|e| {
            AccessError::Encoding(format!("cannot stat {}: {e}", canonical.display()))
        })?;
        if !metadata.is_dir() {
            return Err(AccessError::Encoding(format!(
                "{} is not a folder",
                canonical.display()
            )));
        }

        Ok(Self {
            identity: FileIdentity::of(&metadata),
            path: canonical,
            created_at: Utc::now(),
        })
    }

    pub fn check_target(&self) -> TargetStatus {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(_) => return TargetStatus::Missing,
        };
        if !metadata.is_dir() {
            return TargetStatus::Replaced;
        }
        match (self.identity, FileIdentity::of(&metadata)) {
            (Some(recorded), Some(current)) if recorded != current => TargetStatus::Replaced,
            _ => TargetStatus::Present,
        }
    }
}

/// Errors loading or creating the installation key.
#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    #[error("Failed to access bookmark key {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Bookmark key {} is malformed: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
}

/// Per-installation secret sealing every bookmark.
#[derive(Clone)]
pub struct BookmarkKey([u8; KEY_LEN]);

impl std::fmt::Debug for BookmarkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BookmarkKey").field(&self.fingerprint()).finish()
    }
}

impl BookmarkKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Short, non-secret identifier for logs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..4])
    }

    /// Load the key from `data_dir`, creating it on first use.
    ///
    /// A malformed key file is an error rather than a reason to rotate: a new
    /// key would silently invalidate every token the host has stored.
    pub fn load_or_create(data_dir: &Path) -> Result<Self, KeyFileError> {
        let path = data_dir.join(KEY_FILE_NAME);
        if let Some(key) = Self::read(&path)? {
            debug!("Loaded bookmark key {} from {}", key.fingerprint(), path.display());
            return Ok(key);
        }

        let key = Self::generate();
        match key.write_new(&path) {
            Ok(()) => {
                info!("Created bookmark key {} at {}", key.fingerprint(), path.display());
                Ok(key)
            }
            Err(KeyFileError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::AlreadyExists =>
            {
                // Another process created it first; theirs wins.
                Self::read(&path)?.ok_or_else(|| KeyFileError::Malformed {
                    path: path.clone(),
                    reason: "key file disappeared while being created".to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn read(path: &Path) -> Result<Option<Self>, KeyFileError> {
        let encoded = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(KeyFileError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let encoded = encoded.trim();
        if encoded.len() > KEY_MAX_ENCODED_CHARS {
            return Err(KeyFileError::Malformed {
                path: path.to_path_buf(),
                reason: format!("exceeds {KEY_MAX_ENCODED_CHARS} characters"),
            });
        }
        let bytes = hex::decode(encoded).map_err(|e| KeyFileError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let len = bytes.len();
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| KeyFileError::Malformed {
            path: path.to_path_buf(),
            reason: format!("expected {KEY_LEN} bytes, found {len}"),
        })?;
        Ok(Some(Self(bytes)))
    }

    fn write_new(&self, path: &Path) -> Result<(), KeyFileError> {
        let io_err = |source: std::io::Error| KeyFileError::Io {
            path: path.to_path_buf(),
            source,
        };
        let parent = path.parent().ok_or_else(|| KeyFileError::Malformed {
            path: path.to_path_buf(),
            reason: "key path has no parent directory".to_string(),
        })?;
        std::fs::create_dir_all(parent).map_err(io_err)?;

        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            temp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }
        temp.write_all(hex::encode(self.0).as_bytes()).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist_noclobber(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    fn mac(&self) -> Result<HmacSha256, String> {
        <HmacSha256 as Mac>::new_from_slice(&self.0).map_err(|e| e.to_string())
    }
}

/// Seals bookmarks into tokens and opens them again.
#[derive(Debug, Clone)]
pub struct BookmarkCodec {
    key: BookmarkKey,
}

impl BookmarkCodec {
    pub fn new(key: BookmarkKey) -> Self {
        Self { key }
    }

    pub fn key_fingerprint(&self) -> String {
        self.key.fingerprint()
    }

    pub fn encode(&self, bookmark: &Bookmark) -> Result<PersistentToken, AccessError> {
        let payload = serde_json::to_vec(bookmark)
            .map_err(|e| AccessError::Encoding(format!("failed to serialize bookmark: {e}")))?;

        let mut mac = self.key.mac().map_err(AccessError::Encoding)?;
        mac.update(&[BOOKMARK_VERSION]);
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();

        let mut bytes = Vec::with_capacity(1 + TAG_LEN + payload.len());
        bytes.push(BOOKMARK_VERSION);
        bytes.extend_from_slice(&tag);
        bytes.extend_from_slice(&payload);

        Ok(PersistentToken::new(
            base64::engine::general_purpose::STANDARD.encode(bytes),
        ))
    }

    pub fn decode(&self, token: &PersistentToken) -> Result<Bookmark, AccessError> {
        let encoded = token.as_str().trim();
        if encoded.is_empty() {
            return Err(AccessError::Decode("empty token".to_string()));
        }
        if encoded.len() > MAX_TOKEN_CHARS {
            return Err(AccessError::Decode(format!(
                "token exceeds {MAX_TOKEN_CHARS} characters"
            )));
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| AccessError::Decode(format!("not valid base64: {e}")))?;

        if bytes.len() <= 1 + TAG_LEN {
            return Err(AccessError::Decode("truncated bookmark".to_string()));
        }
        if bytes[0] != BOOKMARK_VERSION {
            return Err(AccessError::Decode(format!(
                "unsupported bookmark version {}",
                bytes[0]
            )));
        }

        let (tag, payload) = bytes[1..].split_at(TAG_LEN);
        let mut mac = self.key.mac().map_err(AccessError::Decode)?;
        mac.update(&bytes[..1]);
        mac.update(payload);
        mac.verify_slice(tag).map_err(|_| {
            AccessError::Decode("bookmark was not issued by this installation".to_string())
        })?;

        serde_json::from_slice(payload)
            .map_err(|e| AccessError::Decode(format!("malformed bookmark payload: {e}")))
    }
}
