use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use wispar_access_core::{AccessModel, AccessModelKind, FolderPicker};

use crate::access::{ImplicitPathAccess, TokenBasedAccess};
use crate::config::Config;
use crate::dispatcher::BridgeDispatcher;
use crate::picker::{CommandPicker, StaticPicker};

/// Create the picker and access model described by `config`.
/// Shared between the CLI binary and the embedded staticlib.
pub fn create_backends(
    config: &Config,
) -> anyhow::Result<(Arc<dyn FolderPicker>, Arc<dyn AccessModel>)> {
    let picker: Arc<dyn FolderPicker> = match &config.folder {
        Some(folder) => {
            info!("  Picker: static ({})", folder.display());
            Arc::new(StaticPicker::new(Some(folder.clone())))
        }
        None => Arc::new(CommandPicker::detect(config.picker)),
    };

    let access: Arc<dyn AccessModel> = match config.access_model {
        AccessModelKind::TokenBased => {
            let data_dir = config.resolved_data_dir()?;
            let access = TokenBasedAccess::open(&data_dir)
                .with_context(|| format!("Failed to open bookmark key in {}", data_dir.display()))?;
            info!("  Access model: token (data dir {})", data_dir.display());
            Arc::new(access)
        }
        AccessModelKind::ImplicitPath => {
            info!("  Access model: implicit");
            Arc::new(ImplicitPathAccess::new())
        }
    };

    Ok((picker, access))
}

pub fn create_dispatcher(config: &Config) -> anyhow::Result<BridgeDispatcher> {
    let (picker, access) = create_backends(config)?;
    Ok(BridgeDispatcher::new(picker, access, config.boundary_mode()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_token_backend_creates_key() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: Some(dir.path().to_path_buf()),
            folder: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        let (picker, access) = create_backends(&config).unwrap();
        assert!(picker.is_available());
        assert_eq!(access.kind(), AccessModelKind::TokenBased);
        assert!(dir.path().join(crate::bookmark::KEY_FILE_NAME).exists());
    }

    #[test]
    fn test_implicit_backend_needs_no_data_dir() {
        let config = Config {
            access_model: AccessModelKind::ImplicitPath,
            picker: crate::picker::PickerKind::None,
            ..Config::default()
        };
        let (picker, access) = create_backends(&config).unwrap();
        assert!(!picker.is_available());
        assert_eq!(access.kind(), AccessModelKind::ImplicitPath);
    }

    #[test]
    fn test_malformed_key_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(crate::bookmark::KEY_FILE_NAME), "not hex").unwrap();
        let config = Config {
            data_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        assert!(create_dispatcher(&config).is_err());
    }
}
