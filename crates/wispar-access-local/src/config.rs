use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde::Deserialize;
use wispar_access_core::{AccessModelKind, BoundaryMode};

use crate::picker::PickerKind;

/// Broker configuration.
///
/// Parsed from flags/environment by the CLI and deserialized from the init
/// JSON by the FFI, e.g. `{"data_dir": "/path", "access_model": "implicit"}`.
#[derive(Args, Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the bookmark key (default: platform data dir + /wispar)
    #[arg(long, env = "WISPAR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Platform security model: token or implicit
    #[arg(long, default_value = "token", env = "WISPAR_ACCESS_MODEL")]
    pub access_model: AccessModelKind,

    /// Desktop folder chooser to drive
    #[arg(long, value_enum, default_value = "auto", env = "WISPAR_PICKER")]
    pub picker: PickerKind,

    /// Answer every pick with this folder instead of asking the user
    #[arg(long, env = "WISPAR_FOLDER")]
    pub folder: Option<PathBuf>,

    /// Attach error kinds to failed results instead of plain null/false
    #[arg(long, env = "WISPAR_DETAILED_RESULTS")]
    pub detailed_results: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            access_model: AccessModelKind::default(),
            picker: PickerKind::default(),
            folder: None,
            detailed_results: false,
        }
    }
}

impl Config {
    pub fn resolved_data_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join("wispar"))
                .context("No platform data directory; set WISPAR_DATA_DIR"),
        }
    }

    pub fn boundary_mode(&self) -> BoundaryMode {
        if self.detailed_results {
            BoundaryMode::Tagged
        } else {
            BoundaryMode::Collapsed
        }
    }
}
