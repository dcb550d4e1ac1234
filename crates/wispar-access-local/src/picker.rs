//! Folder pickers for desktop hosts.

use std::path::PathBuf;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use wispar_access_core::{FolderPicker, PickPurpose, RawSelection, SelectionRequest};

/// Which desktop chooser to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickerKind {
    /// First chooser found on PATH
    #[default]
    Auto,
    Zenity,
    Kdialog,
    /// No chooser: every pick returns nothing
    None,
}

/// External directory chooser program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChooserTool {
    Zenity,
    Kdialog,
}

impl ChooserTool {
    pub fn program(&self) -> &'static str {
        match self {
            ChooserTool::Zenity => "zenity",
            ChooserTool::Kdialog => "kdialog",
        }
    }

    /// Command line for a single-selection, folder-only chooser.
    pub fn args(&self, request: &SelectionRequest) -> Vec<String> {
        let title = title_for(request.purpose).to_string();
        match self {
            ChooserTool::Zenity => vec![
                "--file-selection".to_string(),
                "--directory".to_string(),
                format!("--title={title}"),
            ],
            ChooserTool::Kdialog => {
                let start = dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("/"))
                    .to_string_lossy()
                    .to_string();
                vec![
                    "--getexistingdirectory".to_string(),
                    start,
                    "--title".to_string(),
                    title,
                ]
            }
        }
    }
}

fn title_for(purpose: PickPurpose) -> &'static str {
    match purpose {
        PickPurpose::Export => "Choose a folder for export",
        PickPurpose::PersistentConfigure => "Choose a folder for the Wispar database",
    }
}

/// Picker backed by an external desktop chooser.
///
/// With no chooser installed the picker is unavailable and every pick
/// returns `None` straight away.
#[derive(Debug, Clone)]
pub struct CommandPicker {
    tool: Option<(ChooserTool, PathBuf)>,
}

impl CommandPicker {
    /// Look the requested chooser up on PATH.
    pub fn detect(kind: PickerKind) -> Self {
        let candidates: &[ChooserTool] = match kind {
            PickerKind::Auto => &[ChooserTool::Zenity, ChooserTool::Kdialog],
            PickerKind::Zenity => &[ChooserTool::Zenity],
            PickerKind::Kdialog => &[ChooserTool::Kdialog],
            PickerKind::None => &[],
        };

        let tool = candidates.iter().find_map(|tool| {
            which::which(tool.program())
                .ok()
                .map(|program| (*tool, program))
        });

        match &tool {
            Some((tool, program)) => {
                info!("Using {:?} folder chooser at {}", tool, program.display())
            }
            None => warn!(
                "No folder chooser available ({:?}); picks will return nothing",
                kind
            ),
        }
        Self { tool }
    }

    /// Use a specific chooser binary.
    pub fn with_program(tool: ChooserTool, program: impl Into<PathBuf>) -> Self {
        Self {
            tool: Some((tool, program.into())),
        }
    }

    pub fn unavailable() -> Self {
        Self { tool: None }
    }
}

#[async_trait]
impl FolderPicker for CommandPicker {
    fn is_available(&self) -> bool {
        self.tool.is_some()
    }

    #[instrument(skip(self), level = "debug")]
    async fn pick(&self, request: SelectionRequest) -> Option<RawSelection> {
        let Some((tool, program)) = &self.tool else {
            debug!("No folder chooser, returning nothing");
            return None;
        };

        // kill_on_drop: a superseded pick dismisses its dialog.
        let output = match Command::new(program)
            .args(tool.args(&request))
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to run {}: {}", program.display(), e);
                return None;
            }
        };

        if !output.status.success() {
            debug!("Folder chooser closed without a selection ({})", output.status);
            return None;
        }

        let selected = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if selected.is_empty() {
            return None;
        }
        debug!("Folder chooser returned {}", selected);
        Some(RawSelection::folder(selected))
    }
}

/// Picker that always "selects" a preconfigured folder.
///
/// For non-interactive hosts and scripted runs. Without a folder it behaves
/// like a user who cancels every time.
#[derive(Debug, Clone, Default)]
pub struct StaticPicker {
    folder: Option<PathBuf>,
}

impl StaticPicker {
    pub fn new(folder: Option<PathBuf>) -> Self {
        Self { folder }
    }

    pub fn cancelling() -> Self {
        Self { folder: None }
    }
}

#[async_trait]
impl FolderPicker for StaticPicker {
    fn is_available(&self) -> bool {
        true
    }

    async fn pick(&self, request: SelectionRequest) -> Option<RawSelection> {
        let folder = self.folder.as_ref()?;
        debug!("Static pick for {:?}: {}", request.purpose, folder.display());
        Some(RawSelection::folder(folder.to_string_lossy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zenity_args_are_folder_only() {
        let args = ChooserTool::Zenity.args(&SelectionRequest::folder(PickPurpose::Export));
        assert!(args.contains(&"--directory".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--title=") && a.contains("export")));
        assert!(!args.iter().any(|a| a == "--multiple"));
    }

    #[test]
    fn test_kdialog_args() {
        let args = ChooserTool::Kdialog
            .args(&SelectionRequest::folder(PickPurpose::PersistentConfigure));
        assert_eq!(args[0], "--getexistingdirectory");
        assert!(args.last().unwrap().contains("database"));
    }

    #[tokio::test]
    async fn test_unavailable_picker_returns_none() {
        let picker = CommandPicker::unavailable();
        assert!(!picker.is_available());
        assert!(picker
            .pick(SelectionRequest::folder(PickPurpose::Export))
            .await
            .is_none());

        let picker = CommandPicker::detect(PickerKind::None);
        assert!(!picker.is_available());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_picker_reads_stdout() {
        // `echo` stands in for a chooser that prints the selected folder.
        let picker = CommandPicker::with_program(ChooserTool::Zenity, "echo");
        let selection = picker
            .pick(SelectionRequest::folder(PickPurpose::Export))
            .await
            .unwrap();
        assert!(selection.is_folder);
        assert!(selection.uri_or_path.contains("--directory"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_picker_failure_exit_is_cancel() {
        let picker = CommandPicker::with_program(ChooserTool::Zenity, "false");
        assert!(picker
            .pick(SelectionRequest::folder(PickPurpose::Export))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_static_picker() {
        let picker = StaticPicker::new(Some(PathBuf::from("/Documents/WisparDB")));
        let selection = picker
            .pick(SelectionRequest::folder(PickPurpose::PersistentConfigure))
            .await
            .unwrap();
        assert_eq!(selection, RawSelection::folder("/Documents/WisparDB"));

        assert!(StaticPicker::cancelling()
            .pick(SelectionRequest::folder(PickPurpose::Export))
            .await
            .is_none());
    }
}
