//! Caller-facing upload types.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use drivelink_protocol::constants::{DEFAULT_API_BASE, DEFAULT_CHUNK_SIZE, DEFAULT_WS_BASE};
use drivelink_transfer::{TransferError, detect_content_type};

/// Where one upload attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    #[default]
    Idle,
    Uploading,
    Processing,
    Success,
    Error,
}

impl UploadState {
    /// Returns `true` while an attempt is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Uploading | Self::Processing)
    }

    /// Returns `true` for `Success` and `Error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Everything a caller can observe about the current attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UploadSnapshot {
    pub state: UploadState,
    /// Stage 1 percentage (0..=100).
    pub browser_progress: u8,
    /// Stage 2 percentage as reported by the server (0..=100).
    pub processing_progress: u8,
    pub download_locator: Option<String>,
    pub error_message: Option<String>,
}

impl UploadSnapshot {
    pub(crate) fn uploading() -> Self {
        Self {
            state: UploadState::Uploading,
            ..Self::default()
        }
    }
}

/// A local file chosen for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

impl SelectedFile {
    /// Describes the file at `path`, guessing its content type from the
    /// extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(TransferError::NotAFile(path.display().to_string()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
            content_type: detect_content_type(path).to_string(),
        })
    }
}

/// Endpoints and tuning for the coordinator.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Base URL of the HTTP API, e.g. `http://localhost:5000/api/v1`.
    pub api_base: String,
    /// Base URL of the WebSocket API, e.g. `ws://localhost:5000/ws_api/ws`.
    pub ws_base: String,
    /// Bytes per binary frame; 0 selects the default.
    pub chunk_size: u32,
    /// Bearer token sent with HTTP calls. Never persisted by this crate.
    pub access_token: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            ws_base: DEFAULT_WS_BASE.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            access_token: None,
        }
    }
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("api_base", &self.api_base)
            .field("ws_base", &self.ws_base)
            .field("chunk_size", &self.chunk_size)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
