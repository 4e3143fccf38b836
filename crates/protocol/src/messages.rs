use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session initiation (HTTP)
// ---------------------------------------------------------------------------

/// Body of `POST {api_base}/upload/initiate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiateUploadRequest {
    pub filename: String,
    pub size: u64,
    pub content_type: String,
}

/// Response of the initiation call.
///
/// `file_id` is optional on the wire so a malformed response can be told
/// apart from an undecodable one. Other fields are ignored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InitiateUploadResponse {
    #[serde(default)]
    pub file_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Processing channel frames
// ---------------------------------------------------------------------------

/// Frame layout on the wire: `{"type": "...", "value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
enum WireProgress {
    Progress(f64),
    Success(String),
    Error(String),
}

/// A status frame received on the processing channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressMessage {
    /// Remote processing percentage, clamped to `0..=100`.
    Progress(u8),
    /// Processing finished; carries the download locator.
    Success(String),
    /// Processing failed; carries the remote error detail.
    Error(String),
}

impl ProgressMessage {
    /// Decodes a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolViolation> {
        let wire: WireProgress = serde_json::from_str(text)
            .map_err(|e| ProtocolViolation::Undecodable(e.to_string()))?;
        match wire {
            WireProgress::Progress(value) if value.is_finite() => {
                Ok(Self::Progress(value.round().clamp(0.0, 100.0) as u8))
            }
            WireProgress::Progress(value) => Err(ProtocolViolation::Undecodable(format!(
                "progress value is not a number: {value}"
            ))),
            WireProgress::Success(locator) => Ok(Self::Success(locator)),
            WireProgress::Error(detail) => Ok(Self::Error(detail)),
        }
    }

    /// Encodes the message as a JSON text frame.
    pub fn encode(&self) -> String {
        let wire = match self {
            Self::Progress(p) => WireProgress::Progress(f64::from(*p)),
            Self::Success(locator) => WireProgress::Success(locator.clone()),
            Self::Error(detail) => WireProgress::Error(detail.clone()),
        };
        // A flat enum of numbers and strings always serializes.
        serde_json::to_string(&wire).unwrap_or_default()
    }

    /// Returns `true` for `Success` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Error(_))
    }
}

/// A frame that does not fit the processing channel protocol.
///
/// Violations are logged by the receiver and never surfaced to the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("undecodable status frame: {0}")]
    Undecodable(String),

    #[error("unexpected binary frame ({0} bytes)")]
    UnexpectedBinary(usize),

    #[error("status frame after terminal status: {0:?}")]
    AfterTerminal(ProgressMessage),
}

// ---------------------------------------------------------------------------
// File catalog (HTTP)
// ---------------------------------------------------------------------------

/// Metadata of a stored file, as returned by `GET {api_base}/files/{id}/meta`
/// and the upload history listing.
///
/// Fields the client does not model are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileMeta {
    #[serde(default, alias = "file_id")]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default, alias = "filesize")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_link: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
