//! Upload error types.

use drivelink_channel::ChannelError;
use drivelink_transfer::TransferError;

/// The upload session could not be created.
#[derive(Debug, thiserror::Error)]
pub enum InitiationError {
    #[error("server unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed initiation response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("initiation response did not include a file id")]
    MissingSessionId,
}

/// The upload channel failed or closed before the server confirmed the upload.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network connection lost during upload (close code {code})")]
    ConnectionLost { code: u16, reason: String },

    #[error("connection closed before the upload finished (close code {code})")]
    ClosedEarly { code: u16 },

    #[error("a WebSocket error occurred during upload: {0}")]
    Channel(String),

    #[error("could not open upload channel: {0}")]
    Connect(ChannelError),

    #[error("could not send chunk: {0}")]
    Send(ChannelError),

    #[error("could not read file: {0}")]
    Read(#[from] TransferError),
}

/// Failure of one of the two upload stages.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("lost connection to server during processing: {0}")]
    ConnectionLost(String),

    /// Explicit error reported by the server; displayed verbatim.
    #[error("{0}")]
    RemoteProcessing(String),
}

/// Errors from the read-only file catalog calls.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
