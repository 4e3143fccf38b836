//! Channel error types.

use tokio_tungstenite::tungstenite;

use crate::types::ReadyState;

/// Errors produced while opening or writing to a channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("channel is not open (state: {0:?})")]
    NotOpen(ReadyState),

    #[error("send failed: {0}")]
    Send(String),

    #[error("channel closed")]
    Closed,
}
