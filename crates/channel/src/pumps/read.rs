//! WebSocket read pump, turns incoming messages into [`TransportEvent`]s.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use drivelink_protocol::constants::{CLOSE_CODE_ABNORMAL, CLOSE_CODE_NO_STATUS};

use crate::types::{Frame, ReadyState, ReadyStateCell, TransportEvent};

/// Reads from the WebSocket until it ends, then emits exactly one terminal
/// event unless the channel was released locally.
pub(crate) async fn read_pump<S>(
    mut read: S,
    events_tx: mpsc::Sender<TransportEvent>,
    state: ReadyStateCell,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let terminal = loop {
        tokio::select! {
            _ = cancel.cancelled() => break None,
            msg = read.next() => {
                let event = match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        TransportEvent::Message(Frame::Text(text.as_str().to_owned()))
                    }
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        TransportEvent::Message(Frame::Binary(data.to_vec()))
                    }
                    Some(Ok(tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_))) => {
                        trace!("control frame");
                        continue;
                    }
                    Some(Ok(tungstenite::Message::Frame(_))) => continue,
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        debug!(?frame, "received close frame");
                        break Some(close_event(frame));
                    }
                    Some(Err(e)) => break Some(error_event(e)),
                    None => {
                        debug!("WebSocket stream ended");
                        break Some(TransportEvent::Close {
                            was_clean: false,
                            code: CLOSE_CODE_ABNORMAL,
                            reason: String::new(),
                        });
                    }
                };
                if events_tx.send(event).await.is_err() {
                    break None;
                }
            }
        }
    };

    state.set(ReadyState::Closed);
    if let Some(event) = terminal {
        let _ = events_tx.send(event).await;
    }
}

fn close_event(frame: Option<CloseFrame>) -> TransportEvent {
    match frame {
        Some(f) => TransportEvent::Close {
            was_clean: true,
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned(),
        },
        None => TransportEvent::Close {
            was_clean: true,
            code: CLOSE_CODE_NO_STATUS,
            reason: String::new(),
        },
    }
}

/// Resets and abrupt ends count as an unclean close; anything else is a
/// transport error.
fn error_event(e: tungstenite::Error) -> TransportEvent {
    match e {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            debug!("connection dropped: {e}");
            TransportEvent::Close {
                was_clean: false,
                code: CLOSE_CODE_ABNORMAL,
                reason: e.to_string(),
            }
        }
        tungstenite::Error::Io(ref io) if is_reset(io.kind()) => {
            debug!("connection reset: {e}");
            TransportEvent::Close {
                was_clean: false,
                code: CLOSE_CODE_ABNORMAL,
                reason: e.to_string(),
            }
        }
        other => {
            warn!("WebSocket read error: {other}");
            TransportEvent::Error(other.to_string())
        }
    }
}

fn is_reset(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
    )
}
