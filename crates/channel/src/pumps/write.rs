//! WebSocket write pump, serialises outbound frames.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::channel::Outbound;
use crate::types::{ReadyState, ReadyStateCell};

/// Writes frames to the WebSocket, acknowledging each one once flushed.
///
/// A failed write marks the channel closed; the read pump reports why.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    state: ReadyStateCell,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut close_sent = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            item = outbound_rx.recv() => {
                match item {
                    Some(Outbound::Frame { frame, ack }) => {
                        let len = frame.len();
                        let result = write.send(frame.into()).await.map_err(|e| e.to_string());
                        let failed = result.is_err();
                        if let Err(e) = &result {
                            error!("WebSocket write error: {e}");
                            state.set(ReadyState::Closed);
                        } else {
                            trace!(len, "frame written");
                        }
                        let _ = ack.send(result);
                        if failed {
                            break;
                        }
                    }
                    Some(Outbound::Close) => {
                        debug!("sending close frame");
                        let _ = write
                            .send(tungstenite::Message::Close(Some(CloseFrame {
                                code: CloseCode::Normal,
                                reason: "".into(),
                            })))
                            .await;
                        close_sent = true;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    if !close_sent && state.get() != ReadyState::Closed {
        state.begin_closing();
        let _ = write.send(tungstenite::Message::Close(None)).await;
    }
}
