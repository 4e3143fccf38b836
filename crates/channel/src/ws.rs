//! WebSocket-backed [`ChannelConnector`].

use std::future::Future;
use std::pin::Pin;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use drivelink_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::channel::{ChannelConnector, EVENT_QUEUE, OUTBOUND_QUEUE, TransportChannel};
use crate::error::ChannelError;
use crate::pumps;
use crate::types::{Frame, ReadyState, ReadyStateCell, TransportEvent};

impl From<Frame> for tungstenite::Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Self::Text(text.into()),
            Frame::Binary(data) => Self::Binary(data.into()),
        }
    }
}

/// Opens channels over `ws://` / `wss://`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    max_message_size: usize,
}

impl WsConnector {
    pub fn new() -> Self {
        Self {
            max_message_size: WS_MAX_MESSAGE_SIZE,
        }
    }

    fn ws_config(&self) -> WebSocketConfig {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.max_message_size);
        ws_config.max_frame_size = Some(self.max_message_size);
        ws_config
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelConnector for WsConnector {
    fn connect(
        &self,
        url: &str,
    ) -> Pin<Box<dyn Future<Output = Result<TransportChannel, ChannelError>> + Send + '_>> {
        let url = url.to_owned();
        Box::pin(async move {
            debug!(%url, "connecting");
            let ws_config = self.ws_config();
            let (ws_stream, _) =
                tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false)
                    .await?;
            info!(%url, "channel open");
            let (write, read) = ws_stream.split();

            let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
            let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
            let state = ReadyStateCell::new(ReadyState::Open);
            let cancel = CancellationToken::new();

            // Queued before the pumps start so it is always the first event.
            events_tx
                .send(TransportEvent::Open)
                .await
                .map_err(|_| ChannelError::Closed)?;

            tokio::spawn(pumps::write::write_pump(
                write,
                outbound_rx,
                state.clone(),
                cancel.clone(),
            ));
            tokio::spawn(pumps::read::read_pump(
                read,
                events_tx,
                state.clone(),
                cancel.clone(),
            ));

            Ok(TransportChannel::from_parts(
                outbound_tx,
                events_rx,
                state,
                cancel,
            ))
        })
    }
}
