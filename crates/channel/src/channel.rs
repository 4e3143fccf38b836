//! Channel handles and the connector seam.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;
use crate::types::{Frame, ReadyState, ReadyStateCell, TransportEvent};

pub(crate) const OUTBOUND_QUEUE: usize = 16;
pub(crate) const EVENT_QUEUE: usize = 256;

/// Work item for a channel's write side.
pub(crate) enum Outbound {
    /// Write a frame, then report the outcome on `ack`.
    Frame {
        frame: Frame,
        ack: oneshot::Sender<Result<(), String>>,
    },
    /// Start the closing handshake.
    Close,
}

/// Opens [`TransportChannel`]s to a URL.
pub trait ChannelConnector: Send + Sync {
    /// Connects to `url`. The returned channel is already open unless the
    /// implementation documents otherwise.
    fn connect(
        &self,
        url: &str,
    ) -> Pin<Box<dyn Future<Output = Result<TransportChannel, ChannelError>> + Send + '_>>;
}

/// One persistent bidirectional connection.
pub struct TransportChannel {
    writer: ChannelWriter,
    events: ChannelEvents,
}

impl TransportChannel {
    pub(crate) fn from_parts(
        outbound_tx: mpsc::Sender<Outbound>,
        events_rx: mpsc::Receiver<TransportEvent>,
        state: ReadyStateCell,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            writer: ChannelWriter {
                outbound_tx,
                state,
                cancel,
            },
            events: ChannelEvents { events_rx },
        }
    }

    /// Builds a channel with no network behind it. The returned
    /// [`PeerHandle`] plays the remote side.
    ///
    /// The channel starts in [`ReadyState::Connecting`]; call
    /// [`PeerHandle::open`] to open it.
    #[cfg(any(test, feature = "test-util"))]
    pub fn in_memory() -> (Self, PeerHandle) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let state = ReadyStateCell::new(ReadyState::Connecting);
        let cancel = CancellationToken::new();

        let peer = PeerHandle {
            outbound_rx,
            events_tx,
            state: state.clone(),
            cancel: cancel.clone(),
        };
        (
            Self::from_parts(outbound_tx, events_rx, state, cancel),
            peer,
        )
    }

    /// Separates the write half from the event stream so both can be
    /// driven concurrently.
    pub fn split(self) -> (ChannelWriter, ChannelEvents) {
        (self.writer, self.events)
    }

    pub fn ready_state(&self) -> ReadyState {
        self.writer.ready_state()
    }
}

/// Write half of a [`TransportChannel`].
///
/// Dropping the writer releases the connection.
pub struct ChannelWriter {
    outbound_tx: mpsc::Sender<Outbound>,
    state: ReadyStateCell,
    cancel: CancellationToken,
}

impl ChannelWriter {
    /// Sends one frame. Completes once the frame has been handed to the
    /// connection, so awaiting each send paces the caller to the link.
    pub async fn send(&self, frame: Frame) -> Result<(), ChannelError> {
        let state = self.state.get();
        if state != ReadyState::Open {
            return Err(ChannelError::NotOpen(state));
        }

        let (ack, ack_rx) = oneshot::channel();
        self.outbound_tx
            .send(Outbound::Frame { frame, ack })
            .await
            .map_err(|_| ChannelError::Closed)?;

        match ack_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ChannelError::Send(e)),
            Err(_) => Err(ChannelError::Closed),
        }
    }

    /// Starts a clean close. A no-op once the channel is closing.
    pub async fn close(&self) {
        if self.state.get() >= ReadyState::Closing {
            return;
        }
        self.state.begin_closing();
        let _ = self.outbound_tx.send(Outbound::Close).await;
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state.get()
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Event half of a [`TransportChannel`].
pub struct ChannelEvents {
    events_rx: mpsc::Receiver<TransportEvent>,
}

impl ChannelEvents {
    /// Waits for the next event. Returns `None` once the channel is gone
    /// and every event has been delivered.
    pub async fn next(&mut self) -> Option<TransportEvent> {
        self.events_rx.recv().await
    }

    /// Takes every event that has already arrived without waiting.
    pub fn drain_pending(&mut self) -> Vec<TransportEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            drained.push(event);
        }
        drained
    }
}

/// What the local side wrote to an in-memory channel.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Frame(Frame),
    Close,
}

/// A frame the in-memory peer has taken but not yet acknowledged.
///
/// The local `send` stays pending until [`HeldFrame::accept`] is called.
#[cfg(any(test, feature = "test-util"))]
pub struct HeldFrame {
    frame: Frame,
    ack: oneshot::Sender<Result<(), String>>,
}

#[cfg(any(test, feature = "test-util"))]
impl HeldFrame {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Acknowledges the frame, completing the local send.
    pub fn accept(self) -> Frame {
        let _ = self.ack.send(Ok(()));
        self.frame
    }
}

/// Remote end of an in-memory [`TransportChannel`].
#[cfg(any(test, feature = "test-util"))]
pub struct PeerHandle {
    outbound_rx: mpsc::Receiver<Outbound>,
    events_tx: mpsc::Sender<TransportEvent>,
    state: ReadyStateCell,
    cancel: CancellationToken,
}

#[cfg(any(test, feature = "test-util"))]
impl PeerHandle {
    /// Accepts the connection.
    pub async fn open(&self) {
        self.state.set(ReadyState::Open);
        self.emit(TransportEvent::Open).await;
    }

    /// Waits for the next thing the local side wrote, acknowledging frames.
    ///
    /// Returns `None` once the local writer has been dropped.
    pub async fn recv(&mut self) -> Option<Sent> {
        match self.outbound_rx.recv().await? {
            Outbound::Frame { frame, ack } => {
                let _ = ack.send(Ok(()));
                Some(Sent::Frame(frame))
            }
            Outbound::Close => Some(Sent::Close),
        }
    }

    /// Takes the next frame without acknowledging it.
    ///
    /// Returns `None` on a local close or once the local writer is dropped.
    pub async fn hold_next(&mut self) -> Option<HeldFrame> {
        match self.outbound_rx.recv().await? {
            Outbound::Frame { frame, ack } => Some(HeldFrame { frame, ack }),
            Outbound::Close => None,
        }
    }

    pub async fn send_text(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Message(Frame::Text(text.into())))
            .await;
    }

    pub async fn send_binary(&self, data: Vec<u8>) {
        self.emit(TransportEvent::Message(Frame::Binary(data))).await;
    }

    /// Closes the connection from the remote side.
    pub async fn close(&self, was_clean: bool, code: u16, reason: &str) {
        self.state.set(ReadyState::Closed);
        self.emit(TransportEvent::Close {
            was_clean,
            code,
            reason: reason.to_owned(),
        })
        .await;
    }

    /// Fails the connection with a transport error.
    pub async fn fail(&self, reason: &str) {
        self.state.set(ReadyState::Closed);
        self.emit(TransportEvent::Error(reason.to_owned())).await;
    }

    /// Returns `true` once the local side has dropped its writer or its
    /// event stream.
    pub fn is_released(&self) -> bool {
        self.cancel.is_cancelled() || self.events_tx.is_closed()
    }

    /// Waits until the local side releases the channel.
    pub async fn released(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.events_tx.closed() => {}
        }
    }

    async fn emit(&self, event: TransportEvent) {
        tracing::trace!(?event, "in-memory peer event");
        let _ = self.events_tx.send(event).await;
    }
}
