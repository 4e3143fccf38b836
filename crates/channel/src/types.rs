//! Frames, lifecycle events and connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// One application-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Something that happened on a channel, in arrival order.
///
/// After a `Close` or `Error` no further events are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(Frame),
    Error(String),
    Close {
        /// `true` when the closing handshake completed.
        was_clean: bool,
        code: u16,
        reason: String,
    },
}

/// Connection state as seen by the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Shared, lock-free [`ReadyState`] cell.
#[derive(Debug, Clone)]
pub(crate) struct ReadyStateCell(Arc<AtomicU8>);

impl ReadyStateCell {
    pub(crate) fn new(state: ReadyState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub(crate) fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves `Connecting`/`Open` to `Closing`; later states are kept.
    pub(crate) fn begin_closing(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                (v < ReadyState::Closing as u8).then_some(ReadyState::Closing as u8)
            });
    }
}
