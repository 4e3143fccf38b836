//! Persistent, message-oriented transport channels.
//!
//! A [`TransportChannel`] is one bidirectional connection: frames go out
//! through a [`ChannelWriter`] and lifecycle events come back through
//! [`ChannelEvents`]. [`WsConnector`] opens channels over WebSocket.
//!
//! With the `test-util` feature, `TransportChannel::in_memory` builds a
//! channel driven by a `PeerHandle` instead of a socket.

pub mod channel;
pub mod error;
mod pumps;
pub mod types;
pub mod ws;

pub use channel::{ChannelConnector, ChannelEvents, ChannelWriter, TransportChannel};
#[cfg(any(test, feature = "test-util"))]
pub use channel::{HeldFrame, PeerHandle, Sent};
pub use error::ChannelError;
pub use types::{Frame, ReadyState, TransportEvent};
pub use ws::WsConnector;
