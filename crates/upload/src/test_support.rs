//! Fakes shared by the unit tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use drivelink_channel::{
    ChannelConnector, ChannelError, Frame, PeerHandle, Sent, TransportChannel,
};
use drivelink_protocol::constants::END_OF_STREAM_MARKER;
use drivelink_protocol::{InitiateUploadRequest, UploadSession};

use crate::error::InitiationError;
use crate::initiator::SessionInitiator;

/// Head and body of a request received by [`serve_http_once`].
pub(crate) struct CapturedRequest {
    pub head: String,
    pub body: String,
}

/// Answers exactly one HTTP request with `status` and a JSON `body`.
///
/// Returns the server's base URL and the captured request.
pub(crate) async fn serve_http_once(
    status: &'static str,
    body: &'static str,
) -> (String, oneshot::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < header_end + content_length {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let request_body = String::from_utf8_lossy(&buf[header_end..]).into_owned();

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;
        let _ = tx.send(CapturedRequest {
            head,
            body: request_body,
        });
    });

    (format!("http://{addr}"), rx)
}

/// Canned initiation outcome.
#[derive(Debug, Clone)]
pub(crate) enum InitReply {
    Session(&'static str),
    MissingId,
    Status(u16),
}

pub(crate) struct MockInitiator {
    reply: InitReply,
    pub calls: Mutex<Vec<InitiateUploadRequest>>,
}

impl MockInitiator {
    pub(crate) fn new(reply: InitReply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: Mutex::new(Vec::new()),
        })
    }
}

impl SessionInitiator for MockInitiator {
    fn initiate(
        &self,
        request: InitiateUploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UploadSession, InitiationError>> + Send + '_>> {
        self.calls.lock().unwrap().push(request.clone());
        let reply = self.reply.clone();
        Box::pin(async move {
            match reply {
                InitReply::Session(id) => Ok(UploadSession {
                    session_id: id.into(),
                    filename: request.filename,
                    size_bytes: request.size,
                    content_type: request.content_type,
                }),
                InitReply::MissingId => Err(InitiationError::MissingSessionId),
                InitReply::Status(code) => Err(InitiationError::Status(
                    reqwest::StatusCode::from_u16(code).unwrap(),
                )),
            }
        })
    }
}

/// Hands every in-memory channel it opens to the test as a [`PeerHandle`].
pub(crate) struct MockConnector {
    peers_tx: mpsc::UnboundedSender<(String, PeerHandle)>,
    pub urls: Mutex<Vec<String>>,
}

impl MockConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, PeerHandle)>) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers_tx,
            urls: Mutex::new(Vec::new()),
        });
        (connector, peers_rx)
    }
}

impl ChannelConnector for MockConnector {
    fn connect(
        &self,
        url: &str,
    ) -> Pin<Box<dyn Future<Output = Result<TransportChannel, ChannelError>> + Send + '_>> {
        let url = url.to_owned();
        Box::pin(async move {
            let (channel, peer) = TransportChannel::in_memory();
            self.urls.lock().unwrap().push(url.clone());
            self.peers_tx
                .send((url, peer))
                .map_err(|_| ChannelError::Closed)?;
            Ok(channel)
        })
    }
}

/// Opens the channel and collects binary frames up to the end marker.
pub(crate) async fn accept_chunks(peer: &mut PeerHandle) -> Vec<Vec<u8>> {
    peer.open().await;
    let mut chunks = Vec::new();
    loop {
        match peer.recv().await {
            Some(Sent::Frame(Frame::Binary(data))) => chunks.push(data),
            Some(Sent::Frame(Frame::Text(text))) if text == END_OF_STREAM_MARKER => break,
            other => panic!("unexpected upload frame: {other:?}"),
        }
    }
    chunks
}
