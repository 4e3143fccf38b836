//! Stage 1: streams the file to the server over the upload channel.

use std::future::Future;

use tracing::{debug, info, warn};

use drivelink_channel::{ChannelEvents, Frame, ReadyState, TransportChannel, TransportEvent};
use drivelink_protocol::UploadSession;
use drivelink_protocol::constants::{CLOSE_CODE_ABNORMAL, END_OF_STREAM_MARKER};
use drivelink_transfer::{ChunkReader, slice, upload_progress};

use crate::error::TransportError;

/// Pushes a file's chunks over one channel, one in flight at a time.
///
/// Progress is reported through `on_progress`: `0` at start, then
/// `min(round(100 * end / size), 99)` after each accepted chunk, and `100`
/// once the server closes the channel cleanly after the end marker.
#[derive(Debug, Clone, Copy)]
pub struct BrowserUploadStage {
    chunk_size: u32,
}

/// What an incoming event means for the stage.
enum Step {
    Continue,
    Finished,
    Failed(TransportError),
}

impl BrowserUploadStage {
    pub fn new(chunk_size: u32) -> Self {
        Self { chunk_size }
    }

    /// Runs the stage to completion. The channel is released on return.
    pub async fn run<F>(
        &self,
        channel: TransportChannel,
        reader: &mut ChunkReader,
        session: &UploadSession,
        on_progress: F,
    ) -> Result<(), TransportError>
    where
        F: Fn(u8) + Send + Sync,
    {
        let (writer, mut events) = channel.split();
        let total = session.size_bytes;
        let mut chunks = slice(total, self.chunk_size);
        info!(
            session = %session.session_id,
            size = total,
            chunks = chunks.size_hint().0,
            "starting chunk upload"
        );

        let mut next = chunks.next();
        let mut marker_queued = false;
        on_progress(0);

        loop {
            // Nothing can be sent: wait for the channel to open, or for the
            // server to close it once the marker is out.
            if marker_queued || writer.ready_state() != ReadyState::Open {
                match on_event(events.next().await, marker_queued) {
                    Step::Continue => continue,
                    Step::Finished => break,
                    Step::Failed(e) => return Err(e),
                }
            }

            match next {
                Some(desc) => {
                    let send = async {
                        let bytes = reader.read(desc).await?;
                        writer
                            .send(Frame::Binary(bytes))
                            .await
                            .map_err(TransportError::Send)
                    };
                    drive(send, &mut events, false).await?;
                    on_progress(upload_progress(desc.end(), total));
                    next = chunks.next();
                }
                None => {
                    marker_queued = true;
                    let send = async {
                        writer
                            .send(Frame::Text(END_OF_STREAM_MARKER.into()))
                            .await
                            .map_err(TransportError::Send)
                    };
                    if drive(send, &mut events, true).await? {
                        break;
                    }
                    debug!(session = %session.session_id, "end marker sent, awaiting close");
                }
            }
        }

        info!(session = %session.session_id, "upload channel closed cleanly");
        on_progress(100);
        Ok(())
    }
}

/// Completes one send while still watching channel events.
///
/// Returns `true` if the server already closed cleanly after the marker.
async fn drive<S>(
    send: S,
    events: &mut ChannelEvents,
    marker_queued: bool,
) -> Result<bool, TransportError>
where
    S: Future<Output = Result<(), TransportError>>,
{
    tokio::pin!(send);
    loop {
        tokio::select! {
            biased;
            result = &mut send => {
                return match result {
                    Ok(()) => Ok(false),
                    Err(e) => Err(prefer_close_reason(e, events, marker_queued)),
                };
            }
            event = events.next() => match on_event(event, marker_queued) {
                Step::Continue => {}
                Step::Finished => return Ok(true),
                Step::Failed(e) => return Err(e),
            },
        }
    }
}

fn on_event(event: Option<TransportEvent>, marker_queued: bool) -> Step {
    match event {
        Some(TransportEvent::Open) => {
            debug!("upload channel open");
            Step::Continue
        }
        Some(TransportEvent::Message(Frame::Text(text))) => {
            debug!(message = %text, "server message during upload");
            Step::Continue
        }
        Some(TransportEvent::Message(Frame::Binary(data))) => {
            debug!(len = data.len(), "binary server message during upload");
            Step::Continue
        }
        Some(TransportEvent::Error(reason)) => {
            warn!(%reason, "upload channel error");
            Step::Failed(TransportError::Channel(reason))
        }
        Some(TransportEvent::Close {
            was_clean: true, ..
        }) if marker_queued => Step::Finished,
        Some(TransportEvent::Close {
            was_clean: true,
            code,
            reason,
        }) => {
            warn!(code, %reason, "upload channel closed before end marker");
            Step::Failed(TransportError::ClosedEarly { code })
        }
        Some(TransportEvent::Close {
            was_clean: false,
            code,
            reason,
        }) => {
            warn!(code, %reason, "upload channel lost");
            Step::Failed(TransportError::ConnectionLost { code, reason })
        }
        None => Step::Failed(TransportError::ConnectionLost {
            code: CLOSE_CODE_ABNORMAL,
            reason: "channel ended without a close event".into(),
        }),
    }
}

/// A failed write usually means the connection is gone; report the close
/// that explains it when one has already arrived.
fn prefer_close_reason(
    err: TransportError,
    events: &mut ChannelEvents,
    marker_queued: bool,
) -> TransportError {
    for event in events.drain_pending() {
        if let Step::Failed(e) = on_event(Some(event), marker_queued) {
            return e;
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use drivelink_channel::{PeerHandle, Sent};
    use tempfile::TempDir;

    use crate::test_support::accept_chunks;

    fn session(size: u64) -> UploadSession {
        UploadSession {
            session_id: "s-1".into(),
            filename: "data.bin".into(),
            size_bytes: size,
            content_type: "application/octet-stream".into(),
        }
    }

    async fn reader_for(dir: &Path, data: &[u8]) -> ChunkReader {
        let path = dir.join("data.bin");
        std::fs::write(&path, data).unwrap();
        ChunkReader::open(&path).await.unwrap()
    }

    /// Runs the stage on a spawned task; returns its result and the progress
    /// values it emitted.
    fn spawn_stage(
        chunk_size: u32,
        channel: TransportChannel,
        mut reader: ChunkReader,
        size: u64,
    ) -> (
        tokio::task::JoinHandle<Result<(), TransportError>>,
        Arc<Mutex<Vec<u8>>>,
    ) {
        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = progress.clone();
        let handle = tokio::spawn(async move {
            BrowserUploadStage::new(chunk_size)
                .run(channel, &mut reader, &session(size), move |p| {
                    sink.lock().unwrap().push(p)
                })
                .await
        });
        (handle, progress)
    }

    #[tokio::test]
    async fn streams_chunks_then_completes_on_clean_close() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..10u8).collect();
        let reader = reader_for(dir.path(), &data).await;
        let (channel, mut peer) = TransportChannel::in_memory();

        let (handle, progress) = spawn_stage(4, channel, reader, 10);

        let chunks = accept_chunks(&mut peer).await;
        assert_eq!(chunks, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);
        peer.close(true, 1000, "").await;

        handle.await.unwrap().unwrap();
        assert_eq!(*progress.lock().unwrap(), vec![0, 40, 80, 99, 100]);
        assert!(peer.is_released());
    }

    #[tokio::test]
    async fn ten_megabyte_file_in_three_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(10_000_000).unwrap();
        drop(file);
        let reader = ChunkReader::open(&path).await.unwrap();
        let (channel, mut peer) = TransportChannel::in_memory();

        let (handle, progress) = spawn_stage(4_194_304, channel, reader, 10_000_000);

        let chunks = accept_chunks(&mut peer).await;
        let lengths: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(lengths, vec![4_194_304, 4_194_304, 1_611_392]);
        peer.close(true, 1000, "").await;

        handle.await.unwrap().unwrap();
        assert_eq!(*progress.lock().unwrap(), vec![0, 42, 84, 99, 100]);
    }

    #[tokio::test]
    async fn empty_file_sends_marker_and_still_needs_clean_close() {
        let dir = TempDir::new().unwrap();
        let reader = reader_for(dir.path(), b"").await;
        let (channel, mut peer) = TransportChannel::in_memory();

        let (handle, progress) = spawn_stage(4, channel, reader, 0);

        assert!(accept_chunks(&mut peer).await.is_empty());
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        assert_eq!(*progress.lock().unwrap(), vec![0]);

        peer.close(true, 1000, "").await;
        handle.await.unwrap().unwrap();
        assert_eq!(*progress.lock().unwrap(), vec![0, 100]);
    }

    #[tokio::test]
    async fn chunks_wait_for_open() {
        let dir = TempDir::new().unwrap();
        let reader = reader_for(dir.path(), b"abcdef").await;
        let (channel, mut peer) = TransportChannel::in_memory();

        let (handle, progress) = spawn_stage(4, channel, reader, 6);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*progress.lock().unwrap(), vec![0]);

        let chunks = accept_chunks(&mut peer).await;
        assert_eq!(chunks.len(), 2);
        peer.close(true, 1000, "").await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn next_chunk_waits_for_previous_send() {
        let dir = TempDir::new().unwrap();
        let reader = reader_for(dir.path(), &[3u8; 12]).await;
        let (channel, mut peer) = TransportChannel::in_memory();

        let (handle, progress) = spawn_stage(4, channel, reader, 12);

        peer.open().await;
        let first = peer.hold_next().await.unwrap();
        assert_eq!(first.frame().len(), 4);

        // Unacknowledged: no second frame, no progress past the start.
        let second = tokio::time::timeout(Duration::from_millis(50), peer.hold_next()).await;
        assert!(second.is_err());
        assert_eq!(*progress.lock().unwrap(), vec![0]);

        first.accept();
        let second = peer.hold_next().await.unwrap();
        assert_eq!(*progress.lock().unwrap(), vec![0, 33]);
        second.accept();

        let rest = accept_chunks_after_open(&mut peer).await;
        assert_eq!(rest.len(), 1);
        peer.close(true, 1000, "").await;

        handle.await.unwrap().unwrap();
        assert_eq!(*progress.lock().unwrap(), vec![0, 33, 67, 99, 100]);
    }

    #[tokio::test]
    async fn unclean_close_mid_transfer_fails() {
        let dir = TempDir::new().unwrap();
        let reader = reader_for(dir.path(), &[7u8; 12]).await;
        let (channel, mut peer) = TransportChannel::in_memory();

        let (handle, progress) = spawn_stage(4, channel, reader, 12);

        peer.open().await;
        assert!(matches!(peer.recv().await, Some(Sent::Frame(Frame::Binary(_)))));
        peer.close(false, 1006, "reset").await;

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            TransportError::ConnectionLost { code: 1006, .. }
        ));
        let progress = progress.lock().unwrap();
        assert!(!progress.contains(&100));
        assert!(progress.iter().all(|p| *p <= 99));
    }

    #[tokio::test]
    async fn clean_close_before_marker_fails() {
        let dir = TempDir::new().unwrap();
        let reader = reader_for(dir.path(), &[1u8; 8]).await;
        let (channel, peer) = TransportChannel::in_memory();

        let (handle, _progress) = spawn_stage(4, channel, reader, 8);
        peer.open().await;
        peer.close(true, 1000, "bye").await;

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::ClosedEarly { code: 1000 }));
    }

    #[tokio::test]
    async fn transport_error_fails() {
        let dir = TempDir::new().unwrap();
        let reader = reader_for(dir.path(), &[1u8; 8]).await;
        let (channel, peer) = TransportChannel::in_memory();

        let (handle, _progress) = spawn_stage(4, channel, reader, 8);
        peer.fail("tls alert").await;

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::Channel(ref r) if r == "tls alert"));
    }

    #[tokio::test]
    async fn server_text_messages_are_ignored() {
        let dir = TempDir::new().unwrap();
        let reader = reader_for(dir.path(), b"xy").await;
        let (channel, mut peer) = TransportChannel::in_memory();

        let (handle, progress) = spawn_stage(4, channel, reader, 2);
        peer.open().await;
        peer.send_text("chunk received").await;
        let chunks = accept_chunks_after_open(&mut peer).await;
        assert_eq!(chunks, vec![b"xy".to_vec()]);
        peer.close(true, 1000, "").await;

        handle.await.unwrap().unwrap();
        assert_eq!(progress.lock().unwrap().last(), Some(&100));
    }

    async fn accept_chunks_after_open(peer: &mut PeerHandle) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        loop {
            match peer.recv().await {
                Some(Sent::Frame(Frame::Binary(data))) => chunks.push(data),
                Some(Sent::Frame(Frame::Text(_))) => return chunks,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn file_shorter_than_session_fails_with_read_error() {
        let dir = TempDir::new().unwrap();
        let reader = reader_for(dir.path(), b"abc").await;
        let (channel, peer) = TransportChannel::in_memory();

        let (handle, _progress) = spawn_stage(4, channel, reader, 8);
        peer.open().await;

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::Read(_)));
    }
}
