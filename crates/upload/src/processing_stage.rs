//! Stage 2: follows server-side processing over the progress channel.

use tracing::{debug, info, warn};

use drivelink_channel::{Frame, TransportChannel, TransportEvent};
use drivelink_protocol::{ProgressMessage, ProtocolViolation};

use crate::error::StageError;

/// What one channel event means for the processing stage.
#[derive(Debug)]
pub enum ProcessingStep {
    /// Nothing to report.
    Continue,
    /// Intermediate server percentage.
    Progress(u8),
    /// Terminal outcome: the download locator, or why processing failed.
    Done(Result<String, StageError>),
}

/// Folds progress channel events into at most one terminal outcome.
///
/// Once a terminal outcome has been produced, every later event is a
/// protocol violation: logged and never reported.
#[derive(Debug, Default)]
pub struct ProgressReducer {
    finished: bool,
}

impl ProgressReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once a terminal outcome has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Applies one event; `None` means the event stream ended.
    pub fn apply(&mut self, event: Option<TransportEvent>) -> ProcessingStep {
        if self.finished {
            self.after_terminal(event);
            return ProcessingStep::Continue;
        }

        let step = match event {
            Some(TransportEvent::Open) => {
                debug!("progress channel open");
                ProcessingStep::Continue
            }
            Some(TransportEvent::Message(Frame::Text(text))) => match ProgressMessage::decode(&text) {
                Ok(ProgressMessage::Progress(p)) => ProcessingStep::Progress(p),
                Ok(ProgressMessage::Success(locator)) => ProcessingStep::Done(Ok(locator)),
                Ok(ProgressMessage::Error(detail)) => {
                    ProcessingStep::Done(Err(StageError::RemoteProcessing(detail)))
                }
                Err(violation) => {
                    warn!(%violation, "ignoring status frame");
                    ProcessingStep::Continue
                }
            },
            Some(TransportEvent::Message(Frame::Binary(data))) => {
                warn!(violation = %ProtocolViolation::UnexpectedBinary(data.len()), "ignoring status frame");
                ProcessingStep::Continue
            }
            Some(TransportEvent::Error(reason)) => {
                ProcessingStep::Done(Err(StageError::ConnectionLost(reason)))
            }
            Some(TransportEvent::Close {
                was_clean, code, ..
            }) => {
                let detail = if was_clean {
                    format!("closed before processing finished (close code {code})")
                } else {
                    format!("connection dropped (close code {code})")
                };
                ProcessingStep::Done(Err(StageError::ConnectionLost(detail)))
            }
            None => ProcessingStep::Done(Err(StageError::ConnectionLost(
                "channel ended".into(),
            ))),
        };

        if matches!(step, ProcessingStep::Done(_)) {
            self.finished = true;
        }
        step
    }

    fn after_terminal(&self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(Frame::Text(text))) => {
                match ProgressMessage::decode(&text) {
                    Ok(message) => {
                        warn!(violation = %ProtocolViolation::AfterTerminal(message), "dropping status frame");
                    }
                    Err(violation) => warn!(%violation, "dropping status frame"),
                }
            }
            Some(TransportEvent::Message(Frame::Binary(data))) => {
                warn!(violation = %ProtocolViolation::UnexpectedBinary(data.len()), "dropping status frame");
            }
            Some(other) => debug!(event = ?other, "event after terminal status"),
            None => {}
        }
    }
}

/// Runs stage 2 over an already connected progress channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessingProgressStage;

impl ProcessingProgressStage {
    /// Forwards progress through `on_progress` and returns the download
    /// locator, or why processing failed. Closes the channel on a terminal
    /// status.
    pub async fn run<F>(
        &self,
        channel: TransportChannel,
        on_progress: F,
    ) -> Result<String, StageError>
    where
        F: Fn(u8) + Send + Sync,
    {
        let (writer, mut events) = channel.split();
        let mut reducer = ProgressReducer::new();

        loop {
            match reducer.apply(events.next().await) {
                ProcessingStep::Continue => {}
                ProcessingStep::Progress(p) => {
                    debug!(progress = p, "processing progress");
                    on_progress(p);
                }
                ProcessingStep::Done(result) => {
                    writer.close().await;
                    for late in events.drain_pending() {
                        reducer.apply(Some(late));
                    }
                    match &result {
                        Ok(locator) => info!(%locator, "processing finished"),
                        Err(e) => warn!("processing failed: {e}"),
                    }
                    return result;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use drivelink_channel::Sent;

    fn text(s: &str) -> Option<TransportEvent> {
        Some(TransportEvent::Message(Frame::Text(s.into())))
    }

    #[test]
    fn reducer_forwards_progress_then_success() {
        let mut reducer = ProgressReducer::new();
        assert!(matches!(
            reducer.apply(Some(TransportEvent::Open)),
            ProcessingStep::Continue
        ));
        assert!(matches!(
            reducer.apply(text(r#"{"type":"progress","value":12.4}"#)),
            ProcessingStep::Progress(12)
        ));
        match reducer.apply(text(r#"{"type":"success","value":"loc-123"}"#)) {
            ProcessingStep::Done(Ok(locator)) => assert_eq!(locator, "loc-123"),
            other => panic!("expected success, got {other:?}"),
        }
        assert!(reducer.is_finished());
    }

    #[test]
    fn reducer_ignores_everything_after_terminal() {
        let mut reducer = ProgressReducer::new();
        let _ = reducer.apply(text(r#"{"type":"error","value":"disk full"}"#));

        for event in [
            text(r#"{"type":"progress","value":50}"#),
            text(r#"{"type":"success","value":"late"}"#),
            text("garbage"),
            Some(TransportEvent::Message(Frame::Binary(vec![1]))),
            Some(TransportEvent::Close {
                was_clean: false,
                code: 1006,
                reason: String::new(),
            }),
            None,
        ] {
            assert!(matches!(reducer.apply(event), ProcessingStep::Continue));
        }
    }

    #[test]
    fn reducer_skips_unrecognised_frames() {
        let mut reducer = ProgressReducer::new();
        for event in [
            text("not json"),
            text(r#"{"type":"paused","value":3}"#),
            Some(TransportEvent::Message(Frame::Binary(vec![0; 4]))),
        ] {
            assert!(matches!(reducer.apply(event), ProcessingStep::Continue));
        }
        assert!(!reducer.is_finished());
    }

    #[test]
    fn reducer_connection_loss() {
        let cases = [
            Some(TransportEvent::Error("boom".into())),
            Some(TransportEvent::Close {
                was_clean: false,
                code: 1006,
                reason: String::new(),
            }),
            Some(TransportEvent::Close {
                was_clean: true,
                code: 1000,
                reason: String::new(),
            }),
            None,
        ];
        for event in cases {
            let mut reducer = ProgressReducer::new();
            assert!(matches!(
                reducer.apply(event),
                ProcessingStep::Done(Err(StageError::ConnectionLost(_)))
            ));
        }
    }

    #[test]
    fn remote_error_is_distinct_from_connection_loss() {
        let mut reducer = ProgressReducer::new();
        match reducer.apply(text(r#"{"type":"error","value":"quota exceeded"}"#)) {
            ProcessingStep::Done(Err(StageError::RemoteProcessing(detail))) => {
                assert_eq!(detail, "quota exceeded")
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stage_closes_channel_on_success_and_drops_late_frames() {
        let (channel, mut peer) = TransportChannel::in_memory();
        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = progress.clone();

        peer.open().await;
        peer.send_text(r#"{"type":"progress","value":30}"#).await;
        peer.send_text(r#"{"type":"progress","value":70}"#).await;
        peer.send_text(r#"{"type":"success","value":"loc-123"}"#).await;
        peer.send_text(r#"{"type":"progress","value":99}"#).await;

        let locator = ProcessingProgressStage
            .run(channel, move |p| sink.lock().unwrap().push(p))
            .await
            .unwrap();

        assert_eq!(locator, "loc-123");
        assert_eq!(*progress.lock().unwrap(), vec![30, 70]);
        assert_eq!(peer.recv().await, Some(Sent::Close));
    }

    #[tokio::test]
    async fn stage_reports_remote_error() {
        let (channel, mut peer) = TransportChannel::in_memory();
        peer.open().await;
        peer.send_text(r#"{"type":"error","value":"drive rejected file"}"#)
            .await;

        let err = ProcessingProgressStage
            .run(channel, |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "drive rejected file");
        assert_eq!(peer.recv().await, Some(Sent::Close));
    }

    #[tokio::test]
    async fn stage_reports_connection_lost_on_unclean_close() {
        let (channel, peer) = TransportChannel::in_memory();
        peer.open().await;
        peer.send_text(r#"{"type":"progress","value":10}"#).await;
        peer.close(false, 1006, "").await;

        let err = ProcessingProgressStage
            .run(channel, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::ConnectionLost(_)));
    }

    #[tokio::test]
    async fn stage_skips_binary_frames() {
        let (channel, peer) = TransportChannel::in_memory();
        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = progress.clone();

        peer.open().await;
        peer.send_binary(vec![0xde, 0xad]).await;
        peer.send_text(r#"{"type":"progress","value":40}"#).await;
        peer.send_text(r#"{"type":"success","value":"loc-7"}"#).await;

        let locator = ProcessingProgressStage
            .run(channel, move |p| sink.lock().unwrap().push(p))
            .await
            .unwrap();
        assert_eq!(locator, "loc-7");
        assert_eq!(*progress.lock().unwrap(), vec![40]);
    }
}
