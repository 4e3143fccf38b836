//! The caller-facing upload state machine.
//!
//! [`UploadCoordinator`] runs each attempt's stages on tokio tasks. Every
//! event they produce is tagged with the attempt's epoch and sent back over
//! one queue; the coordinator is the only writer of the [`UploadSnapshot`]
//! and applies those events in [`UploadCoordinator::next_update`].
//!
//! ```text
//! Idle --upload()--> Uploading --stage 1 ok--> Processing --success--> Success
//!                        |                          |
//!                        +------- failure ----------+-------------> Error
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use drivelink_channel::ChannelConnector;
use drivelink_protocol::{InitiateUploadRequest, UploadSession};
use drivelink_transfer::ChunkReader;

use crate::browser_stage::BrowserUploadStage;
use crate::error::{InitiationError, StageError, TransportError};
use crate::initiator::SessionInitiator;
use crate::processing_stage::ProcessingProgressStage;
use crate::types::{SelectedFile, UploadConfig, UploadSnapshot, UploadState};

/// Error message when no session id is available for stage 2.
pub const FILE_ID_MISSING: &str = "file id was not received.";

/// Composes session initiation, the upload stage and the processing stage
/// into one state machine.
pub struct UploadCoordinator {
    initiator: Arc<dyn SessionInitiator>,
    connector: Arc<dyn ChannelConnector>,
    config: UploadConfig,
    selected: Option<SelectedFile>,
    snapshot: UploadSnapshot,
    updates: watch::Sender<UploadSnapshot>,
    epoch: u64,
    attempt: Option<Attempt>,
    events_tx: mpsc::UnboundedSender<AttemptEvent>,
    events_rx: mpsc::UnboundedReceiver<AttemptEvent>,
}

/// Resources of the attempt in flight.
struct Attempt {
    epoch: u64,
    cancel: CancellationToken,
    session: Option<UploadSession>,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
struct AttemptEvent {
    epoch: u64,
    kind: StageEvent,
}

#[derive(Debug)]
enum StageEvent {
    Initiated(UploadSession),
    InitiationFailed(InitiationError),
    UploadProgress(u8),
    UploadFinished,
    UploadFailed(StageError),
    ProcessingProgress(u8),
    ProcessingSucceeded(String),
    ProcessingFailed(StageError),
}

/// Handle a stage task uses to report back.
#[derive(Clone)]
struct StageContext {
    epoch: u64,
    events_tx: mpsc::UnboundedSender<AttemptEvent>,
    cancel: CancellationToken,
}

impl StageContext {
    fn emit(&self, kind: StageEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.events_tx.send(AttemptEvent {
            epoch: self.epoch,
            kind,
        });
    }
}

impl UploadCoordinator {
    pub fn new(
        initiator: Arc<dyn SessionInitiator>,
        connector: Arc<dyn ChannelConnector>,
        config: UploadConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates, _) = watch::channel(UploadSnapshot::default());
        Self {
            initiator,
            connector,
            config,
            selected: None,
            snapshot: UploadSnapshot::default(),
            updates,
            epoch: 0,
            attempt: None,
            events_tx,
            events_rx,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn selected_file(&self) -> Option<&SelectedFile> {
        self.selected.as_ref()
    }

    /// Current state of the attempt.
    pub fn snapshot(&self) -> &UploadSnapshot {
        &self.snapshot
    }

    /// Receives every snapshot the coordinator publishes.
    pub fn subscribe(&self) -> watch::Receiver<UploadSnapshot> {
        self.updates.subscribe()
    }

    /// Session of the attempt in flight, once initiation has succeeded.
    pub fn session(&self) -> Option<&UploadSession> {
        self.attempt.as_ref().and_then(|a| a.session.as_ref())
    }

    /// Chooses the file for the next upload, tearing down any attempt.
    pub async fn select(&mut self, file: SelectedFile) {
        self.teardown().await;
        info!(file = %file.name, size = file.size, "file selected");
        self.selected = Some(file);
        self.publish(UploadSnapshot::default());
    }

    /// Tears down any attempt and returns to `Idle`. The selection is kept.
    pub async fn reset(&mut self) {
        self.teardown().await;
        self.publish(UploadSnapshot::default());
    }

    /// Starts a new attempt with the selected file. Does nothing when no
    /// file is selected.
    ///
    /// The previous attempt's channels are released before this returns,
    /// so they are gone before the new attempt opens any channel.
    pub async fn upload(&mut self) {
        let Some(file) = self.selected.clone() else {
            debug!("upload requested with no file selected");
            return;
        };

        self.teardown().await;
        self.epoch += 1;

        let cancel = CancellationToken::new();
        let ctx = StageContext {
            epoch: self.epoch,
            events_tx: self.events_tx.clone(),
            cancel: cancel.clone(),
        };

        info!(epoch = self.epoch, file = %file.name, size = file.size, "starting upload");
        self.publish(UploadSnapshot::uploading());

        let task = spawn_stage(
            &ctx,
            upload_stage(
                ctx.clone(),
                self.initiator.clone(),
                self.connector.clone(),
                self.config.clone(),
                file,
            ),
        );

        self.attempt = Some(Attempt {
            epoch: self.epoch,
            cancel,
            session: None,
            tasks: vec![task],
        });
    }

    /// Waits for the next event of the attempt in flight, applies it and
    /// returns the resulting snapshot.
    ///
    /// Returns the current snapshot immediately when no attempt is in flight.
    /// A stalled server leaves this waiting; callers wanting a deadline wrap
    /// it in `tokio::time::timeout`.
    pub async fn next_update(&mut self) -> UploadSnapshot {
        while self.attempt.is_some() {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            if self.apply(event).await {
                break;
            }
        }
        self.snapshot.clone()
    }

    /// Applies events until the attempt reaches `Success` or `Error`.
    pub async fn run_until_settled(&mut self) -> UploadSnapshot {
        while self.attempt.is_some() {
            self.next_update().await;
        }
        self.snapshot.clone()
    }

    /// Returns `false` if the event belongs to an attempt that is gone.
    async fn apply(&mut self, event: AttemptEvent) -> bool {
        let Some(attempt) = self.attempt.as_mut().filter(|a| a.epoch == event.epoch) else {
            trace!(epoch = event.epoch, "dropping stale stage event");
            return false;
        };

        match event.kind {
            StageEvent::Initiated(session) => {
                debug!(session = %session.session_id, "session captured");
                attempt.session = Some(session);
            }
            StageEvent::InitiationFailed(InitiationError::MissingSessionId) => {
                self.fail(FILE_ID_MISSING.to_string()).await;
            }
            StageEvent::InitiationFailed(e) => {
                self.fail(format!("could not start upload: {e}")).await;
            }
            StageEvent::UploadProgress(p) => {
                if self.snapshot.state == UploadState::Uploading {
                    self.update(|s| s.browser_progress = p);
                }
            }
            StageEvent::UploadFinished => self.start_processing().await,
            StageEvent::UploadFailed(e) | StageEvent::ProcessingFailed(e) => {
                self.fail(e.to_string()).await;
            }
            StageEvent::ProcessingProgress(p) => {
                if self.snapshot.state == UploadState::Processing {
                    self.update(|s| s.processing_progress = p);
                }
            }
            StageEvent::ProcessingSucceeded(locator) => {
                info!(epoch = event.epoch, %locator, "upload succeeded");
                self.update(|s| {
                    s.state = UploadState::Success;
                    s.download_locator = Some(locator);
                });
                self.teardown().await;
            }
        }
        true
    }

    async fn start_processing(&mut self) {
        let Some(attempt) = self.attempt.as_ref() else {
            return;
        };
        let ctx = StageContext {
            epoch: attempt.epoch,
            events_tx: self.events_tx.clone(),
            cancel: attempt.cancel.clone(),
        };
        let Some(session) = attempt.session.clone() else {
            self.fail(FILE_ID_MISSING.to_string()).await;
            return;
        };

        info!(session = %session.session_id, "upload complete, following processing");
        self.update(|s| s.state = UploadState::Processing);

        let url = session.progress_url(&self.config.ws_base);
        let task = spawn_stage(&ctx, processing_stage(ctx.clone(), self.connector.clone(), url));
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.tasks.push(task);
        }
    }

    async fn fail(&mut self, message: String) {
        warn!(epoch = self.epoch, %message, "upload failed");
        self.update(|s| {
            s.state = UploadState::Error;
            s.error_message = Some(message);
        });
        self.teardown().await;
    }

    /// Cancels the attempt in flight and waits for its tasks, which drops
    /// their channels. Queued events of the attempt are discarded.
    async fn teardown(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            debug!(epoch = attempt.epoch, "releasing attempt");
            attempt.cancel.cancel();
            for task in attempt.tasks {
                task.abort();
                let _ = task.await;
            }
        }
        while let Ok(stale) = self.events_rx.try_recv() {
            trace!(epoch = stale.epoch, "discarding queued stage event");
        }
    }

    fn update(&mut self, f: impl FnOnce(&mut UploadSnapshot)) {
        f(&mut self.snapshot);
        self.updates.send_replace(self.snapshot.clone());
    }

    fn publish(&mut self, snapshot: UploadSnapshot) {
        self.snapshot = snapshot;
        self.updates.send_replace(self.snapshot.clone());
    }
}

impl Drop for UploadCoordinator {
    fn drop(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.cancel.cancel();
            for task in attempt.tasks {
                task.abort();
            }
        }
    }
}

fn spawn_stage<F>(ctx: &StageContext, work: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = work => {}
        }
    })
}

/// Initiation followed by stage 1.
async fn upload_stage(
    ctx: StageContext,
    initiator: Arc<dyn SessionInitiator>,
    connector: Arc<dyn ChannelConnector>,
    config: UploadConfig,
    file: SelectedFile,
) {
    let request = InitiateUploadRequest {
        filename: file.name.clone(),
        size: file.size,
        content_type: file.content_type.clone(),
    };
    let session = match initiator.initiate(request).await {
        Ok(session) => session,
        Err(e) => {
            ctx.emit(StageEvent::InitiationFailed(e));
            return;
        }
    };
    ctx.emit(StageEvent::Initiated(session.clone()));

    let result = async {
        let mut reader = ChunkReader::open(&file.path).await?;
        let channel = connector
            .connect(&session.upload_url(&config.ws_base))
            .await
            .map_err(TransportError::Connect)?;
        BrowserUploadStage::new(config.chunk_size)
            .run(channel, &mut reader, &session, |p| {
                ctx.emit(StageEvent::UploadProgress(p))
            })
            .await
    }
    .await;

    match result {
        Ok(()) => ctx.emit(StageEvent::UploadFinished),
        Err(e) => ctx.emit(StageEvent::UploadFailed(e.into())),
    }
}

/// Stage 2 for an uploaded session.
async fn processing_stage(ctx: StageContext, connector: Arc<dyn ChannelConnector>, url: String) {
    let result = match connector.connect(&url).await {
        Ok(channel) => {
            ProcessingProgressStage
                .run(channel, |p| ctx.emit(StageEvent::ProcessingProgress(p)))
                .await
        }
        Err(e) => Err(StageError::ConnectionLost(format!(
            "could not open progress channel: {e}"
        ))),
    };

    match result {
        Ok(locator) => ctx.emit(StageEvent::ProcessingSucceeded(locator)),
        Err(e) => ctx.emit(StageEvent::ProcessingFailed(e)),
    }
}
