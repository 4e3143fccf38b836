//! Dual-stage chunked upload.
//!
//! An upload runs in two stages joined by the session id the server hands
//! out at initiation:
//!
//! 1. [`BrowserUploadStage`] streams the file over the upload channel, one
//!    chunk in flight, then waits for the server to close it cleanly.
//! 2. [`ProcessingProgressStage`] follows the server moving the file to
//!    durable storage over the progress channel.
//!
//! [`UploadCoordinator`] drives both and exposes one [`UploadSnapshot`].

pub mod browser_stage;
pub mod catalog;
pub mod coordinator;
pub mod error;
pub mod initiator;
pub mod processing_stage;
pub mod types;

#[cfg(test)]
mod test_support;

pub use browser_stage::BrowserUploadStage;
pub use catalog::FileCatalog;
pub use coordinator::UploadCoordinator;
pub use error::{CatalogError, InitiationError, StageError, TransportError};
pub use initiator::{HttpSessionInitiator, SessionInitiator};
pub use processing_stage::{ProcessingProgressStage, ProcessingStep, ProgressReducer};
pub use types::{SelectedFile, UploadConfig, UploadSnapshot, UploadState};
