//! Wire protocol types for the drivelink upload client.
//!
//! Covers the three external surfaces of an upload:
//!
//! - the HTTP session initiation exchange ([`messages::InitiateUploadRequest`]),
//! - the upload channel end-of-stream marker ([`constants::END_OF_STREAM_MARKER`]),
//! - the JSON status frames of the processing channel ([`messages::ProgressMessage`]).

pub mod constants;
pub mod messages;
pub mod types;

pub use messages::{
    FileMeta, InitiateUploadRequest, InitiateUploadResponse, ProgressMessage, ProtocolViolation,
};
pub use types::UploadSession;
