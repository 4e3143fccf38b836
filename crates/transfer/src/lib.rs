//! Chunked reads of a local file for the upload channel.
//!
//! [`slice`] plans the byte ranges; [`ChunkReader`] reads one range at a
//! time so at most one chunk is held in memory.

mod content_type;
mod reader;
mod slicer;

pub use content_type::detect_content_type;
pub use reader::ChunkReader;
pub use slicer::{ChunkDescriptor, ChunkSlicer, slice, upload_progress};

pub use drivelink_protocol::constants::DEFAULT_CHUNK_SIZE;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk at offset {offset} lies outside the file ({file_size} bytes)")]
    OutOfRange { offset: u64, file_size: u64 },

    #[error("not a regular file: {0}")]
    NotAFile(String),
}
