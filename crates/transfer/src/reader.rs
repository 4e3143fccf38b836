use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::trace;

use crate::TransferError;
use crate::slicer::ChunkDescriptor;

/// Reads the bytes of one [`ChunkDescriptor`] at a time from a local file.
pub struct ChunkReader {
    file: tokio::fs::File,
    path: PathBuf,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(TransferError::NotAFile(path.display().to_string()));
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            file_size: metadata.len(),
        })
    }

    /// Reads exactly the bytes described by `desc`.
    ///
    /// Fails if the range runs past the end of the file, e.g. when the file
    /// shrank after it was selected.
    pub async fn read(&mut self, desc: ChunkDescriptor) -> Result<Vec<u8>, TransferError> {
        if desc.end() > self.file_size {
            return Err(TransferError::OutOfRange {
                offset: desc.offset,
                file_size: self.file_size,
            });
        }

        self.file.seek(SeekFrom::Start(desc.offset)).await?;
        let mut buf = vec![0u8; desc.length as usize];
        self.file.read_exact(&mut buf).await?;

        trace!(
            path = %self.path.display(),
            offset = desc.offset,
            length = desc.length,
            "chunk read"
        );
        Ok(buf)
    }

    /// Total file size in bytes, as seen when the file was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}
