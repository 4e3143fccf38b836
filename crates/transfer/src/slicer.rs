use crate::DEFAULT_CHUNK_SIZE;

/// A byte range of the file sent as one binary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkDescriptor {
    /// Byte offset within the file.
    pub offset: u64,
    /// Length in bytes (never above the chunk size).
    pub length: u32,
}

impl ChunkDescriptor {
    /// Offset one past the last byte of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.length)
    }
}

/// Lazy sequence of [`ChunkDescriptor`]s covering `[0, total_size)`.
///
/// Pure and deterministic: two slicers built with the same arguments yield
/// the same descriptors.
#[derive(Debug, Clone)]
pub struct ChunkSlicer {
    total_size: u64,
    chunk_size: u32,
    next_offset: u64,
}

/// Plans the chunks of a `total_size`-byte file.
///
/// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (4 MiB) is used. An empty
/// file yields no descriptors.
pub fn slice(total_size: u64, chunk_size: u32) -> ChunkSlicer {
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    ChunkSlicer {
        total_size,
        chunk_size,
        next_offset: 0,
    }
}

impl ChunkSlicer {
    /// Restarts the sequence at the first chunk boundary at or after `offset`.
    ///
    /// Equivalent to skipping every descriptor that starts below `offset`.
    pub fn resume_from(mut self, offset: u64) -> Self {
        let chunk = u64::from(self.chunk_size);
        let boundary = offset.div_ceil(chunk) * chunk;
        self.next_offset = boundary.min(self.total_size);
        self
    }

    /// Chunk size in bytes.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }
}

impl Iterator for ChunkSlicer {
    type Item = ChunkDescriptor;

    fn next(&mut self) -> Option<ChunkDescriptor> {
        let remaining = self.total_size.saturating_sub(self.next_offset);
        if remaining == 0 {
            return None;
        }
        // `min` against a u32 keeps the cast lossless.
        let length = remaining.min(u64::from(self.chunk_size)) as u32;
        let desc = ChunkDescriptor {
            offset: self.next_offset,
            length,
        };
        self.next_offset += u64::from(length);
        Some(desc)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total_size.saturating_sub(self.next_offset);
        let count = remaining.div_ceil(u64::from(self.chunk_size));
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        (count, Some(count))
    }
}

/// Upload percentage after the byte at `end_offset - 1` has been sent.
///
/// Capped at 99: 100 is reserved for the server confirming the upload.
pub fn upload_progress(end_offset: u64, total_size: u64) -> u8 {
    if total_size == 0 {
        return 0;
    }
    let percent = (end_offset as f64 * 100.0 / total_size as f64).round();
    percent.clamp(0.0, 99.0) as u8
}
