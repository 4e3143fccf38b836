use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Default chunk size for the upload channel: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u32 = 4 * 1024 * 1024;

/// Text frame sent after the last chunk on the upload channel.
pub const END_OF_STREAM_MARKER: &str = "DONE";

/// Content type reported when the file type cannot be detected.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Maximum WebSocket message size in bytes (50 MB).
///
/// Must stay above [`DEFAULT_CHUNK_SIZE`] so a full chunk fits in one frame.
pub const WS_MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Base URL of the REST API.
pub const DEFAULT_API_BASE: &str = "http://localhost:5000/api/v1";

/// Base URL of the WebSocket API.
pub const DEFAULT_WS_BASE: &str = "ws://localhost:5000/ws_api/ws";

/// REST path (relative to the API base) that allocates an upload session.
pub const INITIATE_PATH: &str = "upload/initiate";

/// WebSocket path prefix of the upload channel: `{ws_base}/upload/{file_id}`.
pub const UPLOAD_CHANNEL_PATH: &str = "upload";

/// WebSocket path prefix of the processing channel: `{ws_base}/progress/{file_id}`.
pub const PROGRESS_CHANNEL_PATH: &str = "progress";

/// WebSocket close code used when the peer vanished without a close frame.
pub const CLOSE_CODE_ABNORMAL: u16 = 1006;

/// WebSocket close code reported for a close frame without a status.
pub const CLOSE_CODE_NO_STATUS: u16 = 1005;

/// Bytes escaped in a path segment. `.` stays escaped so an id can never
/// form a `..` segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'~');

/// Percent-encodes `segment` for use as one URL path segment.
pub fn encode_path_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Joins a base URL and a relative path with exactly one `/` between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
