use serde::{Deserialize, Serialize};

use crate::constants::{
    PROGRESS_CHANNEL_PATH, UPLOAD_CHANNEL_PATH, encode_path_segment, join_url,
};

/// An upload session allocated by the server.
///
/// Built only from a successful initiation response, so `session_id` is
/// never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub session_id: String,
    pub filename: String,
    pub size_bytes: u64,
    pub content_type: String,
}

impl UploadSession {
    /// Address of the upload channel for this session.
    pub fn upload_url(&self, ws_base: &str) -> String {
        join_url(ws_base, &format!("{UPLOAD_CHANNEL_PATH}/{}", self.segment()))
    }

    /// Address of the processing channel for this session.
    pub fn progress_url(&self, ws_base: &str) -> String {
        join_url(ws_base, &format!("{PROGRESS_CHANNEL_PATH}/{}", self.segment()))
    }

    fn segment(&self) -> String {
        encode_path_segment(&self.session_id)
    }
}
