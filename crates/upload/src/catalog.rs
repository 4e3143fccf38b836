//! Read-only calls against the file service: metadata, upload history and
//! stream links for files that finished uploading.

use serde::Deserialize;
use tracing::debug;

use drivelink_protocol::FileMeta;
use drivelink_protocol::constants::{encode_path_segment, join_url};

use crate::error::CatalogError;
use crate::types::UploadConfig;

/// History responses seen in the wild: a bare list, or a list wrapped in
/// an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryBody {
    List(Vec<FileMeta>),
    Wrapped {
        #[serde(alias = "history", alias = "items")]
        files: Vec<FileMeta>,
    },
}

/// Client for the file service's catalog endpoints.
#[derive(Clone)]
pub struct FileCatalog {
    client: reqwest::Client,
    api_base: String,
    access_token: Option<String>,
}

impl FileCatalog {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            access_token: None,
        }
    }

    pub fn from_config(client: reqwest::Client, config: &UploadConfig) -> Self {
        Self::new(client, config.api_base.clone()).with_access_token(config.access_token.clone())
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    /// `GET {api_base}/files/{id}/meta`
    pub async fn file_meta(&self, id: &str) -> Result<FileMeta, CatalogError> {
        let body = self.get(&format!("files/{}/meta", encode_path_segment(id))).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// `GET {api_base}/files/me/history`, newest first as the server returns.
    pub async fn history(&self) -> Result<Vec<FileMeta>, CatalogError> {
        let body = self.get("files/me/history").await?;
        match serde_json::from_str(&body)? {
            HistoryBody::List(files) | HistoryBody::Wrapped { files } => Ok(files),
        }
    }

    /// URL streaming the stored file's content.
    pub fn stream_url(&self, id: &str) -> String {
        join_url(
            &self.api_base,
            &format!("download/stream/{}", encode_path_segment(id)),
        )
    }

    async fn get(&self, path: &str) -> Result<String, CatalogError> {
        let url = join_url(&self.api_base, path);
        debug!(%url, "catalog request");

        let mut builder = self.client.get(&url);
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status));
        }
        Ok(response.text().await?)
    }
}
