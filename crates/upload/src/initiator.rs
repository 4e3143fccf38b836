//! Upload session negotiation.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info};

use drivelink_protocol::constants::{INITIATE_PATH, join_url};
use drivelink_protocol::{InitiateUploadRequest, InitiateUploadResponse, UploadSession};

use crate::error::InitiationError;
use crate::types::UploadConfig;

/// Allocates an upload session before any chunk is sent.
///
/// One request, one response, no retry.
pub trait SessionInitiator: Send + Sync {
    fn initiate(
        &self,
        request: InitiateUploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UploadSession, InitiationError>> + Send + '_>>;
}

/// [`SessionInitiator`] that POSTs to `{api_base}/upload/initiate`.
#[derive(Clone)]
pub struct HttpSessionInitiator {
    client: reqwest::Client,
    api_base: String,
    access_token: Option<String>,
}

impl HttpSessionInitiator {
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

    /// Sends `token` as a bearer credential with every request.
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    pub fn endpoint(&self) -> String {
        join_url(&self.api_base, INITIATE_PATH)
    }
}

impl SessionInitiator for HttpSessionInitiator {
    fn initiate(
        &self,
        request: InitiateUploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UploadSession, InitiationError>> + Send + '_>> {
        Box::pin(async move {
            let url = self.endpoint();
            debug!(%url, filename = %request.filename, size = request.size, "initiating upload");

            let mut builder = self.client.post(&url).json(&request);
            if let Some(token) = &self.access_token {
                builder = builder.bearer_auth(token);
            }

            let response = builder.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(InitiationError::Status(status));
            }

            let body = response.text().await?;
            let session = session_from_response(&request, &body)?;
            info!(session = %session.session_id, filename = %session.filename, "upload session created");
            Ok(session)
        })
    }
}

/// Builds the session from a successful response body.
///
/// A missing or blank `file_id` is [`InitiationError::MissingSessionId`].
pub fn session_from_response(
    request: &InitiateUploadRequest,
    body: &str,
) -> Result<UploadSession, InitiationError> {
    let response: InitiateUploadResponse = serde_json::from_str(body)?;
    match response.file_id {
        Some(id) if !id.trim().is_empty() => Ok(UploadSession {
            session_id: id,
            filename: request.filename.clone(),
            size_bytes: request.size,
            content_type: request.content_type.clone(),
        }),
        _ => Err(InitiationError::MissingSessionId),
    }
}
