//! HTTP transport for chat streams

use bytes::Bytes;
use futures::Stream;
use reqwest::Client;
use tracing::{debug, trace};

use agentwire_protocol::ChatRequestBody;

use crate::{ClientError, Result};

/// Path of the streaming endpoint
pub const STREAM_PATH: &str = "/api/chat/stream";

/// Opens `POST /api/chat/stream` and hands back the raw body
#[derive(Debug, Clone)]
pub struct StreamClient {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl StreamClient {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), STREAM_PATH)
    }

    /// Send the request; any non-success status is returned as `Rejected`
    /// with the response text, before a single frame is read.
    pub async fn open(
        &self,
        body: &ChatRequestBody,
    ) -> Result<impl Stream<Item = reqwest::Result<Bytes>>> {
        let url = self.url();
        trace!("◆ OPENING STREAM TO {}", url);

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("◆ STREAM OPEN: {} ({})", url, status);
        Ok(response.bytes_stream())
    }
}
