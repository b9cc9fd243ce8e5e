//! Export endpoint client.
//!
//! [`ExportClient`] is the seam between the orchestrator and the network:
//! one call per batch attempt, returning the archive bytes or a classified
//! [`ExportError`]. It never retries and never touches the filesystem.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::ExportConfig;
use crate::credentials::Credential;
use crate::error::{Error, ExportError, Result};
use crate::request::ExportRequest;

/// Longest body excerpt kept in error messages
const ERROR_BODY_LIMIT: usize = 512;

/// Performs the export call for one batch
#[async_trait]
pub trait ExportClient: Send + Sync {
    /// Submit `request` and return the archive bytes
    async fn export(
        &self,
        request: &ExportRequest,
        credential: &Credential,
    ) -> std::result::Result<Vec<u8>, ExportError>;
}

/// Production [`ExportClient`] that POSTs a form to the zip export endpoint
#[derive(Clone, Debug)]
pub struct HttpExportClient {
    client: reqwest::Client,
    endpoint: String,
    origin: Option<String>,
    timeout: Duration,
}

impl HttpExportClient {
    /// Create a client for the endpoint described by `config`
    pub fn new(config: &ExportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config {
                message: format!("Failed to create HTTP client: {}", e),
                key: None,
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            origin: config.origin.clone(),
            timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl ExportClient for HttpExportClient {
    async fn export(
        &self,
        request: &ExportRequest,
        credential: &Credential,
    ) -> std::result::Result<Vec<u8>, ExportError> {
        let fields = request
            .form_fields(credential)
            .map_err(|e| ExportError::InvalidRequest(e.to_string()))?;

        tracing::debug!(
            batch = request.batch_number,
            items = request.items.len(),
            zip_file_name = %request.zip_file_name,
            "Submitting export request"
        );

        let mut builder = self.client.post(&self.endpoint).form(&fields);
        if let Some(origin) = &self.origin {
            builder = builder.header(reqwest::header::ORIGIN, origin);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport_error(&e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(&e, self.timeout))?;
        Ok(body.to_vec())
    }
}

/// Map a non-success HTTP status to an [`ExportError`]
///
/// - 401, 403, 419, 440: session expired or rejected → `Auth`
/// - 408, 429, 5xx: server-side or throttling → `Transient`
/// - any other status: payload refused → `ServerRejected`
pub fn classify_status(status: u16, body: &str) -> ExportError {
    let message = excerpt(body);
    match status {
        401 | 403 | 419 | 440 => ExportError::Auth {
            status: Some(status),
            message,
        },
        408 | 429 | 500..=599 => ExportError::Transient {
            status: Some(status),
            message,
        },
        _ => ExportError::ServerRejected { status, message },
    }
}

/// Map a reqwest transport failure to an [`ExportError`]
fn classify_transport_error(err: &reqwest::Error, timeout: Duration) -> ExportError {
    if err.is_timeout() {
        ExportError::Timeout(timeout)
    } else if err.is_connect() {
        ExportError::Transient {
            status: None,
            message: format!("connection failed: {}", err),
        }
    } else {
        ExportError::Network(err.to_string())
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return "<empty body>".to_string();
    }
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
