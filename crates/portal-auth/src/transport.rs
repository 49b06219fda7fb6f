//! HTTP transport boundary
//!
//! The token exchanger never talks to the network directly. It is handed an
//! `Arc<dyn Transport>` and asks it to POST a form with a timeout. Status
//! interpretation and body parsing stay with the exchanger.
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use crate::query::QueryParams;

/// Raw outcome of a POST that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status, when the transport knows it
    pub status: Option<u16>,
    pub body: String,
}

impl TransportResponse {
    /// True for 2xx, or when no status was reported.
    pub fn is_success(&self) -> bool {
        self.status.is_none_or(|status| (200..300).contains(&status))
    }
}

/// Error list reported by a transport, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub errors: Vec<String>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }
}

impl From<Vec<String>> for TransportError {
    fn from(errors: Vec<String>) -> Self {
        Self { errors }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.errors.join("; "))
    }
}

impl std::error::Error for TransportError {}

pub type TransportResult = std::result::Result<TransportResponse, TransportError>;

/// Performs a single form POST bounded by `timeout`.
///
/// The timeout covers connection establishment and reading the whole body.
/// Implementations must not retry.
pub trait Transport: Send + Sync {
    fn post<'a>(
        &'a self,
        url: &'a str,
        form: &'a QueryParams,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = TransportResult> + Send + 'a>>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn post<'a>(
        &'a self,
        url: &'a str,
        form: &'a QueryParams,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = TransportResult> + Send + 'a>> {
        Box::pin(async move {
            let pairs: Vec<(&str, &str)> = form.iter().collect();
            let response = self
                .client
                .post(url)
                .form(&pairs)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| request_error(&e, timeout))?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| request_error(&e, timeout))?;

            debug!(status, bytes = body.len(), "transport received response");
            Ok(TransportResponse {
                status: Some(status),
                body,
            })
        })
    }
}

fn request_error(e: &reqwest::Error, timeout: Duration) -> TransportError {
    if e.is_timeout() {
        TransportError::new(format!("request timed out after {}s", timeout.as_secs()))
    } else {
        TransportError::new(format!("request failed: {e}"))
    }
}
