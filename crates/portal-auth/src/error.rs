//! Error types for portal authentication operations

use crate::endpoints::redact_url;
use crate::params::UnknownField;
use crate::transport::TransportError;
use crate::validate::MissingField;

/// Errors from credential, URL and token-exchange operations.
///
/// Transport and response errors carry the URL that was attempted. Its
/// secret-bearing query values are redacted when the error is displayed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown credential field(s): {}", join(.0))]
    UnknownFields(Vec<UnknownField>),

    #[error("missing credential field(s): {}", join(.0))]
    MissingFields(Vec<MissingField>),

    #[error("authorization code is missing; request a new one (codes expire after 30 seconds)")]
    MissingCode,

    #[error("refresh token is missing; complete the authorization code grant first")]
    MissingRefreshToken,

    #[error("credential set is not configured (domain, application id and secret are required)")]
    NotConfigured,

    #[error("{operation} is not allowed while the exchange is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("token request to {} failed: {source}", redact_url(.url))]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("malformed token response from {}: {reason}", redact_url(.url))]
    MalformedResponse { url: String, reason: String },

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Whether a caller may retry the same operation unchanged.
    ///
    /// Only transport failures qualify. Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
