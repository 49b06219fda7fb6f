//! CLI-specific error types

use thiserror::Error;

/// Configuration and callback errors.
///
/// Library failures (`portal_auth::Error`) pass through `anyhow` unchanged.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Portal denied authorization: {0}")]
    AuthorizationDenied(String),

    #[error("No authorization redirect received within {0}s")]
    CallbackTimeout(u64),
}

/// Result alias using CLI Error
pub type Result<T> = std::result::Result<T, Error>;
