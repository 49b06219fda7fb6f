//! Portal OAuth constants
//!
//! Endpoint paths are relative to the portal domain; every portal serves
//! its own authorize and token endpoints. The central OAuth server is only
//! used for application-level calls that are not tied to a portal.

/// Scheme prefix for every URL this crate builds.
pub const PROTOCOL: &str = "https://";

/// Central OAuth server host (not portal specific)
pub const OAUTH_SERVER: &str = "oauth.bitrix.info";

/// Token endpoint path for code exchange and token refresh
pub const TOKEN_PATH: &str = "/oauth/token/";

/// Authorization endpoint path the user is sent to
pub const AUTHORIZE_PATH: &str = "/oauth/authorize/";

/// Transport timeout applied when the caller never set one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
