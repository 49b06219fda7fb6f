//! Portal OAuth credential library
//!
//! Owns the credential set for one portal connection, maps internal field
//! names onto OAuth wire parameters, validates completeness, builds the
//! authorize and token URLs, and runs the authorization-code and
//! refresh-token grants over an injected transport.
//!
//! Credential flow:
//! 1. Caller builds a `CredentialSet` and calls `configure()`
//! 2. `TokenExchanger::authorization_url()` produces the URL the user visits
//! 3. The portal redirects back with `code`; `TokenExchanger::exchange_code()`
//!    trades it for tokens and applies them via `apply_partial`
//! 4. Tokens are persisted with `store::TokenStore::put_grant()`
//! 5. `TokenExchanger::refresh()` renews the access token when the caller asks
//!
//! Nothing in this crate retries. Retry policy belongs to the caller.

pub mod constants;
pub mod credentials;
pub mod endpoints;
pub mod error;
pub mod exchange;
pub mod params;
pub mod query;
pub mod secret;
pub mod state;
pub mod store;
pub mod transport;
pub mod validate;

pub use constants::*;
pub use credentials::{CredentialSet, CredentialUpdate};
pub use endpoints::{
    GrantType, client_authorization_url, oauth_server_url, portal_url, refresh_token_url,
    token_exchange_url,
};
pub use error::{Error, Result};
pub use exchange::{ExchangeState, Grant, TokenExchanger, TokenResponse};
pub use params::{Field, UnknownField, wire_name};
pub use query::QueryParams;
pub use secret::Secret;
pub use state::generate_state;
pub use store::{StoredTokens, TokenStore};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportResponse};
pub use validate::{MissingField, validate};
