//! OAuth URL construction
//!
//! Every URL is `https://{host}{path}?{query}`. The query starts with the
//! parameters the builder owns (`client_id`, `scope`, then the forced
//! `response_type` or `grant_type`); caller-supplied extras follow in their
//! own order. An extra that repeats an owned key is dropped, so the result
//! never carries duplicate keys.

use std::fmt;

use crate::constants::{AUTHORIZE_PATH, OAUTH_SERVER, PROTOCOL, TOKEN_PATH};
use crate::credentials::CredentialSet;
use crate::params::{Field, wire};
use crate::query::{QueryParams, is_secret_key};

/// OAuth2 grant sent to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential fields every OAuth request identifies itself with.
const CLIENT_FIELDS: [Field; 2] = [Field::ApplicationId, Field::ApplicationScope];

/// URL the user visits to grant the application access.
///
/// `https://{domain}/oauth/authorize/?client_id=…&scope=…&response_type=code&…`
pub fn client_authorization_url(credentials: &CredentialSet, extra: &QueryParams) -> String {
    let mut query = QueryParams::new();
    credentials.push_fields(&mut query, &CLIENT_FIELDS);
    query.set(wire::RESPONSE_TYPE, "code");
    query.merge_missing(extra);
    portal_url(credentials, AUTHORIZE_PATH, &query)
}

/// Token endpoint URL for the authorization-code grant.
pub fn token_exchange_url(credentials: &CredentialSet, extra: &QueryParams) -> String {
    token_url(credentials, GrantType::AuthorizationCode, extra)
}

/// Token endpoint URL for the refresh-token grant.
pub fn refresh_token_url(credentials: &CredentialSet, extra: &QueryParams) -> String {
    token_url(credentials, GrantType::RefreshToken, extra)
}

/// Token endpoint URL for `grant`.
///
/// `https://{domain}/oauth/token/?client_id=…&scope=…&grant_type=…&…`
pub fn token_url(credentials: &CredentialSet, grant: GrantType, extra: &QueryParams) -> String {
    let mut query = QueryParams::new();
    credentials.push_fields(&mut query, &CLIENT_FIELDS);
    query.set(wire::GRANT_TYPE, grant.as_str());
    query.merge_missing(extra);
    portal_url(credentials, TOKEN_PATH, &query)
}

/// Any URL on the portal: `https://{domain}{path}?{query}`.
pub fn portal_url(credentials: &CredentialSet, path: &str, params: &QueryParams) -> String {
    build_url(credentials.domain(), path, params)
}

/// URL on the central OAuth server rather than a portal.
pub fn oauth_server_url(path: &str, params: &QueryParams) -> String {
    build_url(OAUTH_SERVER, path, params)
}

fn build_url(host: &str, path: &str, params: &QueryParams) -> String {
    format!("{PROTOCOL}{host}{path}?{}", params.encode())
}

/// Replace secret-bearing query values with `[REDACTED]` for display.
pub(crate) fn redact_url(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_owned();
    };
    let pairs: Vec<String> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let key = pair.split_once('=').map_or(pair, |(key, _)| key);
            if is_secret_key(key) {
                format!("{key}=[REDACTED]")
            } else {
                pair.to_owned()
            }
        })
        .collect();
    format!("{base}?{}", pairs.join("&"))
}
