//! Internal field names and their OAuth wire parameter names
//!
//! `Field` is the closed set of credential fields. Code inside this crate
//! works with the enum directly, so an unknown field cannot be expressed.
//! Callers that only have a string (config keys, dynamic parameter lists)
//! go through `wire_name` / `Field::from_str`, which report `UnknownField`.

use std::fmt;
use std::str::FromStr;

/// A credential field of a `CredentialSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Domain,
    ApplicationSecret,
    ApplicationId,
    AccessToken,
    RefreshToken,
    MemberId,
    ApplicationScope,
    RedirectUri,
}

impl Field {
    /// Every field, in canonical order.
    pub const ALL: [Field; 8] = [
        Field::Domain,
        Field::ApplicationSecret,
        Field::ApplicationId,
        Field::AccessToken,
        Field::RefreshToken,
        Field::MemberId,
        Field::ApplicationScope,
        Field::RedirectUri,
    ];

    /// Fields that must be non-empty for a credential set to be ready.
    /// `RedirectUri` is only needed for the interactive authorization leg.
    pub const REQUIRED: [Field; 7] = [
        Field::Domain,
        Field::ApplicationSecret,
        Field::ApplicationId,
        Field::AccessToken,
        Field::RefreshToken,
        Field::MemberId,
        Field::ApplicationScope,
    ];

    /// Fields supplied by `configure`; needed before any exchange.
    pub const BOOTSTRAP: [Field; 3] = [
        Field::Domain,
        Field::ApplicationSecret,
        Field::ApplicationId,
    ];

    /// Internal (camelCase) name.
    pub fn internal_name(self) -> &'static str {
        match self {
            Field::Domain => "domain",
            Field::ApplicationSecret => "applicationSecret",
            Field::ApplicationId => "applicationId",
            Field::AccessToken => "accessToken",
            Field::RefreshToken => "refreshToken",
            Field::MemberId => "memberId",
            Field::ApplicationScope => "applicationScope",
            Field::RedirectUri => "redirectUri",
        }
    }

    /// Parameter name the OAuth server expects.
    pub fn wire_name(self) -> &'static str {
        match self {
            Field::Domain => "domain",
            Field::ApplicationSecret => "client_secret",
            Field::ApplicationId => "client_id",
            Field::AccessToken => "access_token",
            Field::RefreshToken => "refresh_token",
            Field::MemberId => "member_id",
            Field::ApplicationScope => "scope",
            Field::RedirectUri => "redirect_uri",
        }
    }

    /// Whether the value must stay out of logs and error messages.
    pub fn is_secret(self) -> bool {
        matches!(
            self,
            Field::ApplicationSecret | Field::AccessToken | Field::RefreshToken
        )
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.internal_name())
    }
}

impl FromStr for Field {
    type Err = UnknownField;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|field| field.internal_name() == name)
            .ok_or_else(|| UnknownField(name.to_owned()))
    }
}

/// An internal field name that has no wire mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField(pub String);

impl fmt::Display for UnknownField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} isn't a known field", self.0)
    }
}

/// Wire parameter names that are not credential fields.
pub mod wire {
    pub const GRANT_TYPE: &str = "grant_type";
    pub const RESPONSE_TYPE: &str = "response_type";
    pub const CODE: &str = "code";
    pub const STATE: &str = "state";
}

/// Look up the wire name for an internal field name.
pub fn wire_name(internal: &str) -> std::result::Result<&'static str, UnknownField> {
    internal.parse::<Field>().map(Field::wire_name)
}
