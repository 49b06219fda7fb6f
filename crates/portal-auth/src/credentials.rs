//! Credential set for one portal connection
//!
//! Holds the application identity (domain, id, secret), the tokens issued by
//! the last grant, and the derived `ready` flag. A `CredentialSet` is owned by
//! exactly one session; callers serialise writes to it.
//!
//! Bulk updates go through `apply_partial`, which walks `Field::ALL` and
//! assigns field by field. Empty values never overwrite existing ones.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::DEFAULT_TIMEOUT_SECS;
use crate::error::{Error, Result};
use crate::params::{Field, UnknownField};
use crate::query::QueryParams;
use crate::secret::Secret;
use crate::validate::{self, MissingField};

/// Application identity and tokens for one portal.
#[derive(Debug, Default, Clone)]
pub struct CredentialSet {
    ready: bool,

    domain: String,
    application_secret: Secret<String>,
    application_id: String,

    access_token: Secret<String>,
    refresh_token: Secret<String>,
    member_id: String,

    application_scope: String,
    redirect_uri: String,

    /// Covers connecting and receiving the full response. 0 means unset.
    timeout_secs: u64,
}

/// Partial attribute set for `CredentialSet::apply_partial`.
///
/// `None` and `Some("")` both mean "leave the field alone".
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

impl CredentialUpdate {
    /// Value supplied for `field`, if any and non-empty.
    pub fn get(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::Domain => &self.domain,
            Field::ApplicationSecret => &self.application_secret,
            Field::ApplicationId => &self.application_id,
            Field::AccessToken => &self.access_token,
            Field::RefreshToken => &self.refresh_token,
            Field::MemberId => &self.member_id,
            Field::ApplicationScope => &self.application_scope,
            Field::RedirectUri => &self.redirect_uri,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    /// Builder-style setter.
    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match field {
            Field::Domain => self.domain = value,
            Field::ApplicationSecret => self.application_secret = value,
            Field::ApplicationId => self.application_id = value,
            Field::AccessToken => self.access_token = value,
            Field::RefreshToken => self.refresh_token = value,
            Field::MemberId => self.member_id = value,
            Field::ApplicationScope => self.application_scope = value,
            Field::RedirectUri => self.redirect_uri = value,
        }
        self
    }

    /// Fields carrying a non-empty value.
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        Field::ALL
            .into_iter()
            .filter(|field| self.get(*field).is_some())
    }
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the three bootstrap fields and default the timeout.
    pub fn configure(
        &mut self,
        domain: impl Into<String>,
        application_secret: impl Into<String>,
        application_id: impl Into<String>,
    ) {
        if self.timeout_secs == 0 {
            self.timeout_secs = DEFAULT_TIMEOUT_SECS;
        }
        self.set_domain(domain);
        self.set_application_secret(application_secret);
        self.set_application_id(application_id);
        debug!(domain = %self.domain, "credential set configured");
    }

    /// Overwrite every field that `update` supplies non-empty, then revalidate.
    ///
    /// Returns the outcome of the validation pass that follows.
    pub fn apply_partial(&mut self, update: &CredentialUpdate) -> (bool, Vec<MissingField>) {
        for field in Field::ALL {
            if let Some(value) = update.get(field) {
                self.set_field(field, value);
            }
        }
        self.validate()
    }

    /// Check the required fields and recompute `ready`.
    ///
    /// Reports one `MissingField` per empty required field, in field order.
    pub fn validate(&mut self) -> (bool, Vec<MissingField>) {
        let missing = validate::missing(self, &Field::REQUIRED);
        self.ready = missing.is_empty();
        (self.ready, missing)
    }

    /// Result of the last validation pass. False until one has run.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether the bootstrap fields needed for any exchange are present.
    pub fn is_configured(&self) -> bool {
        validate::missing(self, &Field::BOOTSTRAP).is_empty()
    }

    /// Value of `field`.
    pub fn field(&self, field: Field) -> &str {
        match field {
            Field::Domain => self.domain.as_str(),
            Field::ApplicationSecret => self.application_secret.expose().as_str(),
            Field::ApplicationId => self.application_id.as_str(),
            Field::AccessToken => self.access_token.expose().as_str(),
            Field::RefreshToken => self.refresh_token.expose().as_str(),
            Field::MemberId => self.member_id.as_str(),
            Field::ApplicationScope => self.application_scope.as_str(),
            Field::RedirectUri => self.redirect_uri.as_str(),
        }
    }

    /// Store `value` in `field`. No format checks.
    pub fn set_field(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        match field {
            Field::Domain => self.domain = value,
            Field::ApplicationSecret => self.application_secret.replace(value),
            Field::ApplicationId => self.application_id = value,
            Field::AccessToken => self.access_token.replace(value),
            Field::RefreshToken => self.refresh_token.replace(value),
            Field::MemberId => self.member_id = value,
            Field::ApplicationScope => self.application_scope = value,
            Field::RedirectUri => self.redirect_uri = value,
        }
    }

    /// Set the wire parameter of each named field in `params`.
    ///
    /// Every name is resolved before `params` is touched: if any is unknown,
    /// all unknown names are reported and `params` is left unchanged.
    pub fn push_named_fields(&self, params: &mut QueryParams, names: &[&str]) -> Result<()> {
        let mut fields = Vec::with_capacity(names.len());
        let mut unknown: Vec<UnknownField> = Vec::new();
        for name in names {
            match name.parse::<Field>() {
                Ok(field) => fields.push(field),
                Err(e) => unknown.push(e),
            }
        }
        if !unknown.is_empty() {
            return Err(Error::UnknownFields(unknown));
        }
        self.push_fields(params, &fields);
        Ok(())
    }

    /// Set the wire parameter of each field in `params`, in order.
    pub fn push_fields(&self, params: &mut QueryParams, fields: &[Field]) {
        for field in fields {
            params.set(field.wire_name(), self.field(*field));
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
    pub fn set_domain(&mut self, domain: impl Into<String>) {
        self.domain = domain.into();
    }

    pub fn application_secret(&self) -> &str {
        self.application_secret.expose()
    }
    pub fn set_application_secret(&mut self, secret: impl Into<String>) {
        self.application_secret.replace(secret.into());
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }
    pub fn set_application_id(&mut self, id: impl Into<String>) {
        self.application_id = id.into();
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose()
    }
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token.replace(token.into());
    }

    pub fn refresh_token(&self) -> &str {
        self.refresh_token.expose()
    }
    pub fn set_refresh_token(&mut self, token: impl Into<String>) {
        self.refresh_token.replace(token.into());
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }
    pub fn set_member_id(&mut self, member_id: impl Into<String>) {
        self.member_id = member_id.into();
    }

    pub fn application_scope(&self) -> &str {
        &self.application_scope
    }
    pub fn set_application_scope(&mut self, scope: impl Into<String>) {
        self.application_scope = scope.into();
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }
    pub fn set_redirect_uri(&mut self, uri: impl Into<String>) {
        self.redirect_uri = uri.into();
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
    pub fn set_timeout_secs(&mut self, secs: u64) {
        self.timeout_secs = secs;
    }

    /// Transport timeout, falling back to the default when unset.
    pub fn timeout(&self) -> Duration {
        match self.timeout_secs {
            0 => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }
}
