//! Token exchange: authorization-code and refresh-token grants
//!
//! `handle_event` is the pure state machine: it receives an event and
//! returns `(new_state, action)`. `TokenExchanger` owns the credential set
//! and the injected transport, and performs the I/O each action implies.
//!
//! ```text
//! Unconfigured -> Configured -> AwaitingCode -> Exchanging -> Authorized
//!                                                   \            |
//!                                                    \       Refreshing -> Authorized
//!                                                     `-> Failed <-'
//! ```
//!
//! A failed grant is never retried here. The caller retries from
//! `AwaitingCode` (new code) or `Authorized`/`Failed` (refresh).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::credentials::{CredentialSet, CredentialUpdate};
use crate::endpoints::{self, GrantType};
use crate::error::{Error, Result};
use crate::params::{Field, wire};
use crate::query::QueryParams;
use crate::transport::{Transport, TransportError};
use crate::validate;

/// Exchange lifecycle of one credential set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    /// Domain, application id or secret not supplied yet
    Unconfigured,
    /// Bootstrap fields set, no grant yet
    Configured,
    /// Authorization URL handed out, waiting for the portal redirect
    AwaitingCode,
    /// Authorization-code grant in flight
    Exchanging,
    /// Last grant succeeded
    Authorized,
    /// Refresh-token grant in flight
    Refreshing,
    /// Last grant failed; the message is the redacted error
    Failed { error: String },
}

impl ExchangeState {
    pub fn label(&self) -> &'static str {
        match self {
            ExchangeState::Unconfigured => "unconfigured",
            ExchangeState::Configured => "configured",
            ExchangeState::AwaitingCode => "awaiting_code",
            ExchangeState::Exchanging => "exchanging",
            ExchangeState::Authorized => "authorized",
            ExchangeState::Refreshing => "refreshing",
            ExchangeState::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Events that drive state transitions.
#[derive(Debug)]
pub enum ExchangeEvent {
    /// `configure` supplied the bootstrap fields
    Configured,
    /// A client-authorization URL was produced
    AuthorizationUrlIssued,
    /// The portal redirected back with an authorization code
    CodeReceived,
    /// The caller asked to renew the access token
    RefreshRequested,
    /// The token endpoint answered with a usable token set
    GrantSucceeded,
    /// Transport failure or malformed response
    GrantFailed(String),
}

/// Actions the exchanger executes after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeAction {
    /// Wait for the user to come back with a code
    AwaitCode,
    /// POST the given grant to the token endpoint
    RequestGrant(GrantType),
    /// Event not valid in the current state; state unchanged
    Reject,
    /// No-op
    None,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: ExchangeState, event: ExchangeEvent) -> (ExchangeState, ExchangeAction) {
    use ExchangeState as S;

    match (state, event) {
        // Reconfiguring is allowed from any idle state
        (S::Exchanging, ExchangeEvent::Configured) => (S::Exchanging, ExchangeAction::Reject),
        (S::Refreshing, ExchangeEvent::Configured) => (S::Refreshing, ExchangeAction::Reject),
        (_, ExchangeEvent::Configured) => (S::Configured, ExchangeAction::None),

        (
            S::Configured | S::AwaitingCode | S::Authorized | S::Failed { .. },
            ExchangeEvent::AuthorizationUrlIssued,
        ) => (S::AwaitingCode, ExchangeAction::AwaitCode),

        (
            S::Configured | S::AwaitingCode | S::Authorized | S::Failed { .. },
            ExchangeEvent::CodeReceived,
        ) => (
            S::Exchanging,
            ExchangeAction::RequestGrant(GrantType::AuthorizationCode),
        ),

        (S::Configured | S::Authorized | S::Failed { .. }, ExchangeEvent::RefreshRequested) => (
            S::Refreshing,
            ExchangeAction::RequestGrant(GrantType::RefreshToken),
        ),

        (S::Exchanging | S::Refreshing, ExchangeEvent::GrantSucceeded) => {
            (S::Authorized, ExchangeAction::None)
        }

        (S::Exchanging | S::Refreshing, ExchangeEvent::GrantFailed(error)) => {
            (S::Failed { error }, ExchangeAction::None)
        }

        (state, _) => (state, ExchangeAction::Reject),
    }
}

/// Token set returned by the token endpoint.
///
/// Absent keys read as empty strings. `raw` keeps the whole object for keys
/// this crate does not interpret (`expires_in`, `domain`, ...).
#[derive(Clone, Default, PartialEq)]
pub struct TokenResponse {
    pub member_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub scope: String,
    pub raw: Map<String, Value>,
}

impl TokenResponse {
    /// Parse a token endpoint body. `url` is only used for error context.
    pub fn parse(url: &str, body: &str) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedResponse {
            url: url.to_owned(),
            reason,
        };

        let value: Value = serde_json::from_str(body)
            .map_err(|e| malformed(format!("body is not JSON: {e}")))?;
        let Value::Object(raw) = value else {
            return Err(malformed("body is not a JSON object".into()));
        };

        if raw.contains_key("error") {
            let error = string_value(&raw, "error");
            let description = string_value(&raw, "error_description");
            return Err(malformed(format!("server returned error {error}: {description}")));
        }

        let response = Self {
            member_id: string_value(&raw, "member_id"),
            access_token: string_value(&raw, "access_token"),
            refresh_token: string_value(&raw, "refresh_token"),
            scope: string_value(&raw, "scope"),
            raw,
        };
        if response.access_token.is_empty() {
            return Err(malformed("response has no access_token".into()));
        }
        Ok(response)
    }

    /// Seconds until the access token expires, when the server says so.
    pub fn expires_in(&self) -> Option<u64> {
        self.raw.get("expires_in").and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
    }

    /// Credential update carrying the four token fields.
    pub fn to_update(&self) -> CredentialUpdate {
        CredentialUpdate::default()
            .with(Field::MemberId, self.member_id.as_str())
            .with(Field::AccessToken, self.access_token.as_str())
            .with(Field::RefreshToken, self.refresh_token.as_str())
            .with(Field::ApplicationScope, self.scope.as_str())
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("member_id", &self.member_id)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

fn string_value(map: &Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Outcome of a successful grant.
#[derive(Debug, Clone)]
pub struct Grant {
    pub grant_type: GrantType,
    /// Token endpoint URL that was called (contains secrets)
    pub url: String,
    pub tokens: TokenResponse,
}

/// Drives the OAuth grants for one credential set.
///
/// Every method takes `&mut self`, so one exchange is in flight per
/// credential set at a time. Dropping a grant future before it completes
/// leaves the exchanger `Failed`, ready for a new attempt.
pub struct TokenExchanger {
    credentials: CredentialSet,
    transport: Arc<dyn Transport>,
    state: ExchangeState,
}

impl TokenExchanger {
    /// Wrap `credentials`. The starting state follows from what is already set:
    /// a validated, ready set starts `Authorized`.
    pub fn new(credentials: CredentialSet, transport: Arc<dyn Transport>) -> Self {
        let state = if !credentials.is_configured() {
            ExchangeState::Unconfigured
        } else if credentials.is_ready() {
            ExchangeState::Authorized
        } else {
            ExchangeState::Configured
        };
        Self {
            credentials,
            transport,
            state,
        }
    }

    pub fn state(&self) -> &ExchangeState {
        &self.state
    }

    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    pub fn into_credentials(self) -> CredentialSet {
        self.credentials
    }

    /// Set domain, application secret and id.
    pub fn configure(
        &mut self,
        domain: impl Into<String>,
        application_secret: impl Into<String>,
        application_id: impl Into<String>,
    ) -> Result<()> {
        self.transition(ExchangeEvent::Configured, "configure")?;
        self.credentials.configure(domain, application_secret, application_id);
        Ok(())
    }

    /// Client-authorization URL for the user to visit.
    pub fn authorization_url(&mut self, extra: &QueryParams) -> Result<String> {
        const OPERATION: &str = "authorization_url";

        self.require_bootstrap()?;
        match self.transition(ExchangeEvent::AuthorizationUrlIssued, OPERATION)? {
            ExchangeAction::AwaitCode => {
                Ok(endpoints::client_authorization_url(&self.credentials, extra))
            }
            _ => Err(self.invalid_state(OPERATION)),
        }
    }

    /// Trade the authorization code in `params` for a token set.
    ///
    /// `params` is typically the query of the portal redirect and must carry
    /// `code`. With `update = false` the tokens are returned but the
    /// credential set is left untouched.
    pub async fn exchange_code(&mut self, params: &QueryParams, update: bool) -> Result<Grant> {
        const OPERATION: &str = "exchange_code";

        self.reject_if_unconfigured()?;
        if params.get(wire::CODE).is_none_or(str::is_empty) {
            return Err(Error::MissingCode);
        }
        self.require_bootstrap()?;

        let mut extra = params.clone();
        self.add_client_secret(&mut extra);
        if !self.credentials.redirect_uri().is_empty() {
            extra.set_if_absent(
                Field::RedirectUri.wire_name(),
                self.credentials.redirect_uri(),
            );
        }

        let action = self.transition(ExchangeEvent::CodeReceived, OPERATION)?;
        self.perform(action, &extra, update, OPERATION).await
    }

    /// Renew the access token with the stored refresh token.
    ///
    /// `member_id` is neither sent nor overwritten.
    pub async fn refresh(&mut self, update: bool) -> Result<Grant> {
        const OPERATION: &str = "refresh";

        self.reject_if_unconfigured()?;
        if self.credentials.refresh_token().is_empty() {
            return Err(Error::MissingRefreshToken);
        }
        self.require_bootstrap()?;

        let mut extra = QueryParams::new();
        self.credentials.push_fields(&mut extra, &[Field::RefreshToken]);
        self.add_client_secret(&mut extra);

        let action = self.transition(ExchangeEvent::RefreshRequested, OPERATION)?;
        self.perform(action, &extra, update, OPERATION).await
    }

    /// Execute the action a grant-starting transition produced.
    async fn perform(
        &mut self,
        action: ExchangeAction,
        extra: &QueryParams,
        update: bool,
        operation: &'static str,
    ) -> Result<Grant> {
        match action {
            ExchangeAction::RequestGrant(grant_type) => {
                let url = endpoints::token_url(&self.credentials, grant_type, extra);
                self.run_grant(grant_type, url, update).await
            }
            _ => Err(self.invalid_state(operation)),
        }
    }

    async fn run_grant(
        &mut self,
        grant_type: GrantType,
        url: String,
        update: bool,
    ) -> Result<Grant> {
        let domain = self.credentials.domain().to_owned();
        debug!(domain = %domain, grant_type = %grant_type, "requesting token grant");

        let timeout = self.credentials.timeout();
        let mut in_flight = InFlight::new(&mut self.state);

        match request_tokens(self.transport.as_ref(), &url, timeout).await {
            Ok(tokens) => {
                if update {
                    let mut changes = tokens.to_update();
                    if grant_type == GrantType::RefreshToken {
                        changes.member_id = None;
                    }
                    let (ready, missing) = self.credentials.apply_partial(&changes);
                    if !ready {
                        warn!(
                            domain = %domain,
                            missing = missing.len(),
                            "credential set incomplete after grant"
                        );
                    }
                }
                in_flight.settle(ExchangeEvent::GrantSucceeded);
                info!(domain = %domain, grant_type = %grant_type, update, "token grant succeeded");
                Ok(Grant {
                    grant_type,
                    url,
                    tokens,
                })
            }
            Err(e) => {
                warn!(domain = %domain, grant_type = %grant_type, error = %e, "token grant failed");
                in_flight.settle(ExchangeEvent::GrantFailed(e.to_string()));
                Err(e)
            }
        }
    }

    fn add_client_secret(&self, extra: &mut QueryParams) {
        extra.set_if_absent(
            Field::ApplicationSecret.wire_name(),
            self.credentials.application_secret(),
        );
    }

    fn reject_if_unconfigured(&self) -> Result<()> {
        match self.state {
            ExchangeState::Unconfigured => Err(Error::NotConfigured),
            _ => Ok(()),
        }
    }

    fn require_bootstrap(&self) -> Result<()> {
        let missing = validate::missing(&self.credentials, &Field::BOOTSTRAP);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingFields(missing))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state.label(),
        }
    }

    /// Apply `event`; the returned action is what the caller must execute.
    fn transition(
        &mut self,
        event: ExchangeEvent,
        operation: &'static str,
    ) -> Result<ExchangeAction> {
        let (state, action) = handle_event(self.state.clone(), event);
        if action == ExchangeAction::Reject {
            return Err(match state {
                ExchangeState::Unconfigured => Error::NotConfigured,
                _ => self.invalid_state(operation),
            });
        }
        debug!(from = %self.state, to = %state, ?action, "exchange state transition");
        self.state = state;
        Ok(action)
    }
}

/// The `Exchanging`/`Refreshing` state of a grant awaiting the token endpoint.
///
/// Settled with the grant's outcome. If the grant future is dropped first
/// (an outer timeout, say) the state falls to `Failed` so the exchanger stays
/// usable.
struct InFlight<'a> {
    state: &'a mut ExchangeState,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn new(state: &'a mut ExchangeState) -> Self {
        Self {
            state,
            settled: false,
        }
    }

    fn settle(&mut self, event: ExchangeEvent) {
        let (next, _) = handle_event(self.state.clone(), event);
        *self.state = next;
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(state = %self.state, "token grant dropped before completion");
            self.settle(ExchangeEvent::GrantFailed(
                "grant cancelled before completion".into(),
            ));
        }
    }
}

async fn request_tokens(
    transport: &dyn Transport,
    url: &str,
    timeout: Duration,
) -> Result<TokenResponse> {
    let response = transport
        .post(url, &QueryParams::new(), timeout)
        .await
        .map_err(|source| Error::Transport {
            url: url.to_owned(),
            source,
        })?;

    if !response.is_success() {
        let status = response.status.unwrap_or_default();
        return Err(Error::Transport {
            url: url.to_owned(),
            source: TransportError::new(format!(
                "token endpoint returned {status}: {}",
                response.body
            )),
        });
    }

    TokenResponse::parse(url, &response.body)
}
