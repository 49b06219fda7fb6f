//! Token persistence
//!
//! One JSON document maps each portal domain to the tokens of its last
//! successful grant. Every change rewrites the whole document through a
//! sibling temp file that is renamed into place, so readers never see a
//! partial write. The in-memory map sits behind a tokio Mutex; the lock is
//! held across the write so two grants finishing together land in order.
//!
//! Application secrets are never written here; they come from configuration.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credentials::{CredentialSet, CredentialUpdate};
use crate::error::{Error, Result};
use crate::exchange::Grant;
use crate::params::Field;

type Portals = BTreeMap<String, StoredTokens>;

/// Tokens persisted for one portal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub member_id: String,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub scope: String,
    /// Access token expiry as unix timestamp in milliseconds, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,
}

impl StoredTokens {
    fn snapshot(credentials: &CredentialSet, expires: Option<u64>) -> Self {
        Self {
            member_id: credentials.member_id().to_owned(),
            access_token: credentials.access_token().to_owned(),
            refresh_token: credentials.refresh_token().to_owned(),
            scope: credentials.application_scope().to_owned(),
            expires,
        }
    }

    /// Whether the access token is past its expiry. Unknown expiry counts as live.
    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|expires| expires <= now_millis())
    }

    /// Update that restores these tokens into a credential set.
    pub fn to_update(&self) -> CredentialUpdate {
        CredentialUpdate::default()
            .with(Field::MemberId, self.member_id.as_str())
            .with(Field::AccessToken, self.access_token.as_str())
            .with(Field::RefreshToken, self.refresh_token.as_str())
            .with(Field::ApplicationScope, self.scope.as_str())
    }
}

/// `now_ms + expires_in` seconds, or `None` when that does not fit in a u64.
fn expiry_at(expires_in: u64, now_ms: u64) -> Option<u64> {
    expires_in
        .checked_mul(1000)
        .and_then(|ms| now_ms.checked_add(ms))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// File-backed token store keyed by portal domain.
pub struct TokenStore {
    path: PathBuf,
    portals: Mutex<Portals>,
}

impl TokenStore {
    /// Open the store at `path`, creating it as `{}` when absent.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let portals = match read_portals(&path).await? {
            Some(portals) => {
                info!(path = %path.display(), portals = portals.len(), "opened token store");
                portals
            }
            None => {
                info!(path = %path.display(), "no token store yet, creating an empty one");
                let portals = Portals::new();
                write_portals(&path, &portals).await?;
                portals
            }
        };

        Ok(Self {
            path,
            portals: Mutex::new(portals),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tokens stored for `domain`.
    pub async fn get(&self, domain: &str) -> Option<StoredTokens> {
        self.portals.lock().await.get(domain).cloned()
    }

    /// Record the outcome of `grant` for the portal `credentials` belong to.
    ///
    /// Token fields are taken from `credentials`, which the exchanger has
    /// already updated, so a refresh keeps the `member_id` of the original
    /// grant. Expiry is computed from `expires_in` relative to now; a value
    /// too large to represent is stored as unknown.
    pub async fn put_grant(
        &self,
        credentials: &CredentialSet,
        grant: &Grant,
    ) -> Result<StoredTokens> {
        let expires_in = grant.tokens.expires_in();
        let expires = expires_in.and_then(|secs| expiry_at(secs, now_millis()));
        if let (Some(secs), None) = (expires_in, expires) {
            warn!(expires_in = secs, "token lifetime out of range, storing without expiry");
        }

        let tokens = StoredTokens::snapshot(credentials, expires);
        self.record(credentials.domain(), tokens.clone()).await?;
        debug!(domain = %credentials.domain(), grant_type = %grant.grant_type, "grant recorded");
        Ok(tokens)
    }

    async fn record(&self, domain: &str, tokens: StoredTokens) -> Result<()> {
        let mut portals = self.portals.lock().await;
        portals.insert(domain.to_owned(), tokens);
        write_portals(&self.path, &portals).await
    }
}

/// Read the store document. `Ok(None)` when the file does not exist.
async fn read_portals(path: &Path) -> Result<Option<Portals>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(format!("cannot read {}: {e}", path.display()))),
    };
    serde_json::from_str(&contents).map(Some).map_err(|e| {
        Error::CredentialParse(format!("{} is not a token store: {e}", path.display()))
    })
}

/// Sibling temp file for `path`, unique per process and per write.
fn temp_path(path: &Path) -> Result<PathBuf> {
    static WRITES: AtomicU64 = AtomicU64::new(0);

    let name = path
        .file_name()
        .ok_or_else(|| Error::Io(format!("{} does not name a file", path.display())))?;
    let seq = WRITES.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(".{}.{}.{seq}.tmp", name.to_string_lossy(), std::process::id());
    Ok(path.with_file_name(tmp_name))
}

async fn write_portals(path: &Path, portals: &Portals) -> Result<()> {
    let json = serde_json::to_vec_pretty(portals)
        .map_err(|e| Error::CredentialParse(format!("cannot encode token store: {e}")))?;
    let tmp = temp_path(path)?;

    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|e| Error::Io(format!("cannot write {}: {e}", tmp.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| Error::Io(format!("cannot restrict {}: {e}", tmp.display())))?;
    }

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(Error::Io(format!("cannot replace {}: {e}", path.display())));
    }

    debug!(path = %path.display(), portals = portals.len(), "token store written");
    Ok(())
}
