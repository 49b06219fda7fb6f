//! Portal OAuth operator CLI
//!
//! Drives the OAuth dance for one portal:
//! 1. `authorize-url` / `listen` send the user to the portal's consent page
//! 2. The authorization code is exchanged for tokens
//! 3. Tokens are persisted in the token store, keyed by domain
//! 4. `refresh` renews them on demand

mod callback;
mod cli;
mod config;
mod error;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use portal_auth::params::wire;
use portal_auth::{
    Field, Grant, QueryParams, ReqwestTransport, TokenExchanger, TokenStore, generate_state,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Args, Command};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config_path = Config::resolve_path(args.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        domain = %config.portal.domain,
        application_id = %config.portal.application_id,
        store = %config.store.path.display(),
        "configuration loaded"
    );

    let store = TokenStore::open(config.store.path.clone())
        .await
        .context("failed to open token store")?;

    let mut credentials = config.credentials();
    if let Some(stored) = store.get(&config.portal.domain).await {
        credentials.apply_partial(&stored.to_update());
        info!(domain = %config.portal.domain, "restored stored tokens");
    }

    let transport = Arc::new(ReqwestTransport::default());
    let mut exchanger = TokenExchanger::new(credentials, transport);

    match args.command {
        Command::AuthorizeUrl => {
            let state = generate_state();
            let url = exchanger.authorization_url(&authorize_params(&config, &state))?;
            println!("{url}");
            println!("state: {state}");
        }
        Command::Listen => {
            let listener = TcpListener::bind(config.callback.listen_addr)
                .await
                .with_context(|| format!("failed to bind to {}", config.callback.listen_addr))?;

            let state = generate_state();
            let url = exchanger.authorization_url(&authorize_params(&config, &state))?;
            println!("Open this URL to authorize the application:\n{url}");

            let redirect = callback::wait_for_redirect(
                listener,
                &config.callback.path,
                &state,
                Duration::from_secs(config.callback.wait_secs),
            )
            .await?;

            if let Some(domain) = redirect.get("domain") {
                if domain != config.portal.domain {
                    warn!(
                        expected = %config.portal.domain,
                        received = domain,
                        "redirect came from a different portal"
                    );
                }
            }

            let code = redirect.get(wire::CODE).unwrap_or_default();
            let grant = exchanger.exchange_code(&code_params(code), true).await?;
            persist(&store, &exchanger, &grant).await?;
            println!("Authorized. Tokens saved to {}", store.path().display());
        }
        Command::Exchange { code } => {
            let grant = exchanger.exchange_code(&code_params(&code), true).await?;
            persist(&store, &exchanger, &grant).await?;
            println!("Authorized. Tokens saved to {}", store.path().display());
        }
        Command::Refresh => {
            let grant = exchanger.refresh(true).await?;
            persist(&store, &exchanger, &grant).await?;
            println!("Access token refreshed. Tokens saved to {}", store.path().display());
        }
        Command::Status => {
            let mut credentials = exchanger.credentials().clone();
            let (ready, missing) = credentials.validate();
            println!("domain: {}", credentials.domain());
            println!("state: {}", exchanger.state());
            if ready {
                println!("ready: yes");
            } else {
                println!("ready: no");
                for field in &missing {
                    println!("  {field}");
                }
            }
            if let Some(stored) = store.get(credentials.domain()).await {
                if stored.is_expired() {
                    println!("access token: expired, run `portal-oauth refresh`");
                }
            }
        }
    }

    Ok(())
}

/// Extras for the authorization URL: anti-forgery state and the redirect target.
fn authorize_params(config: &Config, state: &str) -> QueryParams {
    [
        (wire::STATE.to_owned(), state.to_owned()),
        (Field::RedirectUri.wire_name().to_owned(), config.redirect_uri()),
    ]
    .into_iter()
    .collect()
}

fn code_params(code: &str) -> QueryParams {
    [(wire::CODE, code)].into_iter().collect()
}

async fn persist(store: &TokenStore, exchanger: &TokenExchanger, grant: &Grant) -> Result<()> {
    let credentials = exchanger.credentials();
    store
        .put_grant(credentials, grant)
        .await
        .context("failed to persist tokens")?;
    info!(domain = %credentials.domain(), grant_type = %grant.grant_type, "tokens persisted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_config(dir: &Path) -> Config {
        let _lock = crate::config::tests::ENV_MUTEX.lock().unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            r#"
[portal]
domain = "d.example"
application_id = "app.123"
application_scope = "crm"
"#,
        )
        .unwrap();
        Config::load(&path).unwrap()
    }

    #[test]
    fn authorize_params_carry_state_and_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let params = authorize_params(&config, "xyz");
        assert_eq!(
            params.encode(),
            "state=xyz&redirect_uri=http%3A%2F%2F127.0.0.1%3A8080%2Fauthorization%2F"
        );
    }

    #[test]
    fn code_params_only_carry_code() {
        let params = code_params("c0de");
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("code"), Some("c0de"));
    }
}
