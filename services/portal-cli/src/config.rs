//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The application secret is loaded from PORTAL_APPLICATION_SECRET or
//! application_secret_file, never stored in the TOML directly.

use portal_auth::{CredentialSet, DEFAULT_TIMEOUT_SECS, Secret};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Env var holding the application secret
pub const SECRET_ENV: &str = "PORTAL_APPLICATION_SECRET";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub portal: PortalConfig,
    #[serde(default)]
    pub callback: CallbackConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Registered application and the portal it talks to
#[derive(Debug, Deserialize)]
pub struct PortalConfig {
    /// Portal host name, e.g. `example.bitrix24.ru`
    pub domain: String,
    pub application_id: String,
    #[serde(skip)]
    pub application_secret: Option<Secret<String>>,
    /// Path to a file containing the application secret
    #[serde(default)]
    pub application_secret_file: Option<PathBuf>,
    /// Comma-joined permission names, e.g. `crm, lists`
    #[serde(default)]
    pub application_scope: String,
    /// Defaults to the callback listener URL
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Local listener that receives the authorization redirect
#[derive(Debug, Deserialize)]
pub struct CallbackConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_callback_path")]
    pub path: String,
    /// How long `listen` waits for the redirect
    #[serde(default = "default_wait")]
    pub wait_secs: u64,
}

/// Token file location
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            path: default_callback_path(),
            wait_secs: default_wait(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_callback_path() -> String {
    "/authorization/".into()
}

fn default_wait() -> u64 {
    300
}

fn default_store_path() -> PathBuf {
    PathBuf::from("portal-tokens.json")
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Application secret resolution order:
    /// 1. PORTAL_APPLICATION_SECRET env var
    /// 2. application_secret_file path from config
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(secret) = std::env::var(SECRET_ENV) {
            config.portal.application_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.portal.application_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                Error::Config(format!(
                    "failed to read application_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.portal.application_secret = Some(Secret::new(secret));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let domain = &self.portal.domain;
        if domain.is_empty() {
            return Err(Error::Config("domain must not be empty".into()));
        }
        if domain.contains("://") || domain.contains('/') {
            return Err(Error::Config(format!(
                "domain must be a bare host name without scheme or path, got: {domain}"
            )));
        }

        if self.portal.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be greater than 0".into()));
        }

        if let Some(ref uri) = self.portal.redirect_uri {
            if !uri.starts_with("http://") && !uri.starts_with("https://") {
                return Err(Error::Config(format!(
                    "redirect_uri must start with http:// or https://, got: {uri}"
                )));
            }
        }

        if !self.callback.path.starts_with('/') {
            return Err(Error::Config(format!(
                "callback path must start with '/', got: {}",
                self.callback.path
            )));
        }

        if self.callback.wait_secs == 0 {
            return Err(Error::Config("wait_secs must be greater than 0".into()));
        }

        Ok(())
    }

    /// Redirect URI sent to the portal: the configured one, else the callback listener.
    pub fn redirect_uri(&self) -> String {
        match self.portal.redirect_uri {
            Some(ref uri) => uri.clone(),
            None => format!("http://{}{}", self.callback.listen_addr, self.callback.path),
        }
    }

    /// Credential set seeded from configuration. Tokens are not included.
    pub fn credentials(&self) -> CredentialSet {
        let mut credentials = CredentialSet::new();
        credentials.set_timeout_secs(self.portal.timeout_secs);
        credentials.configure(
            self.portal.domain.as_str(),
            self.portal
                .application_secret
                .as_ref()
                .map(|s| s.expose().as_str())
                .unwrap_or_default(),
            self.portal.application_id.as_str(),
        );
        credentials.set_application_scope(self.portal.application_scope.as_str());
        credentials.set_redirect_uri(self.redirect_uri());
        credentials
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("portal-oauth.toml")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that read or mutate environment variables.
    pub(crate) static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
[portal]
domain = "demoapplic.bitrix24.ru"
application_id = "local.598ca908469d91.28776402"
application_scope = "crm, lists"
"#
    }

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), valid_toml());
        unsafe { remove_env(SECRET_ENV) };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.portal.domain, "demoapplic.bitrix24.ru");
        assert_eq!(config.portal.application_scope, "crm, lists");
        assert_eq!(config.portal.timeout_secs, 30);
        assert!(config.portal.application_secret.is_none());
        assert_eq!(config.callback.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.callback.path, "/authorization/");
        assert_eq!(config.callback.wait_secs, 300);
        assert_eq!(config.store.path, PathBuf::from("portal-tokens.json"));
        assert_eq!(
            config.redirect_uri(),
            "http://127.0.0.1:8080/authorization/"
        );
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "not valid {{{{ toml");
        assert!(matches!(Config::load(&path), Err(Error::Toml(_))));
    }

    #[test]
    fn test_secret_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), valid_toml());

        unsafe { set_env(SECRET_ENV, "env-secret") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(SECRET_ENV) };

        assert_eq!(
            config.portal.application_secret.as_ref().unwrap().expose(),
            "env-secret"
        );
    }

    #[test]
    fn test_secret_from_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let secret_path = dir.path().join("secret");
        std::fs::write(&secret_path, "file-secret\n").unwrap();
        let path = write_config(
            dir.path(),
            &format!(
                "{}application_secret_file = \"{}\"\n",
                valid_toml(),
                secret_path.display()
            ),
        );

        unsafe { remove_env(SECRET_ENV) };
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.portal.application_secret.as_ref().unwrap().expose(),
            "file-secret"
        );
    }

    #[test]
    fn test_secret_env_overrides_nonexistent_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            &format!(
                "{}application_secret_file = \"/nonexistent/secret\"\n",
                valid_toml()
            ),
        );

        unsafe { set_env(SECRET_ENV, "env-wins") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(SECRET_ENV) };

        assert_eq!(
            config.portal.application_secret.as_ref().unwrap().expose(),
            "env-wins"
        );
    }

    #[test]
    fn test_secret_file_nonexistent_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            &format!(
                "{}application_secret_file = \"/nonexistent/secret\"\n",
                valid_toml()
            ),
        );

        unsafe { remove_env(SECRET_ENV) };
        let err = Config::load(&path).unwrap_err();
        assert!(
            err.to_string().contains("application_secret_file"),
            "got: {err}"
        );
    }

    #[test]
    fn test_whitespace_secret_file_yields_none() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let secret_path = dir.path().join("secret");
        std::fs::write(&secret_path, "  \n  ").unwrap();
        let path = write_config(
            dir.path(),
            &format!(
                "{}application_secret_file = \"{}\"\n",
                valid_toml(),
                secret_path.display()
            ),
        );

        unsafe { remove_env(SECRET_ENV) };
        let config = Config::load(&path).unwrap();
        assert!(config.portal.application_secret.is_none());
    }

    #[test]
    fn test_domain_with_scheme_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[portal]
domain = "https://demoapplic.bitrix24.ru"
application_id = "app"
"#,
        );

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("bare host name"), "got: {err}");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            &format!("{}timeout_secs = 0\n", valid_toml()),
        );
        assert!(Config::load(&path).is_err(), "timeout_secs = 0 must be rejected");
    }

    #[test]
    fn test_invalid_redirect_uri_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            &format!("{}redirect_uri = \"localhost/authorization/\"\n", valid_toml()),
        );

        let err = Config::load(&path).unwrap_err();
        assert!(
            err.to_string().contains("redirect_uri must start with http"),
            "got: {err}"
        );
    }

    #[test]
    fn test_callback_section_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            &format!(
                "{}\n[callback]\nlisten_addr = \"127.0.0.1:9999\"\npath = \"/cb\"\nwait_secs = 10\n\n[store]\npath = \"/var/lib/portal/tokens.json\"\n",
                valid_toml()
            ),
        );
        unsafe { remove_env(SECRET_ENV) };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.callback.wait_secs, 10);
        assert_eq!(config.redirect_uri(), "http://127.0.0.1:9999/cb");
        assert_eq!(
            config.store.path,
            PathBuf::from("/var/lib/portal/tokens.json")
        );
    }

    #[test]
    fn test_credentials_seeded_from_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            &format!(
                "{}redirect_uri = \"http://localhost/authorization/\"\ntimeout_secs = 12\n",
                valid_toml()
            ),
        );

        unsafe { set_env(SECRET_ENV, "s3cr3t") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(SECRET_ENV) };

        let creds = config.credentials();
        assert!(creds.is_configured());
        assert_eq!(creds.domain(), "demoapplic.bitrix24.ru");
        assert_eq!(creds.application_secret(), "s3cr3t");
        assert_eq!(creds.application_id(), "local.598ca908469d91.28776402");
        assert_eq!(creds.application_scope(), "crm, lists");
        assert_eq!(creds.redirect_uri(), "http://localhost/authorization/");
        assert_eq!(creds.timeout_secs(), 12);
        assert!(!creds.is_ready());
    }

    #[test]
    fn test_credentials_without_secret_are_unconfigured() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), valid_toml());
        unsafe { remove_env(SECRET_ENV) };

        let config = Config::load(&path).unwrap();
        assert!(!config.credentials().is_configured());
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(path, PathBuf::from("/env/path.toml"));
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("portal-oauth.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
    }
}
