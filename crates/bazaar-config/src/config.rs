//! Configuration management for the session subsystem.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default API URL (can be overridden at compile time via BAZAAR_API_URL env var).
pub const DEFAULT_API_URL: &str = match option_env!("BAZAAR_API_URL") {
    Some(url) => url,
    None => "http://localhost:1337",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Upper bound on a single `verify-token` round trip.
pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 15;

/// Default OpenID issuer used for provider sign-in.
pub const DEFAULT_OAUTH_ISSUER: &str = "https://accounts.google.com";

/// Default loopback port for the OAuth redirect.
pub const DEFAULT_OAUTH_CALLBACK_PORT: u16 = 9876;

/// Default time the user has to finish the consent screen.
pub const DEFAULT_OAUTH_TIMEOUT_SECS: u64 = 120;

/// Provider sign-in settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSettings {
    /// OAuth client identifier registered with the provider.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Issuer URL; the discovery document lives under `/.well-known/openid-configuration`.
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// Fetch the discovery document instead of using the built-in one.
    #[serde(default)]
    pub discover: bool,
    /// Loopback port the redirect lands on.
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,
    /// Seconds to wait for the consent screen before treating the flow as abandoned.
    #[serde(default = "default_oauth_timeout_secs")]
    pub timeout_secs: u64,
    /// Requested scopes.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_issuer() -> String {
    DEFAULT_OAUTH_ISSUER.to_string()
}

fn default_callback_port() -> u16 {
    DEFAULT_OAUTH_CALLBACK_PORT
}

fn default_oauth_timeout_secs() -> u64 {
    DEFAULT_OAUTH_TIMEOUT_SECS
}

fn default_scopes() -> Vec<String> {
    vec!["openid".into(), "profile".into(), "email".into()]
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            issuer: default_issuer(),
            discover: false,
            callback_port: default_callback_port(),
            timeout_secs: default_oauth_timeout_secs(),
            scopes: default_scopes(),
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the marketplace API (`/login`, `/register`, `/verify-token`).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Timeout applied to token verification.
    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: u64,
    /// Provider sign-in settings.
    #[serde(default)]
    pub oauth: OAuthSettings,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_verify_timeout_secs() -> u64 {
    DEFAULT_VERIFY_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_url: default_api_url(),
            verify_timeout_secs: default_verify_timeout_secs(),
            oauth: OAuthSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    fn load_from_env(&mut self) {
        if let Some(level) = env_value("BAZAAR_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = env_value("BAZAAR_API_URL") {
            self.api_url = url;
        }
        if let Some(secs) = env_value("BAZAAR_VERIFY_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.verify_timeout_secs = secs;
        }
        if let Some(client_id) = env_value("BAZAAR_OAUTH_CLIENT_ID") {
            self.oauth.client_id = Some(client_id);
        }
    }

    /// Reject settings that would make the subsystem unusable.
    pub fn validate(&self) -> CoreResult<()> {
        self.api_url()?;
        Url::parse(&self.oauth.issuer)?;
        if self.verify_timeout_secs == 0 {
            return Err(CoreError::Config(
                "verify_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The API base URL, parsed.
    pub fn api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_url).map_err(CoreError::from)
    }

    /// Verification timeout as a Duration.
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.verify_timeout_secs, DEFAULT_VERIFY_TIMEOUT_SECS);
        assert_eq!(config.oauth.callback_port, DEFAULT_OAUTH_CALLBACK_PORT);
        assert_eq!(config.oauth.scopes, vec!["openid", "profile", "email"]);
        assert!(config.oauth.client_id.is_none());
    }

    #[test]
    fn test_config_load_from_file_partial() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        std::fs::write(
            &config_path,
            r#"{ "log_level": "debug", "oauth": { "client_id": "abc.apps" } }"#,
        )
        .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.oauth.client_id.as_deref(), Some("abc.apps"));
        assert_eq!(config.oauth.issuer, DEFAULT_OAUTH_ISSUER);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        paths.ensure_dirs().unwrap();

        let mut config = Config::default();
        config.api_url = "https://api.bazaar.test".to_string();
        config.verify_timeout_secs = 3;
        std::fs::write(
            paths.config_file(),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.api_url, "https://api.bazaar.test");
        assert_eq!(loaded.verify_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.oauth.issuer, DEFAULT_OAUTH_ISSUER);
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config::default();
        config.api_url = "not a valid url".to_string();
        assert!(config.api_url().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_zero_timeout_rejected() {
        let mut config = Config::default();
        config.verify_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }
}
