/// Configuration management for Padlock Cloud
///
/// A `ServerConfig` is either assembled from command line flags (which fall
/// back to `PC_*` environment variables, see `cli.rs`) or loaded from a
/// single TOML file. When a file is given, flags and environment are ignored.
use crate::{
    account::TokenPolicy,
    rate_limit::{EmailRateLimiter, QuotaScope, RateQuota},
};
use axum_extra::extract::cookie::Key;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServiceConfig,
    pub storage: StorageConfig,
    pub email: EmailConfig,
    pub logging: LoggingConfig,
    pub rate_limit: RateLimitConfig,
    pub tokens: TokenConfig,
}

/// HTTP service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub port: u16,
    /// Directory holding the `static` assets folder
    pub assets_path: PathBuf,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// Public host used for generated links. May include port and scheme.
    /// Without it the request's `Host` header is trusted.
    pub host: Option<String>,
    /// Base64 encoded cookie signing secret. Generated at startup if unset.
    pub secret: Option<String>,
    /// Time in-flight requests get to finish on shutdown
    pub shutdown_grace_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            assets_path: PathBuf::from("assets"),
            tls_cert: None,
            tls_key: None,
            host: None,
            secret: None,
            shutdown_grace_secs: 10,
        }
    }
}

/// Default upper bound for stored data blobs
pub const DEFAULT_MAX_DATA_SIZE: usize = 10 * 1024 * 1024;

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub path: PathBuf,
    /// Largest data blob accepted by `PUT /store/`, in bytes
    pub max_data_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("db/padlock.sqlite"),
            max_data_size: DEFAULT_MAX_DATA_SIZE,
        }
    }
}

/// Outgoing mail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// SMTP relay host. Emails are only logged when unset.
    pub server: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Sender address, defaults to the smtp user
    pub from: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            server: None,
            port: 587,
            user: None,
            password: None,
            from: None,
        }
    }
}

impl EmailConfig {
    pub fn from_address(&self) -> String {
        self.from
            .clone()
            .or_else(|| self.user.clone())
            .unwrap_or_else(|| "noreply@padlock.local".to_string())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_file: Option<PathBuf>,
    /// Receives error level events only
    pub err_file: Option<PathBuf>,
    /// Address unexpected server errors are mailed to
    pub notify_errors: Option<String>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Per-ip request budget, 0 disables the request throttle
    pub requests_per_minute: u32,
    pub emails_per_ip_per_minute: u32,
    pub emails_per_address_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 600,
            emails_per_ip_per_minute: 5,
            emails_per_address_per_minute: 5,
        }
    }
}

/// Auth token lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub api_max_age_days: i64,
    pub web_max_age_hours: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            api_max_age_days: 365,
            web_max_age_hours: 24 * 7,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            return Err(ConfigError::Invalid(
                "tls_cert and tls_key must be provided together".to_string(),
            ));
        }

        if let Some(secret) = &self.server.secret {
            let decoded = STANDARD
                .decode(secret)
                .map_err(|_| ConfigError::Invalid("secret must be base64 encoded".to_string()))?;
            if decoded.len() < 32 {
                return Err(ConfigError::Invalid(
                    "secret must be at least 32 bytes".to_string(),
                ));
            }
        }

        if self.storage.max_data_size == 0 {
            return Err(ConfigError::Invalid(
                "max_data_size must be positive".to_string(),
            ));
        }

        if self.tokens.api_max_age_days <= 0 || self.tokens.web_max_age_hours <= 0 {
            return Err(ConfigError::Invalid(
                "token lifetimes must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_tls(&self) -> bool {
        self.server.tls_cert.is_some() && self.server.tls_key.is_some()
    }

    /// Cookie signing key derived from the configured secret, or a random
    /// key when no secret is configured (sessions then end with the process).
    pub fn cookie_key(&self) -> Result<Key, ConfigError> {
        match &self.server.secret {
            Some(secret) => {
                let decoded = STANDARD
                    .decode(secret)
                    .map_err(|_| ConfigError::Invalid("secret must be base64 encoded".to_string()))?;
                Ok(Key::from(Sha512::digest(&decoded).as_slice()))
            }
            None => {
                tracing::warn!("No secret configured, generating a random cookie signing key");
                Ok(Key::generate())
            }
        }
    }

    pub fn token_policy(&self) -> TokenPolicy {
        TokenPolicy {
            api_max_age: chrono::Duration::days(self.tokens.api_max_age_days),
            web_max_age: chrono::Duration::hours(self.tokens.web_max_age_hours),
        }
    }

    pub fn email_rate_limiter(&self) -> EmailRateLimiter {
        EmailRateLimiter::new(vec![
            RateQuota::per_minute(QuotaScope::Ip, self.rate_limit.emails_per_ip_per_minute),
            RateQuota::per_minute(
                QuotaScope::Email,
                self.rate_limit.emails_per_address_per_minute,
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.rate_limit.emails_per_ip_per_minute, 5);
        assert_eq!(config.storage.max_data_size, DEFAULT_MAX_DATA_SIZE);
        assert!(config.email.server.is_none());
        assert!(!config.is_tls());
    }

    #[test]
    fn test_partial_file() {
        let config = ServerConfig::from_toml(
            r#"
            [server]
            port = 8443
            host = "cloud.example.com"

            [email]
            server = "smtp.example.com"
            user = "mailer@example.com"

            [logging]
            notify_errors = "ops@example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8443);
        assert_eq!(config.server.host.as_deref(), Some("cloud.example.com"));
        assert_eq!(config.email.port, 587);
        assert_eq!(config.email.from_address(), "mailer@example.com");
        assert_eq!(
            config.logging.notify_errors.as_deref(),
            Some("ops@example.com")
        );
    }

    #[test]
    fn test_tls_requires_both_files() {
        let result = ServerConfig::from_toml(
            r#"
            [server]
            tls_cert = "cert.pem"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_data_size_is_invalid() {
        let result = ServerConfig::from_toml("[storage]\nmax_data_size = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_secret_validation() {
        let short = STANDARD.encode([1u8; 8]);
        let result = ServerConfig::from_toml(&format!("[server]\nsecret = \"{}\"", short));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = ServerConfig::from_toml("[server]\nsecret = \"not base64!\"");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_cookie_key_is_stable_for_secret() {
        let mut config = ServerConfig::default();
        config.server.secret = Some(STANDARD.encode([7u8; 32]));

        let a = config.cookie_key().unwrap();
        let b = config.cookie_key().unwrap();
        assert_eq!(a.master(), b.master());
    }
}
