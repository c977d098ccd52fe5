//! Configuration loading for the pieces service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `PIECES_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "PIECES_";
/// Upper bound for `max_interval_seconds`: one year
const POLL_INTERVAL_CEILING_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Application configuration derived from `PIECES_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    /// Externally reachable base URL, used to build webhook URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default = "default_http_user_agent")]
    pub http_user_agent: String,
    #[serde(default = "default_webhook_signature_tolerance_seconds")]
    pub webhook_signature_tolerance_seconds: u64,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub pieces: PiecesConfig,
}

/// Polling scheduler parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PollingConfig {
    #[serde(default = "default_polling_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    #[serde(default = "default_polling_default_interval_seconds")]
    pub default_interval_seconds: u64,
    #[serde(default = "default_polling_min_interval_seconds")]
    pub min_interval_seconds: u64,
    #[serde(default = "default_polling_max_interval_seconds")]
    pub max_interval_seconds: u64,
    #[serde(default = "default_polling_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_polling_jitter_pct_max")]
    pub jitter_pct_max: f64,
}

/// Vendor endpoints; overridable so tests and sandboxes can redirect traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PiecesConfig {
    #[serde(default = "default_bexio_api_base")]
    pub bexio_api_base: String,
    #[serde(default = "default_xero_api_base")]
    pub xero_api_base: String,
    #[serde(default = "default_xero_connections_url")]
    pub xero_connections_url: String,
    #[serde(default = "default_pinecone_control_base")]
    pub pinecone_control_base: String,
    /// Replaces `https://{subdomain}.zendesk.com` when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zendesk_base_override: Option<String>,
    #[serde(default = "default_webhook_signature_tolerance_seconds")]
    pub webhook_signature_tolerance_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            public_base_url: default_public_base_url(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            http_timeout_ms: default_http_timeout_ms(),
            http_user_agent: default_http_user_agent(),
            webhook_signature_tolerance_seconds: default_webhook_signature_tolerance_seconds(),
            polling: PollingConfig::default(),
            pieces: PiecesConfig::default(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_polling_tick_interval_seconds(),
            default_interval_seconds: default_polling_default_interval_seconds(),
            min_interval_seconds: default_polling_min_interval_seconds(),
            max_interval_seconds: default_polling_max_interval_seconds(),
            batch_size: default_polling_batch_size(),
            jitter_pct_max: default_polling_jitter_pct_max(),
        }
    }
}

impl Default for PiecesConfig {
    fn default() -> Self {
        Self {
            bexio_api_base: default_bexio_api_base(),
            xero_api_base: default_xero_api_base(),
            xero_connections_url: default_xero_connections_url(),
            pinecone_control_base: default_pinecone_control_base(),
            zendesk_base_override: None,
            webhook_signature_tolerance_seconds: default_webhook_signature_tolerance_seconds(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Webhook URL handed to vendors for a trigger instance
    pub fn webhook_url(&self, instance_id: &uuid::Uuid) -> String {
        format!(
            "{}/webhooks/{}",
            self.public_base_url.trim_end_matches('/'),
            instance_id
        )
    }

    /// Returns a redacted JSON representation (credentials in URLs are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        config.database_url = redact_url_credentials(&config.database_url);
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if url::Url::parse(&self.public_base_url).is_err() {
            return Err(ConfigError::InvalidPublicBaseUrl {
                value: self.public_base_url.clone(),
            });
        }

        if self.http_timeout_ms < 100 {
            return Err(ConfigError::InvalidHttpTimeout {
                value: self.http_timeout_ms,
            });
        }

        if self.webhook_signature_tolerance_seconds == 0 {
            return Err(ConfigError::InvalidSignatureTolerance {
                value: self.webhook_signature_tolerance_seconds,
            });
        }

        self.polling.validate()?;

        Ok(())
    }
}

impl PollingConfig {
    /// Validate polling scheduler bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_seconds < 1 || self.tick_interval_seconds > 300 {
            return Err(ConfigError::InvalidPollingTickInterval {
                value: self.tick_interval_seconds,
            });
        }

        if self.min_interval_seconds == 0 {
            return Err(ConfigError::InvalidPollingMinInterval {
                value: self.min_interval_seconds,
            });
        }

        if self.default_interval_seconds < self.min_interval_seconds {
            return Err(ConfigError::InvalidPollingDefaultInterval {
                value: self.default_interval_seconds,
                min_allowed: self.min_interval_seconds,
            });
        }

        if self.max_interval_seconds < self.default_interval_seconds
            || self.max_interval_seconds > POLL_INTERVAL_CEILING_SECONDS
        {
            return Err(ConfigError::InvalidPollingMaxInterval {
                value: self.max_interval_seconds,
                min_allowed: self.default_interval_seconds,
                max_allowed: POLL_INTERVAL_CEILING_SECONDS,
            });
        }

        if self.batch_size == 0 {
            return Err(ConfigError::InvalidPollingBatchSize {
                value: self.batch_size,
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_pct_max) {
            return Err(ConfigError::InvalidPollingJitter {
                value: self.jitter_pct_max,
            });
        }

        Ok(())
    }

    /// Clamp a requested per-instance interval to the configured minimum.
    /// `None` when the request exceeds `max_interval_seconds`.
    pub fn effective_interval(&self, requested: Option<u64>) -> Option<u64> {
        let interval = requested
            .unwrap_or(self.default_interval_seconds)
            .max(self.min_interval_seconds);
        (interval <= self.max_interval_seconds).then_some(interval)
    }
}

fn redact_url_credentials(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("[REDACTED]"));
            parsed.to_string()
        }
        _ => raw.to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://pieces.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

fn default_http_user_agent() -> String {
    format!("pieces/{}", env!("CARGO_PKG_VERSION"))
}

fn default_webhook_signature_tolerance_seconds() -> u64 {
    300
}

fn default_polling_tick_interval_seconds() -> u64 {
    15
}

fn default_polling_default_interval_seconds() -> u64 {
    300
}

fn default_polling_min_interval_seconds() -> u64 {
    60
}

fn default_polling_max_interval_seconds() -> u64 {
    7 * 24 * 60 * 60
}

fn default_polling_batch_size() -> u64 {
    50
}

fn default_polling_jitter_pct_max() -> f64 {
    0.1
}

fn default_bexio_api_base() -> String {
    "https://api.bexio.com".to_string()
}

fn default_xero_api_base() -> String {
    "https://api.xero.com/api.xro/2.0".to_string()
}

fn default_xero_connections_url() -> String {
    "https://api.xero.com/connections".to_string()
}

fn default_pinecone_control_base() -> String {
    "https://api.pinecone.io".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("public base URL is not a valid URL: '{value}'")]
    InvalidPublicBaseUrl { value: String },
    #[error("HTTP timeout must be at least 100ms, got {value}")]
    InvalidHttpTimeout { value: u64 },
    #[error("webhook signature tolerance must be positive, got {value}")]
    InvalidSignatureTolerance { value: u64 },
    #[error("polling tick interval must be between 1 and 300 seconds, got {value}")]
    InvalidPollingTickInterval { value: u64 },
    #[error("polling minimum interval must be positive, got {value}")]
    InvalidPollingMinInterval { value: u64 },
    #[error("polling default interval must be at least the minimum ({min_allowed}), got {value}")]
    InvalidPollingDefaultInterval { value: u64, min_allowed: u64 },
    #[error(
        "polling maximum interval must be between {min_allowed} and {max_allowed} seconds, got {value}"
    )]
    InvalidPollingMaxInterval {
        value: u64,
        min_allowed: u64,
        max_allowed: u64,
    },
    #[error("polling batch size must be positive, got {value}")]
    InvalidPollingBatchSize { value: u64 },
    #[error("polling jitter percentage must be between 0.0 and 1.0, got {value}")]
    InvalidPollingJitter { value: f64 },
}

/// Loads configuration using layered `.env` files and `PIECES_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates the configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_string(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let public_base_url =
            take_string(&mut layered, "PUBLIC_BASE_URL").unwrap_or_else(default_public_base_url);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")?
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
            .unwrap_or_else(default_db_acquire_timeout_ms);
        let http_timeout_ms =
            take_parsed(&mut layered, "HTTP_TIMEOUT_MS")?.unwrap_or_else(default_http_timeout_ms);
        let http_user_agent =
            take_string(&mut layered, "HTTP_USER_AGENT").unwrap_or_else(default_http_user_agent);
        let webhook_signature_tolerance_seconds =
            take_parsed(&mut layered, "WEBHOOK_SIGNATURE_TOLERANCE_SECONDS")?
                .unwrap_or_else(default_webhook_signature_tolerance_seconds);

        let polling = PollingConfig {
            tick_interval_seconds: take_parsed(&mut layered, "POLLING_TICK_INTERVAL_SECONDS")?
                .unwrap_or_else(default_polling_tick_interval_seconds),
            default_interval_seconds: take_parsed(
                &mut layered,
                "POLLING_DEFAULT_INTERVAL_SECONDS",
            )?
            .unwrap_or_else(default_polling_default_interval_seconds),
            min_interval_seconds: take_parsed(&mut layered, "POLLING_MIN_INTERVAL_SECONDS")?
                .unwrap_or_else(default_polling_min_interval_seconds),
            max_interval_seconds: take_parsed(&mut layered, "POLLING_MAX_INTERVAL_SECONDS")?
                .unwrap_or_else(default_polling_max_interval_seconds),
            batch_size: take_parsed(&mut layered, "POLLING_BATCH_SIZE")?
                .unwrap_or_else(default_polling_batch_size),
            jitter_pct_max: take_parsed(&mut layered, "POLLING_JITTER_PCT_MAX")?
                .unwrap_or_else(default_polling_jitter_pct_max),
        };

        let pieces = PiecesConfig {
            bexio_api_base: take_string(&mut layered, "BEXIO_API_BASE")
                .unwrap_or_else(default_bexio_api_base),
            xero_api_base: take_string(&mut layered, "XERO_API_BASE")
                .unwrap_or_else(default_xero_api_base),
            xero_connections_url: take_string(&mut layered, "XERO_CONNECTIONS_URL")
                .unwrap_or_else(default_xero_connections_url),
            pinecone_control_base: take_string(&mut layered, "PINECONE_CONTROL_BASE")
                .unwrap_or_else(default_pinecone_control_base),
            zendesk_base_override: take_string(&mut layered, "ZENDESK_BASE_OVERRIDE"),
            webhook_signature_tolerance_seconds,
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            public_base_url,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            http_timeout_ms,
            http_user_agent,
            webhook_signature_tolerance_seconds,
            polling,
            pieces,
        };

        // Validate configuration
        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{}PROFILE", ENV_PREFIX))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-empty trimmed value for `key`
fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match take_string(layered, key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: format!("{}{}", ENV_PREFIX, key),
                value,
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.bind_addr().is_ok());
    }

    #[test]
    fn test_polling_validation() {
        let mut polling = PollingConfig::default();
        polling.default_interval_seconds = 10;
        assert!(matches!(
            polling.validate(),
            Err(ConfigError::InvalidPollingDefaultInterval { .. })
        ));

        let mut polling = PollingConfig::default();
        polling.jitter_pct_max = 1.5;
        assert!(matches!(
            polling.validate(),
            Err(ConfigError::InvalidPollingJitter { .. })
        ));

        let mut polling = PollingConfig::default();
        polling.batch_size = 0;
        assert!(polling.validate().is_err());

        let mut polling = PollingConfig::default();
        polling.max_interval_seconds = u64::MAX;
        assert!(matches!(
            polling.validate(),
            Err(ConfigError::InvalidPollingMaxInterval { .. })
        ));
    }

    #[test]
    fn test_effective_interval_clamps_to_minimum() {
        let polling = PollingConfig::default();
        assert_eq!(polling.effective_interval(None), Some(300));
        assert_eq!(polling.effective_interval(Some(5)), Some(60));
        assert_eq!(polling.effective_interval(Some(900)), Some(900));
        assert_eq!(polling.effective_interval(Some(604_800)), Some(604_800));
        assert_eq!(polling.effective_interval(Some(604_801)), None);
        assert_eq!(polling.effective_interval(Some(u64::MAX)), None);
    }

    #[test]
    fn test_webhook_url() {
        let config = AppConfig {
            public_base_url: "https://hooks.example.com/".to_string(),
            ..AppConfig::default()
        };
        let id = uuid::Uuid::nil();
        assert_eq!(
            config.webhook_url(&id),
            "https://hooks.example.com/webhooks/00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_redacted_json_hides_database_password() {
        let config = AppConfig {
            database_url: "postgres://pieces:hunter2@db:5432/pieces".to_string(),
            ..AppConfig::default()
        };
        let json = config.redacted_json().unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("REDACTED"));
    }

    #[test]
    fn test_invalid_log_format() {
        let config = AppConfig {
            log_format: "xml".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogFormat { .. })
        ));
    }
}
