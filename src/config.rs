//! Configuration module
//!
//! `AppConfig` mirrors the TOML file at
//! `~/.config/csms-realtime/config.toml`. Every section and field has a
//! default, so a partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::jwt::MAX_EXPIRATION_HOURS;
use crate::auth::JwtConfig;
use crate::infrastructure::ws_client::{ClientOptions, ReconnectPolicy, DEFAULT_LOG_TENANT, RECONNECT_UNLIMITED};
use crate::interfaces::ws::hub::DEFAULT_SUBSCRIBER_BUFFER;
use crate::interfaces::ws::HubConfig;
use crate::support::errors::ConfigError;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "CSMS_REALTIME_CONFIG";

/// `~/.config/csms-realtime/config.toml`, or `./config.toml` when no
/// config directory can be determined.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .map(|dir| dir.join("csms-realtime").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

/// Config path from `CSMS_REALTIME_CONFIG`, else the default location
pub fn config_path_from_env() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub notifications: NotificationsConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds to wait for background tasks on shutdown
    pub shutdown_timeout: u64,
    /// Install the Prometheus recorder and route `/metrics`
    pub metrics_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            shutdown_timeout: 30,
            metrics_enabled: true,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub list_interval_secs: u64,
    pub single_interval_secs: u64,
    /// Frames queued per subscriber before new frames are dropped for it
    pub subscriber_buffer: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            list_interval_secs: 2,
            single_interval_secs: 1,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_expiration_hours: i64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        let jwt = JwtConfig::default();
        Self {
            jwt_secret: jwt.secret,
            jwt_issuer: jwt.issuer,
            jwt_expiration_hours: jwt.expiration_hours,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Outbound connection used by `csms-realtime-cli listen`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub url: String,
    pub protocols: Vec<String>,
    /// -1 retries forever
    pub auto_reconnect_max_retries: i32,
    /// Seconds between attempts; 0 disables reconnection
    pub auto_reconnect_timeout: u64,
    pub log_tenant: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8090/notifications/ws".to_string(),
            protocols: Vec::new(),
            auto_reconnect_max_retries: RECONNECT_UNLIMITED,
            auto_reconnect_timeout: 10,
            log_tenant: DEFAULT_LOG_TENANT.to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `path`. A missing file is created with defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            info!("Default configuration written to {}", path.display());
            return Ok(config);
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notifications.list_interval_secs == 0 {
            return Err(ConfigError::Invalid("notifications.list_interval_secs must be > 0".into()));
        }
        if self.notifications.single_interval_secs == 0 {
            return Err(ConfigError::Invalid("notifications.single_interval_secs must be > 0".into()));
        }
        if self.notifications.subscriber_buffer == 0 {
            return Err(ConfigError::Invalid("notifications.subscriber_buffer must be > 0".into()));
        }
        if !(1..=MAX_EXPIRATION_HOURS).contains(&self.security.jwt_expiration_hours) {
            return Err(ConfigError::Invalid(format!(
                "security.jwt_expiration_hours must be between 1 and {MAX_EXPIRATION_HOURS}"
            )));
        }
        if self.security.jwt_secret.is_empty() {
            return Err(ConfigError::Invalid("security.jwt_secret must not be empty".into()));
        }
        if self.client.auto_reconnect_max_retries < RECONNECT_UNLIMITED {
            return Err(ConfigError::Invalid(format!(
                "client.auto_reconnect_max_retries must be >= {RECONNECT_UNLIMITED}"
            )));
        }
        match self.logging.format.to_lowercase().as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Invalid(format!("unknown logging.format '{other}'"))),
        }
    }
}

impl From<&AppConfig> for HubConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            list_interval: Duration::from_secs(config.notifications.list_interval_secs),
            single_interval: Duration::from_secs(config.notifications.single_interval_secs),
            subscriber_buffer: config.notifications.subscriber_buffer,
        }
    }
}

impl From<&AppConfig> for JwtConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            secret: config.security.jwt_secret.clone(),
            expiration_hours: config.security.jwt_expiration_hours,
            issuer: config.security.jwt_issuer.clone(),
        }
    }
}

impl From<&ClientConfig> for ReconnectPolicy {
    fn from(config: &ClientConfig) -> Self {
        ReconnectPolicy::from_config(config.auto_reconnect_timeout, config.auto_reconnect_max_retries)
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            protocols: config.protocols.clone(),
            headers: Vec::new(),
            log_tenant: config.log_tenant.clone(),
        }
    }
}
