//! Configuration module for botbridge.
//!
//! All settings are read from the process environment (optionally seeded from
//! a `.env` file by the binary). [`Config::from_lookup`] accepts any key lookup
//! so configuration can be exercised without touching the real environment.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, warn};

use crate::duration::parse_duration;
use crate::{BridgeError, Result};

/// Default cache entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbDriver {
    Sqlite,
    Postgres,
    MySql,
}

impl DbDriver {
    /// Parse a `DB_DRIVER` value.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            "postgres" | "postgresql" | "pgx" | "pg" => Some(Self::Postgres),
            "mysql" | "mariadb" => Some(Self::MySql),
            _ => None,
        }
    }

    /// URL scheme understood by sqlx for this driver.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Driver selected by `DB_DRIVER`.
    pub driver: DbDriver,
    /// Raw `DB_CONN_STR`.
    pub conn_str: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl DatabaseConfig {
    /// Connection URL handed to sqlx.
    ///
    /// A connection string that already carries a scheme is used verbatim.
    pub fn url(&self) -> String {
        if self.conn_str.contains("://") || self.conn_str.starts_with("sqlite:") {
            self.conn_str.clone()
        } else {
            format!("{}://{}", self.driver.scheme(), self.conn_str)
        }
    }
}

/// Telegram transport configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot token (`TELEGRAM_TOKEN`).
    pub token: Option<String>,
    /// Bot API base URL.
    pub api_url: String,
    /// Long-poll timeout in seconds.
    pub poll_timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_api_url(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Optional log file, written in addition to stdout.
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Read `LOG_LEVEL` and `LOG_FILE` only, so logging can start before the
    /// rest of the configuration is validated.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            level: get("LOG_LEVEL").unwrap_or_else(default_log_level),
            file: get("LOG_FILE"),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Main configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    /// Script sources, concatenated in this order.
    pub scripts: Vec<PathBuf>,
    /// Database settings; `None` disables the DB capabilities.
    pub database: Option<DatabaseConfig>,
    /// Lifetime of cache entries.
    pub cache_ttl: Duration,
    /// Background timer period; `None` disables `onTimer`.
    pub timer: Option<Duration>,
    /// Directory holding local attachments and report exports.
    pub attachments_dir: PathBuf,
    /// Telegram settings.
    pub telegram: TelegramConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

fn default_attachments_dir() -> PathBuf {
    PathBuf::from("attachments")
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let scripts: Vec<PathBuf> = get("SCRIPTS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();
        if scripts.is_empty() {
            return Err(BridgeError::Config("no scripts are configured".to_string()));
        }

        let database = match (get("DB_DRIVER"), get("DB_CONN_STR")) {
            (Some(driver), Some(conn_str)) => {
                let driver = DbDriver::parse(&driver).ok_or_else(|| {
                    BridgeError::Config(format!("unsupported DB_DRIVER: {}", driver))
                })?;
                let max_connections = match get("DB_MAX_CONNECTIONS") {
                    Some(v) => v.trim().parse().map_err(|_| {
                        BridgeError::Config(format!("invalid DB_MAX_CONNECTIONS: {}", v))
                    })?,
                    None => default_max_connections(),
                };
                Some(DatabaseConfig {
                    driver,
                    conn_str,
                    max_connections,
                })
            }
            (Some(_), None) | (None, Some(_)) => {
                warn!("DB_DRIVER and DB_CONN_STR must both be set; database capabilities disabled");
                None
            }
            (None, None) => None,
        };

        let cache_ttl = match get("CACHE_TTL") {
            Some(raw) => match parse_duration(&raw) {
                Ok(ttl) => ttl,
                Err(e) => {
                    warn!("{}; cache ttl set to 30 minutes", e);
                    DEFAULT_CACHE_TTL
                }
            },
            None => DEFAULT_CACHE_TTL,
        };

        let timer = match get("TIMER") {
            Some(raw) => match parse_duration(&raw) {
                Ok(period) if !period.is_zero() => Some(period),
                Ok(_) => {
                    error!("TIMER must be positive; timer disabled");
                    None
                }
                Err(e) => {
                    error!("{}; timer disabled", e);
                    None
                }
            },
            None => None,
        };

        let telegram = TelegramConfig {
            token: get("TELEGRAM_TOKEN"),
            api_url: get("TELEGRAM_API_URL").unwrap_or_else(default_api_url),
            poll_timeout_secs: match get("POLL_TIMEOUT") {
                Some(v) => v.trim().parse().map_err(|_| {
                    BridgeError::Config(format!("invalid POLL_TIMEOUT: {}", v))
                })?,
                None => default_poll_timeout(),
            },
        };

        let logging = LoggingConfig::from_lookup(&lookup);

        Ok(Self {
            scripts,
            database,
            cache_ttl,
            timer,
            attachments_dir: get("ATTACHMENTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_attachments_dir),
            telegram,
            logging,
        })
    }
}
