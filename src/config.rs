//! Configuration module
//!
//! Loads configuration from environment variables. Monitored databases are
//! given as a JSON array in `MONITORED_DATABASES`; the central audit store is
//! described by the `AUDIT_DB_*` variables.

use std::env;
use std::time::Duration;

use serde::Deserialize;

/// Default PostgreSQL port
const DEFAULT_PORT: u16 = 5432;

/// Default connect/request timeout in milliseconds
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Connection pool tuning for one store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTuning {
    pub max_size: u32,
    pub min_size: u32,
    pub idle_timeout: Duration,
}

impl Default for PoolTuning {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_size: 1,
            idle_timeout: Duration::from_millis(30_000),
        }
    }
}

/// Identity, credentials and tuning of one store (source or central)
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub name: String,
    pub server: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub trust_server_certificate: bool,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub pool: PoolTuning,
}

impl StoreConfig {
    /// Minimal config with default port, timeouts and pool tuning
    pub fn new(name: &str, server: &str, database: &str) -> Self {
        Self {
            name: name.to_string(),
            server: server.to_string(),
            port: DEFAULT_PORT,
            database: database.to_string(),
            username: String::new(),
            password: String::new(),
            trust_server_certificate: true,
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            pool: PoolTuning::default(),
        }
    }

    /// Set credentials
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    /// Set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

// Keep passwords out of logs
impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("name", &self.name)
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Polling and retry settings for the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Time between poll cycles
    pub polling_interval: Duration,
    /// Attempts before an event is excluded from fetches
    pub max_retries: i32,
    /// Configured delay between retries (see `effective_retry_delay`)
    pub retry_delay: Duration,
    /// Rows fetched per source store per cycle
    pub batch_size: u32,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            batch_size: 50,
        }
    }
}

impl RelaySettings {
    /// A failed event is retried on the next poll cycle, so the delay a
    /// failed event actually waits is the polling interval.
    pub fn effective_retry_delay(&self) -> Duration {
        self.polling_interval
    }

    /// True when the configured retry delay cannot be honoured by the cadence
    pub fn retry_delay_exceeds_interval(&self) -> bool {
        self.retry_delay > self.polling_interval
    }
}

/// Notification sink settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Discord-compatible webhook URL; notifications are only logged when unset
    pub webhook_url: Option<String>,
    /// HTTP timeout for a single delivery
    pub request_timeout: Duration,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Central audit store
    pub central: StoreConfig,

    /// Monitored source stores, in polling order
    pub sources: Vec<StoreConfig>,

    /// Polling/retry settings
    pub relay: RelaySettings,

    /// Notification sink
    pub notifier: NotifierConfig,

    /// Status endpoint host
    pub host: String,

    /// Status endpoint port
    pub port: u16,
}

/// Store entry as written in `MONITORED_DATABASES`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStoreConfig {
    name: Option<String>,
    server: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    trust_server_certificate: Option<bool>,
    connect_timeout: Option<u64>,
    request_timeout: Option<u64>,
    pool: Option<RawPoolTuning>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPoolTuning {
    max: u32,
    min: u32,
    idle_timeout_millis: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let relay = RelaySettings {
            polling_interval: Duration::from_secs(parse_or(&lookup, "AUDIT_POLLING_INTERVAL", 10u64)?),
            max_retries: parse_or(&lookup, "AUDIT_MAX_RETRIES", 3i32)?,
            retry_delay: Duration::from_secs(parse_or(&lookup, "AUDIT_RETRY_DELAY", 5u64)?),
            batch_size: parse_or(&lookup, "AUDIT_BATCH_SIZE", 50u32)?,
        };

        let sources = load_monitored_databases(&lookup)?;
        let central = load_central_database(&lookup)?;

        let notifier = NotifierConfig {
            webhook_url: lookup("DISCORD_WEBHOOK_URL").filter(|url| !url.trim().is_empty()),
            request_timeout: Duration::from_secs(10),
        };

        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "PORT", 3000u16)?;

        let config = Self {
            central,
            sources,
            relay,
            notifier,
            host,
            port,
        };
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.polling_interval.is_zero() {
            return Err(ConfigError::InvalidValue("AUDIT_POLLING_INTERVAL"));
        }
        if self.relay.batch_size < 1 {
            return Err(ConfigError::InvalidValue("AUDIT_BATCH_SIZE"));
        }
        if self.relay.max_retries < 1 {
            return Err(ConfigError::InvalidValue("AUDIT_MAX_RETRIES"));
        }
        Ok(())
    }

    /// Look up a monitored store by name
    pub fn source(&self, name: &str) -> Option<&StoreConfig> {
        self.sources.iter().find(|db| db.name == name)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(default),
    }
}

fn load_monitored_databases<F>(lookup: &F) -> Result<Vec<StoreConfig>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup("MONITORED_DATABASES").ok_or(ConfigError::MissingEnv("MONITORED_DATABASES"))?;

    let entries: Vec<RawStoreConfig> = serde_json::from_str(&raw)
        .map_err(|e| ConfigError::InvalidDatabases(e.to_string()))?;

    if entries.is_empty() {
        return Err(ConfigError::InvalidDatabases(
            "MONITORED_DATABASES must be a non-empty array".to_string(),
        ));
    }

    entries.into_iter().map(validate_store).collect()
}

fn load_central_database<F>(lookup: &F) -> Result<StoreConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = RawStoreConfig {
        name: Some("audit".to_string()),
        server: Some(lookup("AUDIT_DB_SERVER").unwrap_or_else(|| "localhost".to_string())),
        port: Some(parse_or(lookup, "AUDIT_DB_PORT", DEFAULT_PORT)?),
        database: Some(lookup("AUDIT_DB_NAME").unwrap_or_else(|| "schema_audit".to_string())),
        username: lookup("AUDIT_DB_USERNAME"),
        password: lookup("AUDIT_DB_PASSWORD"),
        trust_server_certificate: Some(lookup("AUDIT_DB_TRUST_CERT").as_deref() == Some("true")),
        connect_timeout: Some(parse_or(lookup, "AUDIT_DB_CONNECTION_TIMEOUT", DEFAULT_TIMEOUT_MS)?),
        request_timeout: Some(parse_or(lookup, "AUDIT_DB_REQUEST_TIMEOUT", DEFAULT_TIMEOUT_MS)?),
        pool: Some(RawPoolTuning {
            max: parse_or(lookup, "AUDIT_DB_POOL_MAX", 10u32)?,
            min: parse_or(lookup, "AUDIT_DB_POOL_MIN", 1u32)?,
            idle_timeout_millis: parse_or(lookup, "AUDIT_DB_POOL_IDLE_TIMEOUT", 30_000u64)?,
        }),
    };

    validate_store(raw)
}

fn validate_store(raw: RawStoreConfig) -> Result<StoreConfig, ConfigError> {
    let name = non_empty(raw.name).ok_or(ConfigError::MissingStoreName)?;

    let required = |value: Option<String>, field: &'static str| {
        non_empty(value).ok_or_else(|| ConfigError::MissingField {
            store: name.clone(),
            field,
        })
    };

    let server = required(raw.server, "server")?;
    let database = required(raw.database, "database")?;
    let username = required(raw.username, "username")?;
    let password = required(raw.password, "password")?;

    let pool = raw
        .pool
        .map(|p| PoolTuning {
            max_size: p.max,
            min_size: p.min,
            idle_timeout: Duration::from_millis(p.idle_timeout_millis),
        })
        .unwrap_or_default();

    if pool.max_size == 0 || pool.min_size > pool.max_size {
        return Err(ConfigError::InvalidPool { store: name });
    }

    Ok(StoreConfig {
        name,
        server,
        port: raw.port.filter(|p| *p != 0).unwrap_or(DEFAULT_PORT),
        database,
        username,
        password,
        trust_server_certificate: raw.trust_server_certificate.unwrap_or(true),
        connect_timeout: Duration::from_millis(
            raw.connect_timeout.filter(|t| *t > 0).unwrap_or(DEFAULT_TIMEOUT_MS),
        ),
        request_timeout: Duration::from_millis(
            raw.request_timeout.filter(|t| *t > 0).unwrap_or(DEFAULT_TIMEOUT_MS),
        ),
        pool,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),

    #[error("Failed to parse MONITORED_DATABASES: {0}")]
    InvalidDatabases(String),

    #[error("Database name is required")]
    MissingStoreName,

    #[error("Missing '{field}' for database {store}")]
    MissingField { store: String, field: &'static str },

    #[error("Invalid pool settings for database {store}")]
    InvalidPool { store: String },
}
