use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use validator::{Validate, ValidationError};

// ============================================================================
// Environment Configuration
// ============================================================================
//
// Every section is read from the process environment (seeded from `.env`
// when present) and validated before use. Backend sections are loaded by the
// registry only for the backend type that was selected, so a deployment
// using the local cache never needs REDIS_* variables.
//
// Durations are integer milliseconds.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {section} configuration: {source}")]
    Env {
        section: &'static str,
        #[source]
        source: envy::Error,
    },

    #[error("invalid {section} configuration: {source}")]
    Invalid {
        section: &'static str,
        #[source]
        source: validator::ValidationErrors,
    },
}

/// Read a prefixed section from the environment and validate it
pub fn load_section<T>(prefix: &'static str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Validate,
{
    let section: T = envy::prefixed(prefix)
        .from_env()
        .map_err(|source| ConfigError::Env { section: prefix, source })?;
    section
        .validate()
        .map_err(|source| ConfigError::Invalid { section: prefix, source })?;
    Ok(section)
}

// ============================================================================
// Application
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Kafka,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Local,
    Redis,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    pub storage_type: StorageKind,
    pub broker_type: BrokerKind,
    pub cache_type: CacheKind,

    #[serde(default = "default_shutdown_timeout_ms")]
    #[validate(range(min = 100))]
    pub shutdown_timeout_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

impl AppConfig {
    /// Load the top-level configuration. Reads `.env` first if it exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config: Self = envy::from_env().map_err(|source| ConfigError::Env {
            section: "application",
            source,
        })?;
        config.validate().map_err(|source| ConfigError::Invalid {
            section: "application",
            source,
        })?;
        Ok(config)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct HttpConfig {
    #[serde(default = "default_http_address")]
    #[validate(length(min = 1))]
    pub address: String,

    #[serde(default = "default_http_workers")]
    #[validate(range(min = 1))]
    pub workers: usize,
}

fn default_http_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_http_workers() -> usize {
    2
}

impl HttpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_section("HTTP_")
    }
}

// ============================================================================
// Kafka
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    #[default]
    Earliest,
    Latest,
}

impl StartOffset {
    /// Value for librdkafka's `auto.offset.reset`
    pub fn as_reset_policy(&self) -> &'static str {
        match self {
            StartOffset::Earliest => "earliest",
            StartOffset::Latest => "latest",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_fetch_bytes"))]
pub struct KafkaConfig {
    #[validate(length(min = 1))]
    pub brokers: Vec<String>,

    #[validate(length(min = 1))]
    pub topic: String,

    #[validate(length(min = 1))]
    pub group_id: String,

    #[serde(default)]
    pub start_offset: StartOffset,

    #[serde(default = "default_min_bytes")]
    #[validate(range(min = 1))]
    pub min_bytes: u32,

    #[serde(default = "default_max_bytes")]
    #[validate(range(min = 1))]
    pub max_bytes: u32,

    /// How long the broker may hold a fetch waiting for `min_bytes`
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 100))]
    pub read_timeout_ms: u64,

    /// Pause after a failed fetch
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 100))]
    pub retry_timeout_ms: u64,

    /// Maximum number of messages handled concurrently
    #[serde(default = "default_max_workers")]
    #[validate(range(min = 1))]
    pub max_workers: usize,
}

fn default_min_bytes() -> u32 {
    1
}

fn default_max_bytes() -> u32 {
    10_000_000
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_workers() -> usize {
    1
}

fn validate_fetch_bytes(config: &KafkaConfig) -> Result<(), ValidationError> {
    if config.min_bytes > config.max_bytes {
        return Err(ValidationError::new("min_bytes_exceeds_max_bytes"));
    }
    Ok(())
}

impl KafkaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_section("KAFKA_")
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[derive(Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_pool_bounds"))]
pub struct PostgresConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[validate(length(min = 1))]
    pub user: String,
    #[validate(length(min = 1))]
    pub password: String,
    #[validate(length(min = 1))]
    pub database: String,

    #[serde(default = "default_sslmode")]
    pub sslmode: String,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_pool_max_conns")]
    #[validate(range(min = 1))]
    pub pool_max_conns: u32,

    #[serde(default = "default_pool_min_conns")]
    pub pool_min_conns: u32,

    #[serde(default = "default_max_conn_lifetime_ms")]
    pub max_conn_lifetime_ms: u64,

    #[serde(default = "default_max_conn_idle_time_ms")]
    pub max_conn_idle_time_ms: u64,

    /// Deadline of a single attempt (transaction or read)
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1))]
    pub request_timeout_ms: u64,

    /// Pause between two attempts
    #[serde(default = "default_timeout_ms")]
    pub retry_timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    #[validate(range(min = 1))]
    pub max_retries: u32,
}

fn default_sslmode() -> String {
    "disable".to_string()
}

fn default_pool_max_conns() -> u32 {
    10
}

fn default_pool_min_conns() -> u32 {
    2
}

fn default_max_conn_lifetime_ms() -> u64 {
    60 * 60 * 1000
}

fn default_max_conn_idle_time_ms() -> u64 {
    30 * 60 * 1000
}

fn default_max_retries() -> u32 {
    3
}

fn validate_pool_bounds(config: &PostgresConfig) -> Result<(), ValidationError> {
    if config.pool_min_conns > config.pool_max_conns {
        return Err(ValidationError::new("pool_min_conns_exceeds_pool_max_conns"));
    }
    Ok(())
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("sslmode", &self.sslmode)
            .field("pool_max_conns", &self.pool_max_conns)
            .field("pool_min_conns", &self.pool_min_conns)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("retry_timeout_ms", &self.retry_timeout_ms)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl PostgresConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_section("POSTGRES_")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn max_conn_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_conn_lifetime_ms)
    }

    pub fn max_conn_idle_time(&self) -> Duration {
        Duration::from_millis(self.max_conn_idle_time_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }
}

// ============================================================================
// Caches
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LocalCacheConfig {
    #[serde(default = "default_cache_max_items")]
    #[validate(range(min = 1))]
    pub max_items: usize,

    #[serde(default = "default_cache_ttl_ms")]
    #[validate(range(min = 1))]
    pub ttl_ms: u64,
}

fn default_cache_max_items() -> usize {
    1000
}

fn default_cache_ttl_ms() -> u64 {
    5 * 60 * 1000
}

impl LocalCacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_section("LOCAL_CACHE_")
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RedisCacheConfig {
    #[serde(default = "default_redis_url")]
    #[validate(length(min = 1))]
    pub url: String,

    /// Redis expiry has one second granularity
    #[serde(default = "default_cache_ttl_ms")]
    #[validate(range(min = 1000))]
    pub ttl_ms: u64,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl RedisCacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_section("REDIS_CACHE_")
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], test: F) {
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        test();
        for (key, _) in vars {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_kafka_config_defaults() {
        with_env(
            &[
                ("KAFKA_BROKERS", "kafka-1:9092,kafka-2:9092"),
                ("KAFKA_TOPIC", "orders"),
                ("KAFKA_GROUP_ID", "order-ingest"),
            ],
            || {
                let config = KafkaConfig::from_env().unwrap();
                assert_eq!(config.brokers, vec!["kafka-1:9092", "kafka-2:9092"]);
                assert_eq!(config.start_offset, StartOffset::Earliest);
                assert_eq!(config.max_workers, 1);
                assert_eq!(config.read_timeout(), Duration::from_secs(5));
                assert_eq!(config.max_bytes, 10_000_000);
            },
        );
    }

    #[test]
    #[serial]
    fn test_kafka_config_requires_topic() {
        with_env(
            &[("KAFKA_BROKERS", "kafka:9092"), ("KAFKA_GROUP_ID", "order-ingest")],
            || {
                let err = KafkaConfig::from_env().unwrap_err();
                assert!(matches!(err, ConfigError::Env { section: "KAFKA_", .. }));
            },
        );
    }

    #[test]
    #[serial]
    fn test_kafka_config_rejects_inverted_byte_bounds() {
        with_env(
            &[
                ("KAFKA_BROKERS", "kafka:9092"),
                ("KAFKA_TOPIC", "orders"),
                ("KAFKA_GROUP_ID", "order-ingest"),
                ("KAFKA_MIN_BYTES", "100"),
                ("KAFKA_MAX_BYTES", "10"),
            ],
            || {
                let err = KafkaConfig::from_env().unwrap_err();
                assert!(matches!(err, ConfigError::Invalid { .. }));
            },
        );
    }

    #[test]
    #[serial]
    fn test_kafka_config_rejects_zero_workers() {
        with_env(
            &[
                ("KAFKA_BROKERS", "kafka:9092"),
                ("KAFKA_TOPIC", "orders"),
                ("KAFKA_GROUP_ID", "order-ingest"),
                ("KAFKA_MAX_WORKERS", "0"),
            ],
            || {
                assert!(KafkaConfig::from_env().is_err());
            },
        );
    }

    #[test]
    #[serial]
    fn test_postgres_config_redacts_password() {
        with_env(
            &[
                ("POSTGRES_HOST", "db"),
                ("POSTGRES_PORT", "5432"),
                ("POSTGRES_USER", "orders"),
                ("POSTGRES_PASSWORD", "hunter2"),
                ("POSTGRES_DATABASE", "orders"),
            ],
            || {
                let config = PostgresConfig::from_env().unwrap();
                assert_eq!(config.max_retries, 3);
                assert_eq!(config.sslmode, "disable");

                let debug = format!("{:?}", config);
                assert!(!debug.contains("hunter2"));
                assert!(debug.contains("[REDACTED]"));
            },
        );
    }

    #[test]
    #[serial]
    fn test_local_cache_config_defaults() {
        let config = LocalCacheConfig::from_env().unwrap();
        assert_eq!(config.max_items, 1000);
        assert_eq!(config.ttl(), Duration::from_secs(300));
    }

    #[test]
    #[serial]
    fn test_app_config_backend_kinds() {
        with_env(
            &[
                ("STORAGE_TYPE", "postgres"),
                ("BROKER_TYPE", "kafka"),
                ("CACHE_TYPE", "redis"),
            ],
            || {
                let config = AppConfig::from_env().unwrap();
                assert_eq!(config.cache_type, CacheKind::Redis);
                assert_eq!(config.log_format, LogFormat::Pretty);
                assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
            },
        );
    }

    #[test]
    #[serial]
    fn test_app_config_rejects_unknown_backend() {
        with_env(
            &[
                ("STORAGE_TYPE", "postgres"),
                ("BROKER_TYPE", "kafka"),
                ("CACHE_TYPE", "memcached"),
            ],
            || {
                assert!(AppConfig::from_env().is_err());
            },
        );
    }
}
