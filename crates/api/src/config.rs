//! Application configuration loaded from environment variables.

use std::time::Duration;

use broker::{ConsumerConfig, InMemoryBrokerConfig};
use common::RetryStrategy;
use fulfillment::{LifecycleConfig, ReaperConfig, default_store_retry};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for human-readable
/// - `DATABASE_URL`: Postgres connection string; in-memory stores when unset
/// - `BROKER_EXCHANGE`: topic exchange name, prefixed to every queue (default `orders`)
/// - `BROKER_HISTORY_LIMIT`: published messages and dead letters kept in memory
/// - `BROKER_CONNECT_ATTEMPTS`, `BROKER_CONNECT_DELAY_MS`: connect retry
/// - `CACHE_TTL_SECS`: order cache expiry
/// - `MAX_DELIVERIES`, `REQUEUE_DELAY_MS`, `SHUTDOWN_GRACE_SECS`: consumer loop
/// - `REAPER_INTERVAL_SECS`, `REAPER_THRESHOLD_SECS`: stale order sweep
/// - `PUBLISH_TIMEOUT_MS`: bound on each publish
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub broker_exchange: String,
    pub broker_history_limit: usize,
    pub broker_connect_attempts: u32,
    pub broker_connect_delay: Duration,
    pub cache_ttl: Duration,
    pub max_deliveries: u32,
    pub requeue_delay: Duration,
    pub shutdown_grace: Duration,
    pub reaper_interval: Duration,
    pub reaper_threshold: Duration,
    pub publish_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());
        let secs = |key: &str, default: Duration| parsed(key).map_or(default, Duration::from_secs);
        let millis =
            |key: &str, default: Duration| parsed(key).map_or(default, Duration::from_millis);

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            broker_exchange: lookup("BROKER_EXCHANGE")
                .filter(|name| !name.is_empty())
                .unwrap_or(defaults.broker_exchange),
            broker_history_limit: lookup("BROKER_HISTORY_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.broker_history_limit),
            broker_connect_attempts: lookup("BROKER_CONNECT_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.broker_connect_attempts),
            broker_connect_delay: millis("BROKER_CONNECT_DELAY_MS", defaults.broker_connect_delay),
            cache_ttl: secs("CACHE_TTL_SECS", defaults.cache_ttl),
            max_deliveries: lookup("MAX_DELIVERIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_deliveries),
            requeue_delay: millis("REQUEUE_DELAY_MS", defaults.requeue_delay),
            shutdown_grace: secs("SHUTDOWN_GRACE_SECS", defaults.shutdown_grace),
            reaper_interval: secs("REAPER_INTERVAL_SECS", defaults.reaper_interval),
            reaper_threshold: secs("REAPER_THRESHOLD_SECS", defaults.reaper_threshold),
            publish_timeout: millis("PUBLISH_TIMEOUT_MS", defaults.publish_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn broker_config(&self) -> InMemoryBrokerConfig {
        InMemoryBrokerConfig {
            exchange: self.broker_exchange.clone(),
            history_limit: Some(self.broker_history_limit),
        }
    }

    pub fn connect_strategy(&self) -> RetryStrategy {
        RetryStrategy::fixed(self.broker_connect_attempts, self.broker_connect_delay)
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            max_deliveries: self.max_deliveries,
            requeue_delay: self.requeue_delay,
            shutdown_grace: self.shutdown_grace,
            resubscribe: self.connect_strategy(),
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            cache_ttl: self.cache_ttl,
            store_retry: default_store_retry(),
        }
    }

    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig {
            interval: self.reaper_interval,
            threshold: self.reaper_threshold,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 10,
            broker_exchange: "orders".to_string(),
            broker_history_limit: 1024,
            broker_connect_attempts: 5,
            broker_connect_delay: Duration::from_millis(2000),
            cache_ttl: Duration::from_secs(86_400),
            max_deliveries: 10,
            requeue_delay: Duration::from_millis(200),
            shutdown_grace: Duration::from_secs(10),
            reaper_interval: Duration::from_secs(30),
            reaper_threshold: Duration::from_secs(60),
            publish_timeout: Duration::from_millis(5000),
        }
    }
}
