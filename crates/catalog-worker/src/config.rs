//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use catalog_messaging::worker::WorkerConfig;
use thiserror::Error;

/// A missing or malformed environment variable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} environment variable must be set")]
    Missing(&'static str),

    /// A variable is set but cannot be used.
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string.
    pub database_url: String,
    /// RabbitMQ connection string.
    pub amqp_url: String,
    /// Upper bound of the connection pool.
    pub database_max_connections: u32,
    /// Interface the health endpoint binds to.
    pub host: String,
    /// Port the health endpoint binds to.
    pub port: u16,
    /// Integration event relay tuning.
    pub worker: WorkerConfig,
    /// OTLP collector endpoint; span export is off when unset.
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `DATABASE_URL` or `AMQP_URL` is missing or
    /// any variable
    /// has an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let amqp_url = lookup("AMQP_URL").ok_or(ConfigError::Missing("AMQP_URL"))?;
        let defaults = WorkerConfig::default();

        let poll_interval_ms: u64 = parse_or(&lookup, "QUEUE_POLL_INTERVAL_MS", 500)?;
        let retry_delay_ms: u64 = parse_or(&lookup, "QUEUE_RETRY_DELAY_MS", 1000)?;
        let max_attempts: i32 = parse_or(&lookup, "QUEUE_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts < 1 {
            return Err(ConfigError::Invalid {
                name: "QUEUE_MAX_ATTEMPTS",
                value: max_attempts.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database_url,
            amqp_url,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 3000)?,
            worker: WorkerConfig {
                poll_interval: Duration::from_millis(poll_interval_ms),
                max_attempts,
                retry_delay: Duration::from_millis(retry_delay_ms),
                stale_after: defaults.stale_after,
            },
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.is_empty()),
        })
    }

    /// Address the health endpoint listens on.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `HOST` is not an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            name: "HOST",
            value: self.host.clone(),
            reason: e.to_string(),
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}
