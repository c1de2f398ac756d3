//! Configuration management for the audit service.
//!
//! Loads configuration from environment variables. Every setting except
//! `DATABASE_URL` has a default; a value that is set but cannot be parsed, or
//! a count or interval of zero, is an error rather than a silent fallback.

use product_audit_core::redrive::RedrivePolicy;
use product_audit_runtime::ConsumerConfig;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set to a value that does not parse
    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// Parse failure
        reason: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable text
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("expected json or pretty, got {other}")),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Audit store database
    pub database: DatabaseConfig,
    /// Broker, topic and queues
    pub transport: TransportConfig,
    /// Long-poll settings shared by both consumers
    pub consumer: ConsumerSettings,
    /// Process-level settings
    pub service: ServiceConfig,
}

/// `PostgreSQL` audit store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: String,
    /// Maximum pool size
    pub max_connections: u32,
    /// Audit table name
    pub table: String,
}

/// Redpanda/Kafka configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Topic product events are published to
    pub topic: String,
    /// Queue (consumer group) for created/updated/deleted events
    pub product_events_queue: String,
    /// Queue (consumer group) for failure events
    pub failure_events_queue: String,
    /// Shared dead-letter topic
    pub dead_letter_queue: String,
    /// Deliveries before a message is dead-lettered
    pub max_receive_count: u32,
}

/// Consumer long-poll settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSettings {
    /// Long-poll wait in seconds
    pub wait_seconds: u64,
    /// Maximum messages per receive
    pub max_messages: usize,
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Seconds between expiry sweeps
    pub sweep_interval_seconds: u64,
    /// Prometheus exporter address
    pub metrics_addr: SocketAddr,
    /// Grace period for in-flight work on shutdown, in seconds
    pub shutdown_timeout_seconds: u64,
    /// Log output format
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `DATABASE_URL` is missing, any variable
    /// does not parse, or a count or interval is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// As [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        Ok(Self {
            database: DatabaseConfig {
                url: env.required("DATABASE_URL")?,
                max_connections: env.positive("DATABASE_MAX_CONNECTIONS", 10)?,
                table: env.string("AUDIT_TABLE", "audit_events"),
            },
            transport: TransportConfig {
                brokers: env.string("REDPANDA_BROKERS", "localhost:9092"),
                topic: env.string("PRODUCT_EVENTS_TOPIC", "product-events"),
                product_events_queue: env.string("PRODUCT_EVENTS_QUEUE", "product-events"),
                failure_events_queue: env.string("PRODUCT_FAILURE_EVENTS_QUEUE", "product-failure-events"),
                dead_letter_queue: env.string("DEAD_LETTER_QUEUE", "product-events-dlq"),
                max_receive_count: env.positive("MAX_RECEIVE_COUNT", 3)?,
            },
            consumer: ConsumerSettings {
                wait_seconds: env.parsed("CONSUMER_WAIT_SECONDS", 10)?,
                max_messages: env.positive("CONSUMER_MAX_MESSAGES", 10)?,
            },
            service: ServiceConfig {
                sweep_interval_seconds: env.positive("SWEEP_INTERVAL_SECONDS", 60)?,
                metrics_addr: env.parsed("METRICS_ADDR", SocketAddr::from(([0, 0, 0, 0], 9090)))?,
                shutdown_timeout_seconds: env.parsed("SHUTDOWN_TIMEOUT_SECONDS", 30)?,
                log_format: env.parsed("LOG_FORMAT", LogFormat::Json)?,
            },
        })
    }

    /// Consumer settings for both queues.
    #[must_use]
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::default()
            .with_max_messages(self.consumer.max_messages)
            .with_wait_time(Duration::from_secs(self.consumer.wait_seconds))
    }

    /// Redrive policy shared by both queues.
    #[must_use]
    pub fn redrive_policy(&self) -> RedrivePolicy {
        RedrivePolicy::new(
            self.transport.max_receive_count,
            self.transport.dead_letter_queue.clone(),
        )
    }

    /// Pause between expiry sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.service.sweep_interval_seconds)
    }

    /// Grace period for shutdown.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.get(var).ok_or(ConfigError::Missing(var))
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(var) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn positive<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + From<u8>,
        T::Err: Display,
    {
        let value = self.parsed(var, default)?;
        if value < T::from(1) {
            return Err(ConfigError::Invalid {
                var,
                value: self.get(var).unwrap_or_default(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(value)
    }
}
