// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service configuration.
//!
//! Loaded once from a TOML file at startup and shared read-only with every
//! component afterwards.

use crate::database::WriteMode;
use crate::device::smartmeter::SmartMeterConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default capacity of the buffer between sessions and the writer.
pub const DEFAULT_BUFFER_SIZE: usize = 64;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Health and stats HTTP server.
    #[serde(default)]
    pub http: HttpConfig,

    /// MQTT listener, authentication and topic access.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Time-series database.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Device decoders.
    #[serde(default)]
    pub devices: DevicesConfig,
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.address.is_empty() {
            return Err(ConfigError::Invalid("mqtt.address is empty".into()));
        }
        if self.mqtt.buffer_size == 0 {
            return Err(ConfigError::Invalid("mqtt.buffer_size must be > 0".into()));
        }
        if self.mqtt.handshake_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.handshake_timeout_secs must be > 0".into(),
            ));
        }
        if self.mqtt.write_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.write_timeout_secs must be > 0".into(),
            ));
        }
        if self.mqtt.max_packet_size < 16 {
            return Err(ConfigError::Invalid(
                "mqtt.max_packet_size must be at least 16 bytes".into(),
            ));
        }
        if self.http.enabled && self.http.address.is_empty() {
            return Err(ConfigError::Invalid("http.address is empty".into()));
        }

        let influx = &self.database.influxdb;
        if self.database.kind == DatabaseKind::InfluxDb && influx.address.is_empty() {
            return Err(ConfigError::Invalid(
                "database.influxdb.address is empty".into(),
            ));
        }
        if influx.write_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "database.influxdb.write_timeout_secs must be > 0".into(),
            ));
        }
        let batching = &influx.non_blocking_writes;
        if batching.enabled
            && (batching.batch_size == 0
                || batching.flush_interval_ms == 0
                || batching.queue_depth == 0)
        {
            return Err(ConfigError::Invalid(
                "non_blocking_writes requires batch_size, flush_interval_ms and queue_depth > 0".into(),
            ));
        }

        for (user, prefix) in &self.mqtt.topics {
            if prefix.split('/').rev().skip(1).any(|level| level == "#") {
                return Err(ConfigError::Invalid(format!(
                    "mqtt.topics.{}: '#' is only allowed as the last level",
                    user
                )));
            }
        }

        Ok(())
    }

    /// A documented example configuration, used by `gen-config`.
    pub fn example() -> Self {
        let mut topics = BTreeMap::new();
        topics.insert("meter1".to_string(), "dsmr".to_string());

        Self {
            mqtt: MqttConfig {
                auth: Some(AuthConfig::Htpasswd {
                    file: PathBuf::from("/etc/datasink/htpasswd"),
                }),
                topics,
                ..Default::default()
            },
            database: DatabaseConfig {
                kind: DatabaseKind::InfluxDb,
                influxdb: InfluxDbConfig {
                    token: "replace-with-openssl-rand-hex-32".into(),
                    setup: SetupOptions {
                        username: "admin".into(),
                        password: "change-me".into(),
                        retention_period_hrs: 0,
                    },
                    ..Default::default()
                },
            },
            ..Default::default()
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Serve `/healthz` and `/api/v1/stats`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind address.
    #[serde(default = "default_http_address")]
    pub address: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_http_address(),
        }
    }
}

/// MQTT listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Bind address.
    #[serde(default = "default_mqtt_address")]
    pub address: String,

    /// Capacity of the message buffer between sessions and the writer.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Time allowed for a client to send CONNECT (seconds).
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Disconnect clients that stay silent this long (seconds).
    /// 0 falls back to 1.5x the keep-alive announced by the client.
    #[serde(default)]
    pub idle_timeout_secs: u64,

    /// Time allowed for one packet to reach a client (seconds).
    #[serde(default = "default_session_write_timeout")]
    pub write_timeout_secs: u64,

    /// Largest accepted control packet, in bytes.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,

    /// Client authentication. Absent means every client is accepted.
    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// Allowed topic prefix per username.
    #[serde(default)]
    pub topics: BTreeMap<String, String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            address: default_mqtt_address(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            handshake_timeout_secs: default_handshake_timeout(),
            idle_timeout_secs: 0,
            write_timeout_secs: default_session_write_timeout(),
            max_packet_size: default_max_packet_size(),
            auth: None,
            topics: BTreeMap::new(),
        }
    }
}

impl MqttConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Configured idle timeout, if any.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

/// Credential backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// Apache htpasswd file.
    Htpasswd {
        /// Location of the htpasswd file.
        file: PathBuf,
    },
}

/// Database backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// InfluxDB v2 over HTTP.
    #[default]
    #[serde(rename = "influxdb")]
    InfluxDb,
    /// Keep points in memory (dry run).
    Memory,
}

/// Database configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend type.
    #[serde(rename = "type", default)]
    pub kind: DatabaseKind,

    /// InfluxDB settings. Write mode settings also apply to the memory backend.
    #[serde(default)]
    pub influxdb: InfluxDbConfig,
}

/// InfluxDB v2 client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxDbConfig {
    /// Server URL (e.g., "http://localhost:8086").
    #[serde(default = "default_influx_address")]
    pub address: String,

    /// Auth token. Generate a random one using `openssl rand -hex 32`.
    #[serde(default)]
    pub token: String,

    /// Data bucket.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Organization.
    #[serde(default = "default_organization")]
    pub organization: String,

    /// Timeout of a single write request, blocking or batched (seconds).
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Batched writes.
    #[serde(default)]
    pub non_blocking_writes: NonBlockingWrites,

    /// First-run setup options (`init-db`).
    #[serde(default)]
    pub setup: SetupOptions,
}

impl Default for InfluxDbConfig {
    fn default() -> Self {
        Self {
            address: default_influx_address(),
            token: String::new(),
            bucket: default_bucket(),
            organization: default_organization(),
            write_timeout_secs: default_write_timeout(),
            non_blocking_writes: NonBlockingWrites::default(),
            setup: SetupOptions::default(),
        }
    }
}

impl InfluxDbConfig {
    /// Writer mode derived from this configuration.
    pub fn write_mode(&self) -> WriteMode {
        let batching = &self.non_blocking_writes;
        if batching.enabled {
            WriteMode::Batched {
                batch_size: batching.batch_size,
                flush_interval: Duration::from_millis(batching.flush_interval_ms),
                timeout: Duration::from_secs(self.write_timeout_secs),
                queue_depth: batching.queue_depth,
            }
        } else {
            WriteMode::Blocking {
                timeout: Duration::from_secs(self.write_timeout_secs),
            }
        }
    }
}

/// Non-blocking (batched) writes.
///
/// Scales well but points still buffered in memory are lost on a crash.
/// Blocking writes (the default) are slower and more reliable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonBlockingWrites {
    #[serde(default)]
    pub enabled: bool,

    /// Points per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum time a point waits in the batch (milliseconds).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// Full batches allowed to wait for the database. Further batches are dropped.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for NonBlockingWrites {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// Options used to initialize a fresh InfluxDB instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetupOptions {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Bucket retention in hours, 0 keeps data forever.
    #[serde(default)]
    pub retention_period_hrs: u32,
}

/// Device decoder configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevicesConfig {
    #[serde(default)]
    pub smartmeter: SmartMeterConfig,
}

fn default_true() -> bool {
    true
}

fn default_http_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_mqtt_address() -> String {
    "0.0.0.0:1883".to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_session_write_timeout() -> u64 {
    10
}

fn default_max_packet_size() -> usize {
    256 * 1024
}

fn default_influx_address() -> String {
    "http://localhost:8086".to_string()
}

fn default_bucket() -> String {
    "datasink".to_string()
}

fn default_organization() -> String {
    "datasink".to_string()
}

fn default_write_timeout() -> u64 {
    5
}

fn default_batch_size() -> usize {
    1000
}

fn default_flush_interval() -> u64 {
    1000
}

fn default_queue_depth() -> usize {
    4
}
