//! Bridge configuration.
//!
//! Read once at startup from a toml file, then patched from the environment.
//! Every field has a default, so an empty file is a valid config.
//!
//! Examples:
//!
//! [store]
//! host = "influxdb"
//! database = "raw_sensor_data"
//!
//! [broker]
//! host = "mqtt.example.org"
//! topics = ["usa/quincy/1", "usa/quincy/2"]
//!
//! [ingest]
//! adc_resolution_bits = 16
//! full_scale_mv = 4096.0
use anyhow::{anyhow, Context, Result};
use likely_stable::unlikely;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::calibration::UnitConverter;
use crate::error_bail;
use crate::partition::PointOrder;

/// Measurement every partition is written under.
pub const MEASUREMENT: &str = "measurements";

/// Field holding the converted value.
pub const VALUE_FIELD: &str = "mV";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,

    /// Timeout of each request to the store.
    pub timeout_secs: u64,

    /// How many pings to try at startup before giving up.
    pub wait_attempts: u32,
    pub wait_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "influxdb".to_string(),
            port: 8086,
            username: "root".to_string(),
            password: "root".to_string(),
            database: "raw_sensor_data".to_string(),
            timeout_secs: 10,
            wait_attempts: 30,
            wait_interval_secs: 2,
        }
    }
}

impl StoreConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_secs(self.wait_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub keepalive_secs: u64,

    /// A random id is generated when not set.
    pub client_id: Option<String>,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Topics the devices publish their batches on.
    pub topics: Vec<String>,

    /// Subscription and notification qos, 0, 1 or 2.
    pub qos: u8,

    /// Topic the write summaries are published on.
    pub notification_topic: String,

    /// Delay before polling again after a connection error.
    pub reconnect_delay_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keepalive_secs: 30,
            client_id: None,
            username: None,
            password: None,
            topics: vec![
                "usa/quincy/1".to_string(),
                "usa/quincy/2".to_string(),
                "test_env/usa/quincy/1".to_string(),
            ],
            qos: 2,
            notification_topic: "communication/influxdbUpdate".to_string(),
            reconnect_delay_ms: 1000,
        }
    }
}

impl BrokerConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub adc_resolution_bits: u32,
    pub full_scale_mv: f64,

    /// Millivolts per bit. Derived from the two fields above when not set.
    pub scale_factor: Option<f64>,

    pub point_order: PointOrder,

    /// Number of workers handling received batches.
    pub worker_num: usize,

    /// Capacity of the queue between the transport and the workers.
    pub queue_capacity: usize,

    /// Extra attempts at writing partitions the store did not take.
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            adc_resolution_bits: 16,
            full_scale_mv: 4096.0,
            scale_factor: None,
            point_order: PointOrder::Ascending,
            worker_num: 4,
            queue_capacity: 256,
            retry_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl IngestConfig {
    pub fn unit_converter(&self) -> Result<UnitConverter> {
        let converter = match self.scale_factor {
            Some(scale_factor) => UnitConverter::new(scale_factor),
            None => UnitConverter::from_adc(self.adc_resolution_bits, self.full_scale_mv),
        };

        converter.map_err(|e| anyhow!("invalid unit conversion config: {}", e))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub store: StoreConfig,
    pub broker: BrokerConfig,
    pub ingest: IngestConfig,
}

impl BridgeConfig {
    /// Parse from a toml file.
    pub fn from_config_file(filename: &str) -> Result<Self> {
        let content = std::fs::read_to_string(filename)
            .with_context(|| format!("read config file failed, filename: {}", filename))?;

        Self::from_config_str(&content)
            .with_context(|| format!("parse config file failed, filename: {}", filename))
    }

    /// Parse from a toml string.
    pub fn from_config_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| e.into())
    }

    /// Load the file if given, apply the process environment, then validate.
    pub fn load(filename: Option<&str>) -> Result<Self> {
        let mut config = match filename {
            Some(filename) => Self::from_config_file(filename)?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Override fields from environment variables.
    ///
    /// `lookup` returns the value of a variable, if set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DB_HOST") {
            self.store.host = host;
        }
        if let Some(port) = lookup("DB_PORT") {
            self.store.port = parse_env("DB_PORT", &port)?;
        }
        if let Some(username) = lookup("DB_USER") {
            self.store.username = username;
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            self.store.password = password;
        }
        if let Some(database) = lookup("DB_NAME") {
            self.store.database = database;
        }
        if let Some(host) = lookup("BROKER_HOST") {
            self.broker.host = host;
        }
        if let Some(port) = lookup("BROKER_PORT") {
            self.broker.port = parse_env("BROKER_PORT", &port)?;
        }
        if let Some(topics) = lookup("BROKER_TOPICS") {
            self.broker.topics = topics
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
        }
        if let Some(scale_factor) = lookup("SCALE_FACTOR") {
            self.ingest.scale_factor = Some(parse_env("SCALE_FACTOR", &scale_factor)?);
        }

        Ok(())
    }

    /// Check the values that would only fail later, at the first message.
    pub fn validate(&self) -> Result<()> {
        if unlikely(self.store.host.is_empty()) {
            error_bail!("store host is empty");
        }

        if unlikely(self.store.database.is_empty()) {
            error_bail!("store database is empty");
        }

        if unlikely(self.broker.topics.is_empty()) {
            error_bail!("no broker topics to subscribe to");
        }

        if unlikely(self.broker.qos > 2) {
            error_bail!("invalid broker qos: {}", self.broker.qos);
        }

        if unlikely(self.broker.notification_topic.is_empty()) {
            error_bail!("notification topic is empty");
        }

        if unlikely(self.ingest.worker_num == 0 || self.ingest.queue_capacity == 0) {
            error_bail!(
                "worker_num and queue_capacity must be positive, worker_num: {}, queue_capacity: {}",
                self.ingest.worker_num,
                self.ingest.queue_capacity
            );
        }

        self.ingest.unit_converter()?;

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow!("invalid value for {}: `{}`, error: {}", key, value, e))
}
