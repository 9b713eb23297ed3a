//! The time-series store seen by the ingest pipeline.
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::partition::{Partition, PartitionKey};

/// Tag holding the adc id.
pub const ADC_TAG: &str = "adc";

/// Tag holding the channel id.
pub const CHANNEL_TAG: &str = "channel";

/// One series write: every point of a partition, under one measurement and field.
#[derive(Debug, Clone, Copy)]
pub struct SeriesWrite<'a> {
    pub measurement: &'a str,
    pub field: &'a str,
    pub partition: &'a Partition,
}

impl<'a> SeriesWrite<'a> {
    pub fn new(measurement: &'a str, field: &'a str, partition: &'a Partition) -> Self {
        Self {
            measurement,
            field,
            partition,
        }
    }

    pub fn key(&self) -> PartitionKey {
        self.partition.key
    }

    pub fn tags(&self) -> [(&'static str, String); 2] {
        [
            (ADC_TAG, self.partition.key.sensor_group.to_string()),
            (CHANNEL_TAG, self.partition.key.channel.to_string()),
        ]
    }

    pub fn points(&self) -> &'a [(DateTime<Utc>, f64)] {
        &self.partition.points
    }

    /// Encode as influx line protocol, one line per point, nanosecond precision.
    pub fn to_line_protocol(&self) -> Result<String, StoreError> {
        let mut series_key = escape_measurement(self.measurement);
        for (tag, value) in self.tags() {
            series_key.push(',');
            series_key.push_str(&escape_key(tag));
            series_key.push('=');
            series_key.push_str(&escape_key(&value));
        }

        let field = escape_key(self.field);

        let mut body = String::with_capacity(self.points().len() * (series_key.len() + 40));

        for (ts, value) in self.points() {
            if !value.is_finite() {
                return Err(StoreError::Rejected(format!(
                    "non-finite value {} for {} at {}",
                    value,
                    self.key(),
                    ts
                )));
            }

            let nanos = ts.timestamp_nanos_opt().ok_or_else(|| {
                StoreError::Rejected(format!(
                    "timestamp out of range for nanosecond precision: {}, partition: {}",
                    ts,
                    self.key()
                ))
            })?;

            body.push_str(&format!("{} {}={} {}\n", series_key, field, value, nanos));
        }

        Ok(body)
    }
}

/// A time-series store the pipeline writes partitions into.
///
/// Writes of different series are independent, there is no transaction across
/// partitions. Implementations must accept concurrent calls.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// Where the store lives, for error messages.
    fn endpoint(&self) -> String;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Create the database if it does not exist yet.
    async fn ensure_database(&self) -> Result<(), StoreError>;

    /// Append the points of one series.
    async fn write_series(&self, series: &SeriesWrite<'_>) -> Result<(), StoreError>;
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
