//! Grouping of converted readings into one time series per (adc, channel).
//!
//! Partitions come out in the order their key first shows up in the batch.
//! Inside a partition the points are sorted by timestamp, ascending, unless
//! the partitioner is built with `PointOrder::Arrival`. The sort is stable, so
//! points with equal timestamps keep their arrival order either way.
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::reading::ConvertedReading;

/// Identity of one series in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub sensor_group: u32,
    pub channel: u32,
}

impl PartitionKey {
    pub fn new(sensor_group: u32, channel: u32) -> Self {
        Self {
            sensor_group,
            channel,
        }
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "adc={},channel={}", self.sensor_group, self.channel)
    }
}

/// Time-indexed values of one (adc, channel) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub key: PartitionKey,
    pub points: Vec<(DateTime<Utc>, f64)>,
}

impl Partition {
    pub fn new(key: PartitionKey) -> Self {
        Self {
            key,
            points: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Order of the points inside a partition.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PointOrder {
    /// Sorted by timestamp, oldest first.
    #[default]
    Ascending,

    /// As they appeared in the batch.
    Arrival,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Partitioner {
    order: PointOrder,
}

impl Partitioner {
    pub fn new(order: PointOrder) -> Self {
        Self { order }
    }

    pub fn order(&self) -> PointOrder {
        self.order
    }

    /// Group readings by (adc, channel).
    ///
    /// Every reading lands in exactly one partition, no partition is empty.
    pub fn partition(&self, rows: &[ConvertedReading]) -> Vec<Partition> {
        let mut groups: IndexMap<PartitionKey, Vec<(DateTime<Utc>, f64)>> = IndexMap::new();

        for row in rows {
            groups
                .entry(PartitionKey::new(row.sensor_group, row.channel))
                .or_default()
                .push((row.timestamp, row.value));
        }

        groups
            .into_iter()
            .map(|(key, mut points)| {
                if self.order == PointOrder::Ascending {
                    points.sort_by_key(|(ts, _)| *ts);
                }

                Partition { key, points }
            })
            .collect()
    }
}
