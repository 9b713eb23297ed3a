//! What one ingest call wrote, and the notification built from it.
use serde::{Deserialize, Serialize};

use crate::partition::PartitionKey;

/// Points written for one partition.
///
/// Serialized the way downstream consumers expect it:
/// `{"adc": 1, "channel": 2, "amountOfData": 10}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionCount {
    #[serde(rename = "adc")]
    pub sensor_group: u32,

    pub channel: u32,

    #[serde(rename = "amountOfData")]
    pub count: usize,
}

impl PartitionCount {
    pub fn new(key: PartitionKey, count: usize) -> Self {
        Self {
            sensor_group: key.sensor_group,
            channel: key.channel,
            count,
        }
    }

    pub fn key(&self) -> PartitionKey {
        PartitionKey::new(self.sensor_group, self.channel)
    }
}

/// Per-partition write counts of one ingest call, in write order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteSummary {
    entries: Vec<PartitionCount>,
}

impl WriteSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: PartitionCount) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[PartitionCount] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of points written.
    pub fn total_points(&self) -> usize {
        self.entries.iter().map(|x| x.count).sum()
    }

    /// Append the entries of another summary, e.g. from a retry.
    pub fn extend(&mut self, other: WriteSummary) {
        self.entries.extend(other.entries);
    }
}

impl From<Vec<PartitionCount>> for WriteSummary {
    fn from(entries: Vec<PartitionCount>) -> Self {
        Self { entries }
    }
}

/// Message published after a batch is stored.
///
/// Encoded as a two element json array: `[topic, [partition counts...]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification(pub String, pub WriteSummary);

impl Notification {
    pub fn new(topic: &str, summary: WriteSummary) -> Self {
        Self(topic.to_string(), summary)
    }

    pub fn topic(&self) -> &str {
        &self.0
    }

    pub fn summary(&self) -> &WriteSummary {
        &self.1
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
