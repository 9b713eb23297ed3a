//! In-process store, for dry runs and tests.
//!
//! Failures can be injected, either for the whole store or per partition.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::db::store::{SeriesStore, SeriesWrite};
use crate::error::StoreError;
use crate::partition::PartitionKey;

/// One accepted `write_series` call.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSeries {
    pub measurement: String,
    pub field: String,
    pub key: PartitionKey,
    pub points: Vec<(DateTime<Utc>, f64)>,
}

#[derive(Default)]
pub struct MemoryStore {
    series: Mutex<Vec<StoredSeries>>,
    rejected: Mutex<HashSet<PartitionKey>>,
    unavailable: AtomicBool,

    /// Number of writes accepted before the store goes unavailable, 0 for never.
    unavailable_after: AtomicUsize,

    database_created: AtomicBool,
    write_count: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Go unavailable once `n` more writes have been accepted.
    pub fn unavailable_after(&self, n: usize) {
        let accepted = self.write_count.load(Ordering::SeqCst);
        self.unavailable_after.store(accepted + n, Ordering::SeqCst);

        if n == 0 {
            self.set_unavailable(true);
        }
    }

    /// Reject every write of the partition.
    pub fn reject(&self, key: PartitionKey) {
        if let Ok(mut rejected) = self.rejected.lock() {
            rejected.insert(key);
        }
    }

    /// Accept writes of the partition again.
    pub fn accept(&self, key: &PartitionKey) {
        if let Ok(mut rejected) = self.rejected.lock() {
            rejected.remove(key);
        }
    }

    pub fn series(&self) -> Vec<StoredSeries> {
        self.series
            .lock()
            .map(|series| series.clone())
            .unwrap_or_default()
    }

    /// Every point stored for the partition, across writes.
    pub fn points_for(&self, key: &PartitionKey) -> Vec<(DateTime<Utc>, f64)> {
        self.series()
            .into_iter()
            .filter(|s| &s.key == key)
            .flat_map(|s| s.points)
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    pub fn database_created(&self) -> bool {
        self.database_created.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                endpoint: self.endpoint(),
                reason: "connection refused".to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl SeriesStore for MemoryStore {
    fn endpoint(&self) -> String {
        "memory://".to_string()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn ensure_database(&self) -> Result<(), StoreError> {
        self.check_available()?;
        self.database_created.store(true, Ordering::SeqCst);

        Ok(())
    }

    async fn write_series(&self, write: &SeriesWrite<'_>) -> Result<(), StoreError> {
        self.check_available()?;

        let is_rejected = self
            .rejected
            .lock()
            .map(|rejected| rejected.contains(&write.key()))
            .unwrap_or(false);

        if is_rejected {
            return Err(StoreError::Rejected(format!(
                "partition {} is not accepted",
                write.key()
            )));
        }

        // Same validation as the wire format.
        write.to_line_protocol()?;

        let mut series = self.series.lock().map_err(|e| StoreError::Unavailable {
            endpoint: self.endpoint(),
            reason: format!("lock poisoned: {}", e),
        })?;

        series.push(StoredSeries {
            measurement: write.measurement.to_string(),
            field: write.field.to_string(),
            key: write.key(),
            points: write.points().to_vec(),
        });

        let accepted = self.write_count.fetch_add(1, Ordering::SeqCst) + 1;
        let limit = self.unavailable_after.load(Ordering::SeqCst);

        if limit > 0 && accepted >= limit {
            self.unavailable_after.store(0, Ordering::SeqCst);
            self.set_unavailable(true);
        }

        Ok(())
    }
}
