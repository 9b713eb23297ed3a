//! Ingest of one published batch: parse, convert, partition, persist.
//!
//! Parsing and conversion finish before the first write, so a malformed
//! payload never leaves anything in the store. Partition writes are
//! independent: a rejected partition is reported and the next one is still
//! written, an unreachable store stops the call. Nothing already written is
//! rolled back.
use anyhow::Result;
use log::{error, info};
use std::sync::Arc;

use crate::batch_parser::parse_batch;
use crate::calibration::UnitConverter;
use crate::config::{IngestConfig, MEASUREMENT, VALUE_FIELD};
use crate::db::{SeriesStore, SeriesWrite};
use crate::error::{IngestError, IngestFailure, StoreError};
use crate::partition::{Partition, Partitioner};
use crate::reading::ConvertedReading;
use crate::summary::{PartitionCount, WriteSummary};

#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn SeriesStore>,
    converter: UnitConverter,
    partitioner: Partitioner,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn SeriesStore>,
        converter: UnitConverter,
        partitioner: Partitioner,
    ) -> Self {
        Self {
            store,
            converter,
            partitioner,
        }
    }

    pub fn from_config(store: Arc<dyn SeriesStore>, config: &IngestConfig) -> Result<Self> {
        Ok(Self::new(
            store,
            config.unit_converter()?,
            Partitioner::new(config.point_order),
        ))
    }

    pub fn store(&self) -> &Arc<dyn SeriesStore> {
        &self.store
    }

    pub fn converter(&self) -> &UnitConverter {
        &self.converter
    }

    /// Everything before the first write: parse, convert and partition.
    pub fn prepare(&self, payload: &[u8]) -> Result<Vec<Partition>, IngestError> {
        let readings = parse_batch(payload)?;

        let converted = readings
            .iter()
            .map(|r| r.convert(&self.converter))
            .collect::<Vec<ConvertedReading>>();

        Ok(self.partitioner.partition(&converted))
    }

    /// Ingest one payload, returning what was written.
    pub async fn ingest(&self, payload: &[u8]) -> Result<WriteSummary, IngestFailure> {
        let partitions = self.prepare(payload).map_err(IngestFailure::malformed)?;

        if partitions.is_empty() {
            return Ok(WriteSummary::new());
        }

        self.write_partitions(partitions).await
    }

    /// Write partitions in order, one series write each.
    ///
    /// Also used to retry the `unwritten` partitions of a failed call.
    pub async fn write_partitions(
        &self,
        partitions: Vec<Partition>,
    ) -> Result<WriteSummary, IngestFailure> {
        let mut written = WriteSummary::new();
        let mut errors = Vec::new();
        let mut unwritten = Vec::new();

        let mut iter = partitions.into_iter();

        while let Some(partition) = iter.next() {
            if partition.is_empty() {
                continue;
            }

            let write = SeriesWrite::new(MEASUREMENT, VALUE_FIELD, &partition);

            match self.store.write_series(&write).await {
                Ok(()) => {
                    written.push(PartitionCount::new(partition.key, partition.len()));
                }
                Err(err @ StoreError::Rejected(_)) => {
                    error!(
                        "write partition failed, partition: {}, points: {}, error: {}",
                        partition.key,
                        partition.len(),
                        err
                    );

                    errors.push(IngestError::from_store(&partition.key, err));
                    unwritten.push(partition);
                }
                Err(err @ StoreError::Unavailable { .. }) => {
                    error!(
                        "store unavailable, partition: {}, remaining partitions: {}, error: {}",
                        partition.key,
                        iter.len() + 1,
                        err
                    );

                    errors.push(IngestError::from_store(&partition.key, err));
                    unwritten.push(partition);
                    unwritten.extend(iter.by_ref());
                    break;
                }
            }
        }

        if errors.is_empty() {
            info!(
                "write partitions done, partitions: {}, points: {}",
                written.len(),
                written.total_points()
            );

            Ok(written)
        } else {
            Err(IngestFailure {
                written,
                errors,
                unwritten,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::partition::{PartitionKey, PointOrder};

    const PAYLOAD: &[u8] = b"adc,channel,time_stamp,value\n\
        1,1,2024-01-01T00:00:00,100\n\
        1,2,2024-01-01T00:00:01,200\n\
        2,1,2024-01-01T00:00:02,300\n";

    fn pipeline(store: Arc<MemoryStore>) -> IngestPipeline {
        IngestPipeline::new(
            store,
            UnitConverter::default(),
            Partitioner::new(PointOrder::Ascending),
        )
    }

    #[test]
    fn test_prepare() {
        let pipeline = pipeline(Arc::new(MemoryStore::new()));
        let partitions = pipeline.prepare(PAYLOAD).unwrap();

        assert_eq!(partitions.len(), 3);
        assert_eq!(partitions[0].points[0].1, 12.5);
        assert_eq!(partitions[2].key, PartitionKey::new(2, 1));
    }

    #[tokio::test]
    async fn test_rejected_partition_does_not_stop_others() {
        let store = Arc::new(MemoryStore::new());
        store.reject(PartitionKey::new(1, 2));

        let failure = pipeline(store.clone()).ingest(PAYLOAD).await.unwrap_err();

        assert_eq!(failure.written.len(), 2);
        assert_eq!(failure.failed_keys(), vec![&PartitionKey::new(1, 2)]);
        assert_eq!(failure.unwritten.len(), 1);
        assert!(failure.is_retryable());
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_stops_the_call() {
        let store = Arc::new(MemoryStore::new());
        store.unavailable_after(1);

        let failure = pipeline(store.clone()).ingest(PAYLOAD).await.unwrap_err();

        assert!(failure.is_unavailable());
        assert_eq!(
            failure.written.entries(),
            &[PartitionCount::new(PartitionKey::new(1, 1), 1)]
        );
        assert_eq!(
            failure.unwritten.iter().map(|p| p.key).collect::<Vec<_>>(),
            vec![PartitionKey::new(1, 2), PartitionKey::new(2, 1)]
        );

        // Nothing already written is rolled back.
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_unwritten() {
        let store = Arc::new(MemoryStore::new());
        store.unavailable_after(1);

        let pipeline = pipeline(store.clone());
        let failure = pipeline.ingest(PAYLOAD).await.unwrap_err();

        store.set_unavailable(false);
        let summary = pipeline.write_partitions(failure.unwritten).await.unwrap();

        assert_eq!(summary.len(), 2);
        assert_eq!(store.write_count(), 3);
    }

    #[tokio::test]
    async fn test_malformed_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let payload = b"adc,channel,time_stamp,value\n1,1,2024-01-01T00:00:00,100\n1,1,not a date,5\n";

        let failure = pipeline(store.clone()).ingest(payload).await.unwrap_err();

        assert!(failure.is_malformed());
        assert!(!failure.is_retryable());
        assert_eq!(store.write_count(), 0);
    }
}
