use sensorbridge_core::{
    batch_parser::parse_batch,
    calibration::UnitConverter,
    config::{BridgeConfig, MEASUREMENT, VALUE_FIELD},
    db::{wait_for_store, MemoryStore, SeriesStore},
    error::IngestError,
    ingest::IngestPipeline,
    partition::{PartitionKey, Partitioner, PointOrder},
    summary::{Notification, PartitionCount, WriteSummary},
    tool::setup_log,
};

use anyhow::Result;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

fn new_pipeline(store: Arc<MemoryStore>) -> IngestPipeline {
    IngestPipeline::new(
        store,
        UnitConverter::default(),
        Partitioner::new(PointOrder::Ascending),
    )
}

#[tokio::test]
async fn test_ingest_two_channels() -> Result<()> {
    setup_log();

    let store = Arc::new(MemoryStore::new());
    let pipeline = new_pipeline(store.clone());

    let payload =
        b"adc,channel,time_stamp,value\n1,1,2024-01-01T00:00:00,100\n1,2,2024-01-01T00:00:01,200";

    let summary = pipeline.ingest(payload).await?;

    assert_eq!(
        summary.entries(),
        &[
            PartitionCount::new(PartitionKey::new(1, 1), 1),
            PartitionCount::new(PartitionKey::new(1, 2), 1),
        ]
    );

    let series = store.series();
    assert_eq!(series.len(), 2);

    assert_eq!(series[0].measurement, MEASUREMENT);
    assert_eq!(series[0].field, VALUE_FIELD);
    assert_eq!(series[0].key, PartitionKey::new(1, 1));
    assert_eq!(
        series[0].points,
        vec![(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), 12.5)]
    );

    assert_eq!(series[1].key, PartitionKey::new(1, 2));
    assert_eq!(
        series[1].points,
        vec![(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap(), 25.0)]
    );

    Ok(())
}

#[tokio::test]
async fn test_ingest_mixed_partitions() -> Result<()> {
    setup_log();

    let store = Arc::new(MemoryStore::new());
    let pipeline = new_pipeline(store.clone());

    let payload = b"adc,channel,time_stamp,value\n\
        1,1,2024-01-01T00:00:00,100\n\
        1,2,2024-01-01T00:00:01,200\n\
        1,1,2024-01-01T00:00:02,300\n";

    let summary = pipeline.ingest(payload).await?;

    assert_eq!(
        summary.entries(),
        &[
            PartitionCount::new(PartitionKey::new(1, 1), 2),
            PartitionCount::new(PartitionKey::new(1, 2), 1),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_ingest_header_only() -> Result<()> {
    setup_log();

    let store = Arc::new(MemoryStore::new());
    let summary = new_pipeline(store.clone())
        .ingest(b"adc,channel,time_stamp,value\n")
        .await?;

    assert!(summary.is_empty());
    assert_eq!(store.write_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_ingest_missing_value_column() -> Result<()> {
    setup_log();

    let store = Arc::new(MemoryStore::new());
    let failure = new_pipeline(store.clone())
        .ingest(b"adc,channel,time_stamp\n1,1,2024-01-01T00:00:00\n")
        .await
        .unwrap_err();

    assert!(failure.is_malformed());
    assert!(matches!(
        failure.errors[0],
        IngestError::MalformedPayload { line: Some(1), .. }
    ));
    assert_eq!(store.write_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_ingest_is_deterministic() -> Result<()> {
    setup_log();

    let payload = std::fs::read("resources/batch.csv")?;

    let first = new_pipeline(Arc::new(MemoryStore::new()))
        .ingest(&payload)
        .await?;
    let second = new_pipeline(Arc::new(MemoryStore::new()))
        .ingest(&payload)
        .await?;

    assert_eq!(first, second);

    Ok(())
}

#[tokio::test]
async fn test_ingest_completeness() -> Result<()> {
    setup_log();

    let payload = std::fs::read("resources/batch.csv")?;
    let rows = parse_batch(&payload)?;

    let store = Arc::new(MemoryStore::new());
    let summary = new_pipeline(store.clone()).ingest(&payload).await?;

    assert_eq!(summary.total_points(), rows.len());

    // Each row lands in the partition of its own key, and nowhere else.
    for entry in summary.entries() {
        let expected = rows
            .iter()
            .filter(|r| r.sensor_group == entry.sensor_group && r.channel == entry.channel)
            .count();

        assert_eq!(entry.count, expected);
        assert_eq!(store.points_for(&entry.key()).len(), expected);
    }

    let points = store.points_for(&PartitionKey::new(2, 3));
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].1, -5.0);

    Ok(())
}

#[tokio::test]
async fn test_store_unavailable_mid_batch() -> Result<()> {
    setup_log();

    let payload = std::fs::read("resources/batch.csv")?;

    let store = Arc::new(MemoryStore::new());
    store.unavailable_after(2);

    let failure = new_pipeline(store.clone())
        .ingest(&payload)
        .await
        .unwrap_err();

    assert!(failure.is_unavailable());
    assert!(failure.is_retryable());
    assert_eq!(failure.written.len(), 2);
    assert_eq!(failure.unwritten.len(), 1);
    assert_eq!(failure.unwritten[0].key, PartitionKey::new(2, 3));

    // The two committed partitions stay in the store.
    assert_eq!(store.series().len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_store_rejects_one_partition() -> Result<()> {
    setup_log();

    let payload = std::fs::read("resources/batch.csv")?;

    let store = Arc::new(MemoryStore::new());
    store.reject(PartitionKey::new(1, 2));

    let failure = new_pipeline(store.clone())
        .ingest(&payload)
        .await
        .unwrap_err();

    assert!(!failure.is_unavailable());
    assert_eq!(failure.failed_keys(), vec![&PartitionKey::new(1, 2)]);
    assert_eq!(
        failure.written.entries(),
        &[
            PartitionCount::new(PartitionKey::new(1, 1), 3),
            PartitionCount::new(PartitionKey::new(2, 3), 1),
        ]
    );

    let notification = Notification::new("usa/quincy/1", failure.written.clone());
    assert_eq!(
        notification.to_json()?,
        r#"["usa/quincy/1",[{"adc":1,"channel":1,"amountOfData":3},{"adc":2,"channel":3,"amountOfData":1}]]"#
    );

    Ok(())
}

#[tokio::test]
async fn test_arrival_order_is_kept() -> Result<()> {
    setup_log();

    let store = Arc::new(MemoryStore::new());
    let pipeline = IngestPipeline::new(
        store.clone(),
        UnitConverter::default(),
        Partitioner::new(PointOrder::Arrival),
    );

    let payload = b"adc,channel,time_stamp,value\n\
        1,1,2024-01-01T00:00:02,8\n\
        1,1,2024-01-01T00:00:01,16\n";

    pipeline.ingest(payload).await?;

    let points = store.points_for(&PartitionKey::new(1, 1));
    assert_eq!(points[0].1, 1.0);
    assert_eq!(points[1].1, 2.0);

    Ok(())
}

#[tokio::test]
async fn test_pipeline_from_config_file() -> Result<()> {
    setup_log();

    let config = BridgeConfig::from_config_file("resources/sensorbridge.toml")?;
    config.validate()?;

    let store = Arc::new(MemoryStore::new());
    wait_for_store(
        store.as_ref(),
        config.store.wait_attempts,
        Duration::from_millis(1),
    )
    .await?;
    store.ensure_database().await?;
    assert!(store.database_created());

    let pipeline = IngestPipeline::from_config(store.clone(), &config.ingest)?;
    assert_eq!(pipeline.converter().scale_factor(), 0.125);

    let summary: WriteSummary = pipeline
        .ingest(b"adc,channel,time_stamp,value\n4,2,2024-01-01T00:00:00Z,-8\n")
        .await?;

    assert_eq!(summary.total_points(), 1);
    assert_eq!(store.points_for(&PartitionKey::new(4, 2))[0].1, -1.0);

    Ok(())
}
