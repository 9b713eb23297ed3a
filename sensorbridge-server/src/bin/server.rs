use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use sensorbridge_core::config::BridgeConfig;
use sensorbridge_core::db::{wait_for_store, InfluxStore, MemoryStore, SeriesStore};
use sensorbridge_core::ingest::IngestPipeline;
use sensorbridge_core::tool::{init_log_with_level, parse_log_level};
use sensorbridge_server::message_handler::MessageHandler;
use sensorbridge_server::message_worker::MessageQueue;
use sensorbridge_server::notifier::{LogNotifier, MqttNotifier, Notifier};
use sensorbridge_server::tool::to_qos;
use sensorbridge_server::transport::MqttTransport;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Toml config file. Defaults and environment variables are used without it.
    #[arg(short, long)]
    config: Option<String>,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Keep the data in memory and only log notifications.
    #[arg(long)]
    dry_run: bool,
}

async fn connect_store(config: &BridgeConfig, dry_run: bool) -> Result<Arc<dyn SeriesStore>> {
    let store: Arc<dyn SeriesStore> = if dry_run {
        info!("dry run, data is kept in memory");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(InfluxStore::new(&config.store)?)
    };

    wait_for_store(
        store.as_ref(),
        config.store.wait_attempts,
        config.store.wait_interval(),
    )
    .await
    .context("store never came up")?;

    store
        .ensure_database()
        .await
        .with_context(|| format!("create database failed: {}", config.store.database))?;

    Ok(store)
}

async fn serve(config: BridgeConfig, dry_run: bool) -> Result<()> {
    let store = connect_store(&config, dry_run).await?;
    let pipeline = IngestPipeline::from_config(store, &config.ingest)?;

    let queue = MessageQueue::new(config.ingest.queue_capacity);
    let transport = MqttTransport::new(&config.broker, queue.sender())?;

    let notifier: Arc<dyn Notifier> = if dry_run {
        Arc::new(LogNotifier)
    } else {
        Arc::new(MqttNotifier::new(
            transport.client(),
            &config.broker.notification_topic,
            to_qos(config.broker.qos)?,
        ))
    };

    let handler = Arc::new(MessageHandler::from_config(
        pipeline,
        notifier,
        &config.ingest,
    ));

    let workers = queue.workers(handler, config.ingest.worker_num);
    let stats = queue.stats();

    info!(
        "starting sensorbridge, broker: {}:{}, store: {}, workers: {}",
        config.broker.host,
        config.broker.port,
        config.store.base_url(),
        workers.len()
    );

    let res = Toplevel::new(|s| async move {
        s.start(SubsystemBuilder::new("mqtt_transport", |a| transport.run(a)));

        for worker in workers {
            s.start(SubsystemBuilder::new(worker.name(), |a| worker.run(a)));
        }
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(5000))
    .await;

    info!(
        "sensorbridge stopped, handled: {}, stored: {}, failed: {}",
        stats.handled(),
        stats.stored(),
        stats.failed()
    );

    res.map_err(|e| anyhow!("shutdown with errors: {:?}", e))
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_log_with_level(parse_log_level(&args.log_level)?);

    let config = match BridgeConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("load config failed, error: {:#}", e);
            return Err(e);
        }
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(config, args.dry_run))?;

    Ok(())
}
