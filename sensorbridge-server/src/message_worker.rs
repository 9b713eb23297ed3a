use anyhow::{anyhow, Result};
use log::{error, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_graceful_shutdown::SubsystemHandle;

use crate::message_handler::{HandleStatus, MessageHandler};

/// One message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: &str, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.to_string(),
            payload,
        }
    }
}

/// Counters shared by all workers.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub handled: AtomicU64,
    pub stored: AtomicU64,
    pub failed: AtomicU64,
}

impl WorkerStats {
    fn record(&self, status: HandleStatus) {
        self.handled.fetch_add(1, Ordering::Relaxed);

        match status {
            HandleStatus::Stored => self.stored.fetch_add(1, Ordering::Relaxed),
            _ => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Bounded queue between the transport and the ingest workers.
///
/// Messages are handled by a fixed number of workers, so a burst of messages
/// does not turn into a burst of concurrent writes to the store. When the
/// queue is full the transport waits.
pub struct MessageQueue {
    sender: async_channel::Sender<InboundMessage>,
    receiver: async_channel::Receiver<InboundMessage>,
    stats: Arc<WorkerStats>,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = async_channel::bounded::<InboundMessage>(capacity.max(1));

        Self {
            sender,
            receiver,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn sender(&self) -> async_channel::Sender<InboundMessage> {
        self.sender.clone()
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    pub async fn push(&self, message: InboundMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|e| anyhow!("send message to queue failed, topic: {}", e.0.topic))
    }

    /// No more messages, workers stop once the queue is drained.
    pub fn close(&self) {
        self.sender.close();
    }

    pub fn workers(&self, handler: Arc<MessageHandler>, worker_num: usize) -> Vec<IngestWorker> {
        (0..worker_num)
            .map(|worker_id| {
                IngestWorker::new(
                    worker_id,
                    self.receiver.clone(),
                    handler.clone(),
                    self.stats.clone(),
                )
            })
            .collect()
    }
}

pub struct IngestWorker {
    worker_id: usize,
    receiver: async_channel::Receiver<InboundMessage>,
    handler: Arc<MessageHandler>,
    stats: Arc<WorkerStats>,
}

impl IngestWorker {
    pub fn new(
        worker_id: usize,
        receiver: async_channel::Receiver<InboundMessage>,
        handler: Arc<MessageHandler>,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            worker_id,
            receiver,
            handler,
            stats,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn name(&self) -> String {
        format!("ingest_worker_{}", self.worker_id)
    }

    /// Handle messages until the queue is closed and drained.
    pub async fn drain(&self) {
        while let Ok(message) = self.receiver.recv().await {
            self.process(message).await;
        }
    }

    async fn process(&self, message: InboundMessage) {
        let outcome = self
            .handler
            .handle(&message.topic, &message.payload)
            .await;

        self.stats.record(outcome.status());
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<()> {
        info!("start ingest worker {}", self.worker_id);

        loop {
            tokio::select! {
                message = self.receiver.recv() => {
                    match message {
                        Ok(message) => {
                            // An ingest call runs to completion, shutdown is
                            // only checked between messages.
                            self.process(message).await;
                        }
                        Err(err) => {
                            info!(
                                "queue closed, ingest worker {} done, error: {}",
                                self.worker_id, err
                            );
                            break;
                        }
                    }
                },
                _ = subsys.on_shutdown_requested() => {
                    info!("ingest worker {} shutdown!", self.worker_id);
                    break;
                }
            }
        }

        // Messages already queued are still handled, nothing new is waited for.
        let mut drained = 0;
        while let Ok(message) = self.receiver.try_recv() {
            self.process(message).await;
            drained += 1;
        }

        if drained > 0 {
            info!(
                "ingest worker {} handled {} queued messages after shutdown",
                self.worker_id, drained
            );
        }

        if !self.receiver.is_empty() {
            error!(
                "ingest worker {} stopped with {} messages left in queue",
                self.worker_id,
                self.receiver.len()
            );
        }

        Ok(())
    }
}
