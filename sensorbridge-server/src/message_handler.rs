use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use strum::Display;

use sensorbridge_core::config::IngestConfig;
use sensorbridge_core::error::IngestFailure;
use sensorbridge_core::ingest::IngestPipeline;
use sensorbridge_core::summary::{Notification, WriteSummary};

use crate::notifier::Notifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum HandleStatus {
    /// Every partition is in the store.
    Stored,

    /// Some partitions are in the store, the others failed even after retries.
    Partial,

    /// Nothing could be written.
    Failed,

    /// The payload could not be parsed. Never retried.
    Malformed,
}

/// Result of handling one message.
#[derive(Debug)]
pub struct HandleOutcome {
    pub topic: String,

    /// Everything written for this message, retries included.
    pub written: WriteSummary,

    /// What is still missing after the last attempt. `failure.written` is
    /// always empty, written partitions are accumulated in `written`.
    pub failure: Option<IngestFailure>,

    /// Number of retries made.
    pub retries: u32,

    pub notified: bool,
}

impl HandleOutcome {
    pub fn status(&self) -> HandleStatus {
        match &self.failure {
            None => HandleStatus::Stored,
            Some(failure) if failure.is_malformed() => HandleStatus::Malformed,
            Some(_) if !self.written.is_empty() => HandleStatus::Partial,
            Some(_) => HandleStatus::Failed,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Handles one received message: ingest, retry what the store did not take,
/// then publish the write summary.
pub struct MessageHandler {
    pipeline: IngestPipeline,
    notifier: Arc<dyn Notifier>,

    retry_attempts: u32,
    retry_backoff: Duration,
}

impl MessageHandler {
    pub fn new(
        pipeline: IngestPipeline,
        notifier: Arc<dyn Notifier>,
        retry_attempts: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            pipeline,
            notifier,
            retry_attempts,
            retry_backoff,
        }
    }

    pub fn from_config(
        pipeline: IngestPipeline,
        notifier: Arc<dyn Notifier>,
        config: &IngestConfig,
    ) -> Self {
        Self::new(
            pipeline,
            notifier,
            config.retry_attempts,
            config.retry_backoff(),
        )
    }

    pub async fn handle(&self, topic: &str, payload: &[u8]) -> HandleOutcome {
        let (mut written, mut failure) = match self.pipeline.ingest(payload).await {
            Ok(summary) => (summary, None),
            Err(mut failure) => (std::mem::take(&mut failure.written), Some(failure)),
        };

        let mut retries = 0;

        while let Some(current) = failure.take() {
            if current.is_malformed() || !current.is_retryable() || retries >= self.retry_attempts
            {
                failure = Some(current);
                break;
            }

            retries += 1;

            warn!(
                "retry unwritten partitions, topic: {}, partitions: {}, attempt: {}/{}",
                topic,
                current.unwritten.len(),
                retries,
                self.retry_attempts
            );

            tokio::time::sleep(self.retry_backoff * retries).await;

            match self.pipeline.write_partitions(current.unwritten).await {
                Ok(summary) => written.extend(summary),
                Err(mut next) => {
                    written.extend(std::mem::take(&mut next.written));
                    failure = Some(next);
                }
            }
        }

        if let Some(failure) = &failure {
            for err in &failure.errors {
                error!("handle message failed, topic: {}, error: {}", topic, err);
            }
        }

        // A summary is published when something reached the store, or when the
        // batch was simply empty.
        let notified = if failure.is_none() || !written.is_empty() {
            self.notify(topic, &written).await
        } else {
            false
        };

        let outcome = HandleOutcome {
            topic: topic.to_string(),
            written,
            failure,
            retries,
            notified,
        };

        info!(
            "handle message done, topic: {}, status: {}, partitions: {}, points: {}, retries: {}",
            topic,
            outcome.status(),
            outcome.written.len(),
            outcome.written.total_points(),
            outcome.retries
        );

        outcome
    }

    async fn notify(&self, topic: &str, written: &WriteSummary) -> bool {
        let notification = Notification::new(topic, written.clone());

        match self.notifier.notify(&notification).await {
            Ok(()) => true,
            Err(err) => {
                error!("notify failed, topic: {}, error: {:#}", topic, err);
                false
            }
        }
    }
}
