//! Outbound notification of what was just written.
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use rumqttc::{AsyncClient, QoS};
use std::sync::Mutex;

use sensorbridge_core::summary::Notification;

/// Publishes write summaries for downstream services.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Publishes the json encoded notification on a fixed topic.
pub struct MqttNotifier {
    client: AsyncClient,
    topic: String,
    qos: QoS,
}

impl MqttNotifier {
    pub fn new(client: AsyncClient, topic: &str, qos: QoS) -> Self {
        Self {
            client,
            topic: topic.to_string(),
            qos,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl Notifier for MqttNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let payload = notification.to_json()?;

        self.client
            .publish(self.topic.as_str(), self.qos, false, payload.into_bytes())
            .await
            .with_context(|| {
                format!(
                    "publish notification failed, topic: {}, source topic: {}",
                    self.topic,
                    notification.topic()
                )
            })?;

        debug!(
            "notification published, topic: {}, source topic: {}, partitions: {}",
            self.topic,
            notification.topic(),
            notification.summary().len()
        );

        Ok(())
    }
}

/// Only logs the notifications.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        info!("notification: {}", notification.to_json()?);
        Ok(())
    }
}

/// Keeps every notification in memory, for tests.
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .map(|x| x.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let mut notifications = self
            .notifications
            .lock()
            .map_err(|e| anyhow::anyhow!("lock poisoned: {}", e))?;

        notifications.push(notification.clone());

        Ok(())
    }
}
