//! Mqtt side of the bridge: keep the connection, subscribe, hand every
//! received batch to the message queue.
use anyhow::Result;
use log::{error, info, warn};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Packet, QoS};
use std::time::Duration;
use tokio_graceful_shutdown::SubsystemHandle;

use sensorbridge_core::config::BrokerConfig;

use crate::message_worker::InboundMessage;
use crate::tool::{mqtt_options, to_qos, MQTT_CHANNEL_CAPACITY};

pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Vec<String>,
    qos: QoS,
    reconnect_delay: Duration,
    sender: async_channel::Sender<InboundMessage>,
}

impl MqttTransport {
    pub fn new(
        config: &BrokerConfig,
        sender: async_channel::Sender<InboundMessage>,
    ) -> Result<Self> {
        let options = mqtt_options(config)?;
        let (client, eventloop) = AsyncClient::new(options, MQTT_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            eventloop,
            topics: config.topics.clone(),
            qos: to_qos(config.qos)?,
            reconnect_delay: config.reconnect_delay(),
            sender,
        })
    }

    /// Client handle, for publishing notifications on the same connection.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Subscriptions are made on every ConnAck, so they survive reconnects.
    fn subscribe_all(&self) {
        for topic in &self.topics {
            match self.client.try_subscribe(topic.as_str(), self.qos) {
                Ok(()) => info!("subscribe topic: {}, qos: {:?}", topic, self.qos),
                Err(err) => error!("subscribe failed, topic: {}, error: {}", topic, err),
            }
        }
    }

    async fn forward(
        sender: &async_channel::Sender<InboundMessage>,
        topic: String,
        payload: Vec<u8>,
    ) -> Result<()> {
        let size = payload.len();

        sender
            .send(InboundMessage { topic, payload })
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "message queue closed, drop message, topic: {}, bytes: {}",
                    e.0.topic,
                    size
                )
            })
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<()> {
        info!("start mqtt transport, topics: {:?}", self.topics);

        // Only the sender is held across awaits, `EventLoop` is not `Sync`.
        let sender = self.sender.clone();

        let res = loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            if ack.code == ConnectReturnCode::Success {
                                info!("connected to broker");
                                self.subscribe_all();
                            } else {
                                error!("broker refused connection, code: {:?}", ack.code);
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let topic = publish.topic.clone();
                            let payload = publish.payload.to_vec();

                            if let Err(err) = Self::forward(&sender, topic, payload).await {
                                break Err(err);
                            }
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(
                                "mqtt connection error, retry in {:?}, error: {}",
                                self.reconnect_delay, err
                            );
                            tokio::time::sleep(self.reconnect_delay).await;
                        }
                    }
                },
                _ = subsys.on_shutdown_requested() => {
                    info!("mqtt transport shutdown!");
                    break Ok(());
                }
            }
        };

        if let Err(err) = self.client.try_disconnect() {
            warn!("disconnect from broker failed, error: {}", err);
        }

        // Workers stop once what is already queued is handled.
        sender.close();

        res
    }
}
