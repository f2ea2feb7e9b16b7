//! MQTT transport
//!
//! Wraps a `rumqttc` client. The event loop runs in its own task and forwards every incoming
//! publish into a bounded channel. rumqttc reconnects on the next poll after a connection
//! error; since sessions are clean, subscriptions are re-issued on every `ConnAck`.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use super::{InboundMessage, Publisher, TransportError};
use crate::config::BrokerConfig;

/// Requests buffered between the client handle and the event loop
const CLIENT_CAPACITY: usize = 64;

/// Incoming messages buffered before the dispatch loop picks them up
const INBOUND_CAPACITY: usize = 256;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Connected broker session
pub struct MqttTransport {
    client: AsyncClient,
    poll_task: JoinHandle<()>,
}

impl MqttTransport {
    /// Connect, subscribe to `filters`, and start the event loop.
    ///
    /// Fails if the broker doesn't acknowledge the connection within the connect timeout. After
    /// that point connection loss is handled internally.
    #[instrument(skip(broker, filters), fields(host = %broker.host, port = broker.port))]
    pub async fn connect(
        broker: &BrokerConfig,
        client_id: &str,
        filters: Vec<String>,
    ) -> Result<(Self, mpsc::Receiver<InboundMessage>), TransportError> {
        let addr = format!("{}:{}", broker.host, broker.port);

        let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
        options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs));
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);

        tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| TransportError::Connect {
                addr: addr.clone(),
                reason: "timed out waiting for CONNACK".to_string(),
            })?
            .map_err(|reason| TransportError::Connect {
                addr: addr.clone(),
                reason,
            })?;

        info!("connected to broker at {addr}");

        for filter in &filters {
            client
                .subscribe(filter.as_str(), QoS::AtMostOnce)
                .await
                .map_err(|e| TransportError::Subscribe {
                    filter: filter.clone(),
                    reason: e.to_string(),
                })?;
            debug!("subscribed to {filter}");
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let poll_task = tokio::spawn(poll_loop(eventloop, client.clone(), filters, inbound_tx));

        Ok((Self { client, poll_task }, inbound_rx))
    }

    /// Cloneable publishing handle sharing this session
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    pub async fn disconnect(self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("disconnect request failed: {e}");
        }
        self.poll_task.abort();
        info!("disconnected from broker");
    }
}

/// Publishing half of an [`MqttTransport`]
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        trace!("publishing {} bytes to {topic}", payload.len());
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), String> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(format!("broker refused connection: {code:?}")),
                };
            }
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }
}

async fn poll_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    filters: Vec<String>,
    inbound_tx: mpsc::Sender<InboundMessage>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };

                if inbound_tx.send(message).await.is_err() {
                    debug!("inbound receiver dropped, stopping event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("reconnected to broker, re-subscribing");
                for filter in &filters {
                    if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                        error!("failed to re-subscribe to {filter}: {e}");
                    }
                }
            }
            Ok(event) => trace!("mqtt event: {event:?}"),
            Err(e) => {
                warn!("mqtt connection error: {e}, retrying in {RECONNECT_DELAY:?}");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
