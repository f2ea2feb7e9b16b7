//! Message transports
//!
//! - [`mqtt`]: the broker connection used in production
//! - [`memory`]: an in-process bus with the same topic semantics, for tests and single-process
//!   wiring
//! - [`udp`]: the local side channel carrying critical alerts to the gateway
//!
//! All transports are best-effort and at-most-once.

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod mqtt;
pub mod udp;

pub use memory::MemoryBus;
pub use mqtt::MqttTransport;
pub use udp::{AlertSink, UdpAlertSender, spawn_alert_listener};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("subscribe to {filter} failed: {reason}")]
    Subscribe { filter: String, reason: String },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("could not encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Anything that can publish a payload on a topic
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Serialize `message` as JSON and publish it
pub async fn publish_json<T: serde::Serialize>(
    publisher: &dyn Publisher,
    topic: &str,
    message: &T,
) -> Result<(), TransportError> {
    let payload = serde_json::to_vec(message)?;
    publisher.publish(topic, payload).await
}
