//! In-process pub/sub bus
//!
//! Same topic-filter semantics as the broker (`+` and `#`), no network. The most recent published
//! messages are also kept in a bounded history so tests can assert on what went out.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::{InboundMessage, Publisher, TransportError};
use crate::topics::topic_matches;

const SUBSCRIBER_CAPACITY: usize = 256;

/// Published messages retained for inspection; older ones are discarded
const DEFAULT_HISTORY_CAPACITY: usize = 4096;

struct Subscriber {
    filters: Vec<String>,
    tx: mpsc::Sender<InboundMessage>,
}

struct BusState {
    subscribers: Vec<Subscriber>,
    history: VecDeque<InboundMessage>,
    history_capacity: usize,
}

#[derive(Clone)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that remembers at most `capacity` published messages
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                subscribers: Vec::new(),
                history: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
                history_capacity: capacity,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Receive every message published on a topic matching any of `filters`
    pub fn subscribe(&self, filters: Vec<String>) -> mpsc::Receiver<InboundMessage> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.lock().subscribers.push(Subscriber { filters, tx });
        rx
    }

    /// Retained published messages, in order
    pub fn published(&self) -> Vec<InboundMessage> {
        self.lock().history.iter().cloned().collect()
    }

    /// Payloads published on exactly `topic`, in order
    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .history
            .iter()
            .filter(|message| message.topic == topic)
            .map(|message| message.payload.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for MemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let message = InboundMessage::new(topic, payload);
        let mut state = self.lock();

        state.subscribers.retain(|subscriber| {
            if !subscriber
                .filters
                .iter()
                .any(|filter| topic_matches(filter, topic))
            {
                return true;
            }

            match subscriber.tx.try_send(message.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("subscriber queue full, dropping message on {topic}");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        trace!("published on {topic}");
        if state.history_capacity > 0 {
            if state.history.len() == state.history_capacity {
                state.history.pop_front();
            }
            state.history.push_back(message);
        }
        Ok(())
    }
}
