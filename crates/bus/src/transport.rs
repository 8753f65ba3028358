use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to subscribe: {0}")]
    Subscribe(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport publish failed: {0}")]
    Publish(String),
    #[error("transport is closed")]
    Closed,
}

/// Topic-based pub/sub with at-least-once delivery. Each subscription receives its own copy of
/// every record published after it was opened.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Next raw record, or `None` once the stream has ended.
    async fn next_record(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// In-process stand-in for the production broker, one broadcast channel per topic.
#[derive(Clone)]
pub struct InMemoryBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<Arc<[u8]>>>>>,
    capacity: usize,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { topics: Arc::new(RwLock::new(HashMap::new())), capacity: capacity.max(1) }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        topics.get(topic).map(broadcast::Sender::receiver_count).unwrap_or(0)
    }

    /// Ends every open subscription. Publishing afterwards recreates the topic.
    pub fn shutdown(&self) {
        let mut topics = self.topics.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        topics.clear();
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Arc<[u8]>> {
        if let Some(sender) = self
            .topics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(topic)
            .cloned()
        {
            return sender;
        }

        let mut topics = self.topics.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[async_trait]
impl BusTransport for InMemoryBus {
    async fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let receiver = self.sender(topic).subscribe();
        debug!(
            event_name = "bus.transport.subscribed",
            topic,
            consumer_group,
            "opened in-memory subscription"
        );
        Ok(Box::new(InMemorySubscription {
            consumer_group: consumer_group.to_string(),
            receiver,
        }))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        // A topic nobody listens to yet drops the record, like a broker with no retention.
        if self.sender(topic).send(Arc::from(payload)).is_err() {
            debug!(event_name = "bus.transport.no_subscribers", topic, "record dropped");
        }
        Ok(())
    }
}

struct InMemorySubscription {
    consumer_group: String,
    receiver: broadcast::Receiver<Arc<[u8]>>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next_record(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.receiver.recv().await {
                Ok(record) => return Ok(Some(record.to_vec())),
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        event_name = "bus.transport.lagged",
                        consumer_group = %self.consumer_group,
                        skipped,
                        "subscription fell behind; oldest records were dropped"
                    );
                }
            }
        }
    }
}
