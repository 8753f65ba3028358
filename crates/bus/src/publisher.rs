use std::sync::Arc;

use parley_core::domain::message::Message;
use thiserror::Error;
use tracing::debug;

use crate::envelope::{self, EncodeError};
use crate::transport::{BusTransport, TransportError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Encodes messages onto one topic.
#[derive(Clone)]
pub struct BusPublisher {
    transport: Arc<dyn BusTransport>,
    topic: String,
}

impl BusPublisher {
    pub fn new(transport: Arc<dyn BusTransport>, topic: impl Into<String>) -> Self {
        Self { transport, topic: topic.into() }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn publish(&self, message: &Message) -> Result<(), PublishError> {
        let payload = envelope::encode(message)?;
        self.transport.publish(&self.topic, payload).await?;
        debug!(
            event_name = "bus.publisher.message_published",
            correlation_id = %message.id,
            conversation_id = %message.conversation_id,
            sender_id = %message.sender_id,
            kind = message.kind.as_str(),
            topic = %self.topic,
            "published message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_core::domain::message::{Message, MessageKind};

    use super::BusPublisher;
    use crate::envelope;
    use crate::transport::{BusTransport, InMemoryBus};

    #[tokio::test]
    async fn published_messages_arrive_as_wire_envelopes() {
        let bus = Arc::new(InMemoryBus::new());
        let mut subscription = bus.subscribe("chat-messages", "observer").await.expect("subscribe");
        let publisher = BusPublisher::new(bus.clone(), "chat-messages");

        let message = Message::new(MessageKind::User, "main-conversation", "user", "hello there");
        publisher.publish(&message).await.expect("publish");

        let payload = subscription.next_record().await.expect("read").expect("record");
        let decoded = envelope::decode(&payload).expect("decodable");
        assert_eq!(decoded.id, message.id);
        assert_eq!(decoded.text, "hello there");
    }
}
