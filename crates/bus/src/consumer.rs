use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::config::BusConfig;
use parley_core::domain::message::Message;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::envelope;
use crate::transport::{BusTransport, Subscription, TransportError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("message handler failed: {0}")]
pub struct HandlerError(pub String);

/// Receives every decoded message of one subscription, in delivery order.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 1_000, max_delay_ms: 30_000 }
    }
}

impl From<&BusConfig> for ReconnectPolicy {
    fn from(config: &BusConfig) -> Self {
        Self {
            max_retries: config.reconnect_max_retries,
            base_delay_ms: config.reconnect_base_delay_ms,
            max_delay_ms: config.reconnect_max_delay_ms,
        }
    }
}

impl ReconnectPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerExit {
    Cancelled,
    StreamClosed,
    RetriesExhausted,
}

enum SessionEnd {
    Cancelled,
    Closed,
}

/// Resilient read loop for one consumer group. Transport failures reopen the subscription with
/// exponential backoff; undecodable records are dropped; handler failures are logged and the loop
/// moves on to the next record.
pub struct BusConsumer {
    transport: Arc<dyn BusTransport>,
    topic: String,
    consumer_group: String,
    reconnect_policy: ReconnectPolicy,
    cancel: CancellationToken,
}

impl BusConsumer {
    pub fn new(
        transport: Arc<dyn BusTransport>,
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            reconnect_policy,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Opens the subscription up front so callers know records published from now on will be
    /// seen by a later [`BusConsumer::run_with`].
    pub async fn subscribe(&self) -> Result<Box<dyn Subscription>, TransportError> {
        self.transport.subscribe(&self.topic, &self.consumer_group).await
    }

    pub async fn run<H>(&self, handler: &H) -> ConsumerExit
    where
        H: MessageHandler + ?Sized,
    {
        self.run_with(None, handler).await
    }

    pub async fn run_with<H>(
        &self,
        mut subscription: Option<Box<dyn Subscription>>,
        handler: &H,
    ) -> ConsumerExit
    where
        H: MessageHandler + ?Sized,
    {
        let mut attempt = 0_u32;
        loop {
            if self.cancel.is_cancelled() {
                return ConsumerExit::Cancelled;
            }

            let mut delivered = 0_u64;
            let result = self.consume(subscription.take(), handler, &mut delivered).await;
            match result {
                Ok(SessionEnd::Cancelled) => return ConsumerExit::Cancelled,
                Ok(SessionEnd::Closed) => {
                    info!(
                        event_name = "bus.consumer.stream_closed",
                        topic = %self.topic,
                        consumer_group = %self.consumer_group,
                        "bus stream closed"
                    );
                    return ConsumerExit::StreamClosed;
                }
                Err(transport_error) => {
                    if delivered > 0 {
                        attempt = 0;
                    }
                    warn!(
                        event_name = "bus.consumer.transport_failed",
                        topic = %self.topic,
                        consumer_group = %self.consumer_group,
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "bus transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            event_name = "bus.consumer.retries_exhausted",
                            consumer_group = %self.consumer_group,
                            max_retries = self.reconnect_policy.max_retries,
                            "bus retries exhausted; consumer stopping without crash"
                        );
                        return ConsumerExit::RetriesExhausted;
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    attempt += 1;
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = self.cancel.cancelled() => return ConsumerExit::Cancelled,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    async fn consume<H>(
        &self,
        subscription: Option<Box<dyn Subscription>>,
        handler: &H,
        delivered: &mut u64,
    ) -> Result<SessionEnd, TransportError>
    where
        H: MessageHandler + ?Sized,
    {
        let mut subscription = match subscription {
            Some(subscription) => subscription,
            None => {
                let opened = tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                    opened = self.subscribe() => opened,
                };
                opened?
            }
        };
        debug!(
            event_name = "bus.consumer.subscribed",
            topic = %self.topic,
            consumer_group = %self.consumer_group,
            "bus subscription open"
        );

        loop {
            let record = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                record = subscription.next_record() => record?,
            };
            let Some(payload) = record else {
                return Ok(SessionEnd::Closed);
            };
            *delivered += 1;

            let message = match envelope::decode(&payload) {
                Ok(message) => message,
                Err(error) => {
                    warn!(
                        event_name = "bus.consumer.decode_failed",
                        consumer_group = %self.consumer_group,
                        bytes = payload.len(),
                        error = %error,
                        "dropping undecodable record"
                    );
                    continue;
                }
            };

            debug!(
                event_name = "bus.consumer.message_received",
                correlation_id = %message.id,
                conversation_id = %message.conversation_id,
                consumer_group = %self.consumer_group,
                kind = message.kind.as_str(),
                "received bus message"
            );

            let correlation_id = message.id.clone();
            if let Err(error) = handler.handle(message).await {
                warn!(
                    event_name = "bus.consumer.handler_failed",
                    correlation_id = %correlation_id,
                    consumer_group = %self.consumer_group,
                    error = %error,
                    "message handling failed; continuing consumer loop"
                );
            }
        }
    }
}
