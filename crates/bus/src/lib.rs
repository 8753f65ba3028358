//! Canonical message stream plumbing.
//!
//! - `envelope` - JSON wire codec shared with external producers and the web fan-out service
//! - `transport` - pub/sub seam (`BusTransport`) plus an in-process broadcast implementation
//! - `consumer` - resilient per-consumer-group read loop with reconnect backoff
//! - `publisher` - encodes and publishes domain messages
//! - `ingress` - lets the flow coordinator sit directly behind a consumer
//!
//! ```text
//! producer -> topic -+-> BusConsumer("parley-flow")    -> FlowCoordinator
//!                    +-> BusConsumer("parley-agent-a") -> AgentRuntime a -> BusPublisher -> topic
//!                    +-> BusConsumer("parley-agent-b") -> AgentRuntime b -> BusPublisher -> topic
//! ```

pub mod consumer;
pub mod envelope;
pub mod ingress;
pub mod publisher;
pub mod transport;

pub use consumer::{BusConsumer, ConsumerExit, HandlerError, MessageHandler, ReconnectPolicy};
pub use envelope::{decode, encode, DecodeError, EncodeError, WireEnvelope};
pub use publisher::{BusPublisher, PublishError};
pub use transport::{BusTransport, InMemoryBus, Subscription, TransportError};
