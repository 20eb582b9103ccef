//! # Broker Transport Module
//!
//! Everything that talks to the message broker lives here. The subscription
//! manager only sees the two traits below, so the wire transport can be swapped
//! without touching lifecycle logic.
//!
//! ## Contained Modules:
//! - **`topic`**: validated subject names and wildcard matching.
//! - **`protocol`**: the NATS text protocol codec.
//! - **`nats_ws`**: NATS over WebSocket, the transport used in production.
//! - **`local`**: an in-memory broker for tests and single-process setups.
//! - **`publisher`**: JSON publish and batch dispatch on top of a connection.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::BroadcastResult;

/// In-memory broker with NATS subject semantics.
pub mod local;
/// NATS client protocol over a WebSocket session.
pub mod nats_ws;
/// NATS wire codec.
pub mod protocol;
/// Serialising publisher and batch dispatch.
pub mod publisher;
/// Topic validation and matching.
pub mod topic;

pub use local::LocalBroker;
pub use nats_ws::{NatsWsConnection, NatsWsTransport};
pub use publisher::Publisher;
pub use topic::Topic;

/// One message as delivered by the broker, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Concrete subject the message was published on.
    pub subject: String,
    /// Reply subject, if the publisher asked for one.
    pub reply_to: Option<String>,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

/// A live binding between a topic and a connection.
///
/// The message sequence is lazy and cannot be restarted; it ends (`None`) once
/// the connection unsubscribes the id or closes.
#[derive(Debug)]
pub struct Subscription {
    sid: u64,
    topic: Topic,
    receiver: mpsc::UnboundedReceiver<RawMessage>,
}

impl Subscription {
    /// Wraps the receiving half a transport routes deliveries into.
    pub fn new(sid: u64, topic: Topic, receiver: mpsc::UnboundedReceiver<RawMessage>) -> Self {
        Self { sid, topic, receiver }
    }

    /// Connection-scoped subscription id, used to unsubscribe.
    pub fn sid(&self) -> u64 {
        self.sid
    }

    /// Topic this subscription is bound to.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Waits for the next delivery.
    pub async fn next(&mut self) -> Option<RawMessage> {
        self.receiver.recv().await
    }
}

/// A transport session to the broker. May host several subscriptions.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// Binds `topic` on this connection.
    async fn subscribe(&self, topic: &Topic) -> BroadcastResult<Subscription>;

    /// Releases one subscription; its message sequence ends.
    async fn unsubscribe(&self, sid: u64) -> BroadcastResult<()>;

    /// Publishes a payload on a concrete topic.
    async fn publish(&self, topic: &Topic, payload: Bytes) -> BroadcastResult<()>;

    /// Ends the session and every subscription on it. Closing twice is not an error.
    async fn close(&self) -> BroadcastResult<()>;
}

/// Factory for broker sessions.
#[async_trait]
pub trait BrokerTransport: Send + Sync + 'static {
    /// Session type produced by `connect`.
    type Connection: BrokerConnection;

    /// Opens a session against `endpoint`.
    async fn connect(&self, endpoint: &str) -> BroadcastResult<Self::Connection>;
}
