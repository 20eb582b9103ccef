//! # Local Broker
//!
//! In-memory broker with the same subject rules as the NATS transport. Useful
//! for tests and for wiring producers and consumers inside one process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{BrokerConnection, BrokerTransport, RawMessage, Subscription, Topic};
use crate::error::{BroadcastError, BroadcastResult};

struct LocalSub {
    topic: Topic,
    sender: mpsc::UnboundedSender<RawMessage>,
}

#[derive(Default)]
struct BrokerState {
    next_connection: u64,
    // (connection id, sid) -> subscription
    subs: HashMap<(u64, u64), LocalSub>,
}

/// Shared in-memory broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LocalBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `payload` to every subscription whose topic matches `subject`.
    ///
    /// Returns the number of subscriptions that received it.
    pub fn publish(&self, subject: &str, payload: Bytes) -> usize {
        let mut state = self.state.lock().expect("LocalBroker lock poisoned");
        let mut delivered = 0;

        state.subs.retain(|_, sub| {
            if !sub.topic.matches(subject) {
                return true;
            }
            let message = RawMessage {
                subject: subject.to_string(),
                reply_to: None,
                payload: payload.clone(),
            };
            match sub.sender.send(message) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                // Receiver dropped without unsubscribing.
                Err(_) => false,
            }
        });

        delivered
    }

    /// Number of live subscriptions across all connections.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().expect("LocalBroker lock poisoned").subs.len()
    }

    fn register(&self, connection: u64, sid: u64, topic: Topic) -> mpsc::UnboundedReceiver<RawMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock().expect("LocalBroker lock poisoned");
        state.subs.insert((connection, sid), LocalSub { topic, sender });
        receiver
    }

    fn release(&self, connection: u64, sid: u64) {
        let mut state = self.state.lock().expect("LocalBroker lock poisoned");
        state.subs.remove(&(connection, sid));
    }

    fn release_connection(&self, connection: u64) {
        let mut state = self.state.lock().expect("LocalBroker lock poisoned");
        state.subs.retain(|(conn, _), _| *conn != connection);
    }
}

/// A session on a [`LocalBroker`].
pub struct LocalConnection {
    broker: LocalBroker,
    id: u64,
    next_sid: AtomicU64,
    closed: AtomicBool,
}

impl LocalConnection {
    fn ensure_open(&self) -> BroadcastResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BroadcastError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerConnection for LocalConnection {
    async fn subscribe(&self, topic: &Topic) -> BroadcastResult<Subscription> {
        self.ensure_open()?;
        let sid = self.next_sid.fetch_add(1, Ordering::SeqCst) + 1;
        let receiver = self.broker.register(self.id, sid, topic.clone());
        Ok(Subscription::new(sid, topic.clone(), receiver))
    }

    async fn unsubscribe(&self, sid: u64) -> BroadcastResult<()> {
        self.ensure_open()?;
        self.broker.release(self.id, sid);
        Ok(())
    }

    async fn publish(&self, topic: &Topic, payload: Bytes) -> BroadcastResult<()> {
        self.ensure_open()?;
        self.broker.publish(topic.as_str(), payload);
        Ok(())
    }

    async fn close(&self) -> BroadcastResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.release_connection(self.id);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerTransport for LocalBroker {
    type Connection = LocalConnection;

    async fn connect(&self, _endpoint: &str) -> BroadcastResult<LocalConnection> {
        let id = {
            let mut state = self.state.lock().expect("LocalBroker lock poisoned");
            state.next_connection += 1;
            state.next_connection
        };
        Ok(LocalConnection {
            broker: self.clone(),
            id,
            next_sid: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }
}
