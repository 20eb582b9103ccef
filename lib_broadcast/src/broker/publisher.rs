//! # Publisher
//!
//! Serialises values as JSON and publishes them on a connection. Batch
//! dispatch sends one payload to several topics, serialising it only once.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use super::{BrokerConnection, Topic};
use crate::error::{BroadcastError, BroadcastResult};

/// JSON publisher bound to one connection.
pub struct Publisher<C: BrokerConnection> {
    connection: Arc<C>,
}

impl<C: BrokerConnection> Publisher<C> {
    /// Wraps a shared connection.
    pub fn new(connection: Arc<C>) -> Self {
        Self { connection }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// Publishes `payload` as JSON on `topic`.
    pub async fn publish<T: Serialize + ?Sized>(&self, topic: &Topic, payload: &T) -> BroadcastResult<()> {
        let bytes = encode_json(topic, payload)?;
        self.connection.publish(topic, bytes).await?;
        debug!(%topic, "Published message");
        Ok(())
    }

    /// Publishes one payload to every topic in order, stopping at the first failure.
    pub async fn dispatch_batch<T: Serialize + ?Sized>(&self, topics: &[Topic], payload: &T) -> BroadcastResult<()> {
        let Some(first) = topics.first() else {
            return Ok(());
        };
        let bytes = encode_json(first, payload)?;
        for topic in topics {
            // Bytes clones share the same buffer.
            self.connection.publish(topic, bytes.clone()).await?;
        }
        debug!(count = topics.len(), "Dispatched batch");
        Ok(())
    }
}

impl<C: BrokerConnection> Clone for Publisher<C> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
        }
    }
}

fn encode_json<T: Serialize + ?Sized>(topic: &Topic, payload: &T) -> BroadcastResult<Bytes> {
    serde_json::to_vec(payload)
        .map(Bytes::from)
        .map_err(|e| BroadcastError::Publish {
            topic: topic.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerTransport, LocalBroker};
    use serde_json::json;

    #[tokio::test]
    async fn dispatches_one_payload_to_many_topics() {
        let broker = LocalBroker::new();
        let conn = Arc::new(broker.connect("local").await.unwrap());
        let mut create = conn.subscribe(&Topic::new("feedback.create").unwrap()).await.unwrap();
        let mut any = conn.subscribe(&Topic::new("feedback.>").unwrap()).await.unwrap();

        let publisher = Publisher::new(Arc::clone(&conn));
        let topics = vec![
            Topic::new("feedback.create").unwrap(),
            Topic::new("feedback.create.42").unwrap(),
        ];
        publisher
            .dispatch_batch(&topics, &json!({"id": "42"}))
            .await
            .unwrap();

        let msg = create.next().await.unwrap();
        assert_eq!(&msg.payload[..], br#"{"id":"42"}"#);
        assert_eq!(any.next().await.unwrap().subject, "feedback.create");
        assert_eq!(any.next().await.unwrap().subject, "feedback.create.42");
    }

    #[tokio::test]
    async fn publish_after_close_fails() {
        let broker = LocalBroker::new();
        let conn = Arc::new(broker.connect("local").await.unwrap());
        conn.close().await.unwrap();

        let publisher = Publisher::new(conn);
        let err = publisher
            .publish(&Topic::new("media.create").unwrap(), &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, BroadcastError::Closed);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let broker = LocalBroker::new();
        let conn = Arc::new(broker.connect("local").await.unwrap());
        let publisher = Publisher::new(conn);
        publisher.dispatch_batch(&[], &json!({"ignored": true})).await.unwrap();
    }
}
