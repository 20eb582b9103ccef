//! # Subscription Manager
//!
//! Attaches a typed message handler to a broker topic for as long as the
//! returned [`SubscriptionScope`] lives.
//!
//! Each attach spawns one background task that runs the whole sequence:
//! liveness probe, connect, subscribe, consume. The same task releases the
//! subscription and the connection when the scope's cancellation token
//! fires or the broker ends the stream. Connection and subscription never
//! leave that task, so each scope owns at most one of each.
//!
//! ## Failure handling
//! - Probe failures are logged and setup continues.
//! - Connect and subscribe failures reach `on_error` once and end the scope.
//! - A payload that does not decode reaches `on_error` and the stream goes on.
//! - Unsubscribe and close failures during teardown are logged at debug.
//!
//! Once the token is cancelled neither handler runs again.

use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::decoder::{Decoder, JsonDecoder};
use super::lifecycle::{LifecycleState, StateTracker};
use crate::broker::{BrokerConnection, BrokerTransport, NatsWsTransport, Subscription, Topic};
use crate::configs::BroadcastConfig;
use crate::error::{BroadcastError, BroadcastResult};
use crate::retrieve::{HttpProbe, LivenessProbe, NoopProbe};

/// Creates subscription scopes against one broker endpoint.
pub struct SubscriptionManager<Tr: BrokerTransport> {
    transport: Arc<Tr>,
    probe: Arc<dyn LivenessProbe>,
    endpoint: Arc<str>,
}

impl<Tr: BrokerTransport> Clone for SubscriptionManager<Tr> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            probe: Arc::clone(&self.probe),
            endpoint: Arc::clone(&self.endpoint),
        }
    }
}

impl SubscriptionManager<NatsWsTransport> {
    /// NATS-over-WebSocket manager with the HTTP probe, or no probe when
    /// `probe_enabled` is off.
    pub fn from_config(config: &BroadcastConfig) -> BroadcastResult<Self> {
        let probe: Arc<dyn LivenessProbe> = if config.probe_enabled {
            Arc::new(HttpProbe::from_config(config)?)
        } else {
            Arc::new(NoopProbe)
        };
        Ok(Self::new(
            Arc::new(NatsWsTransport::from_config(config)),
            probe,
            config.broadcast_url.clone(),
        ))
    }
}

impl<Tr: BrokerTransport> SubscriptionManager<Tr> {
    /// Manager over an explicit transport and probe.
    pub fn new(transport: Arc<Tr>, probe: Arc<dyn LivenessProbe>, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            probe,
            endpoint: Arc::from(endpoint.into()),
        }
    }

    /// Broker endpoint every scope connects to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Subscribes to `topic`, decoding each payload as JSON into `T`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach<T, M, E>(&self, topic: Topic, on_message: M, on_error: E) -> SubscriptionScope
    where
        T: DeserializeOwned + Send + 'static,
        M: FnMut(T) + Send + 'static,
        E: FnMut(BroadcastError) + Send + 'static,
    {
        self.attach_with(topic, JsonDecoder::<T>::new(), on_message, on_error)
    }

    /// Like [`attach`](Self::attach) with a caller-supplied decoder.
    pub fn attach_with<D, M, E>(&self, topic: Topic, decoder: D, on_message: M, on_error: E) -> SubscriptionScope
    where
        D: Decoder,
        M: FnMut(D::Output) + Send + 'static,
        E: FnMut(BroadcastError) + Send + 'static,
    {
        let token = CancellationToken::new();
        let (state, state_rx) = StateTracker::new(topic.clone());

        let worker = Worker {
            transport: Arc::clone(&self.transport),
            probe: Arc::clone(&self.probe),
            endpoint: Arc::clone(&self.endpoint),
            topic: topic.clone(),
            token: token.clone(),
            state,
        };
        let task = tokio::spawn(worker.run(decoder, on_message, on_error));

        SubscriptionScope {
            topic,
            token,
            task: Mutex::new(Some(task)),
            state: state_rx,
        }
    }
}

/// Handle to one attached subscription.
///
/// Dropping the scope cancels it; the background task then releases its
/// resources on its own. Call [`detach`](Self::detach) to also wait for that.
#[derive(Debug)]
pub struct SubscriptionScope {
    topic: Topic,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    state: watch::Receiver<LifecycleState>,
}

impl SubscriptionScope {
    /// Topic this scope is bound to.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Ends the subscription and waits for the background task to finish.
    ///
    /// Safe to call at any point, including before setup completes, and any
    /// number of times, concurrently too. Every call returns only once no
    /// handler will run again and the connection has been released. A connect
    /// or subscribe still in flight is awaited first, then its result is
    /// released.
    pub async fn detach(&self) {
        self.token.cancel();
        let task = self.task.lock().expect("scope lock poisoned").take();
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    warn!(topic = %self.topic, error = %e, "Subscription task did not finish cleanly");
                }
            }
            // Another caller owns the join; wait for the task to publish Closed.
            None => self.closed().await,
        }
    }

    /// True once detach was requested or the scope was dropped.
    ///
    /// This flips as soon as detach starts. On a multi-threaded runtime a
    /// handler that was already running may still be finishing at that point;
    /// await [`detach`](Self::detach) or [`closed`](Self::closed) to know that
    /// no handler is running.
    pub fn is_detached(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receiver that observes every lifecycle transition.
    pub fn state_changes(&self) -> watch::Receiver<LifecycleState> {
        self.state.clone()
    }

    /// Resolves once the scope is closed, whether by detach, a setup failure,
    /// or the broker ending the stream.
    pub async fn closed(&self) {
        let mut rx = self.state.clone();
        // An Err means the task is gone, which also means closed.
        let _ = rx.wait_for(LifecycleState::is_closed).await;
    }
}

impl Drop for SubscriptionScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Worker<Tr: BrokerTransport> {
    transport: Arc<Tr>,
    probe: Arc<dyn LivenessProbe>,
    endpoint: Arc<str>,
    topic: Topic,
    token: CancellationToken,
    state: StateTracker,
}

impl<Tr: BrokerTransport> Worker<Tr> {
    async fn run<D, M, E>(self, decoder: D, mut on_message: M, mut on_error: E)
    where
        D: Decoder,
        M: FnMut(D::Output) + Send + 'static,
        E: FnMut(BroadcastError) + Send + 'static,
    {
        let topic = &self.topic;

        let Some(connection) = self.setup_connection(&mut on_error).await else {
            self.state.advance(LifecycleState::Closed);
            return;
        };

        self.state.advance(LifecycleState::Subscribing);
        let mut subscription = match connection.subscribe(topic).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.report(&mut on_error, e);
                release(topic, &connection, None).await;
                self.state.advance(LifecycleState::Closed);
                return;
            }
        };
        if self.token.is_cancelled() {
            debug!(%topic, "Detached while subscribing");
            release(topic, &connection, Some(&subscription)).await;
            self.state.advance(LifecycleState::Closed);
            return;
        }

        info!(%topic, sid = subscription.sid(), "Subscribed");
        self.state.advance(LifecycleState::Consuming);
        self.consume(&mut subscription, &decoder, &mut on_message, &mut on_error).await;

        release(topic, &connection, Some(&subscription)).await;
        self.state.advance(LifecycleState::Closed);
    }

    /// Probe then connect. `None` when the scope must end here.
    async fn setup_connection<E>(&self, on_error: &mut E) -> Option<Tr::Connection>
    where
        E: FnMut(BroadcastError),
    {
        let topic = &self.topic;

        self.state.advance(LifecycleState::Probing);
        // The probe holds no resources, so it can be abandoned on detach.
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!(%topic, "Detached while probing");
                return None;
            }
            probed = self.probe.check() => {
                if let Err(e) = probed {
                    warn!(%topic, error = %e, "Liveness probe failed, connecting anyway");
                }
            }
        }

        self.state.advance(LifecycleState::Connecting);
        let connection = match self.transport.connect(&self.endpoint).await {
            Ok(connection) => connection,
            Err(e) => {
                self.report(on_error, e);
                return None;
            }
        };
        if self.token.is_cancelled() {
            debug!(%topic, "Detached while connecting, closing fresh connection");
            release(topic, &connection, None).await;
            return None;
        }
        debug!(%topic, endpoint = %self.endpoint, "Connected");
        Some(connection)
    }

    async fn consume<D, M, E>(&self, subscription: &mut Subscription, decoder: &D, on_message: &mut M, on_error: &mut E)
    where
        D: Decoder,
        M: FnMut(D::Output),
        E: FnMut(BroadcastError),
    {
        let topic = &self.topic;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                next = subscription.next() => next,
            };
            let Some(raw) = next else {
                info!(%topic, "Broker ended the message stream");
                break;
            };
            if self.token.is_cancelled() {
                break;
            }
            match decoder.decode(&raw) {
                Ok(value) => on_message(value),
                Err(e) => {
                    warn!(%topic, subject = %raw.subject, error = %e, "Skipping undecodable message");
                    on_error(e);
                }
            }
        }
    }

    fn report<E>(&self, on_error: &mut E, error: BroadcastError)
    where
        E: FnMut(BroadcastError),
    {
        if self.token.is_cancelled() {
            debug!(topic = %self.topic, error = %error, "Suppressed error after detach");
            return;
        }
        warn!(topic = %self.topic, error = %error, "Subscription setup failed");
        on_error(error);
    }
}

/// Unsubscribes (when bound) then closes. Both steps always run.
async fn release<C: BrokerConnection>(topic: &Topic, connection: &C, subscription: Option<&Subscription>) {
    if let Some(subscription) = subscription {
        if let Err(e) = connection.unsubscribe(subscription.sid()).await {
            debug!(%topic, sid = subscription.sid(), error = %e, "Unsubscribe failed during teardown");
        }
    }
    if let Err(e) = connection.close().await {
        debug!(%topic, error = %e, "Close failed during teardown");
    }
    debug!(%topic, "Released broker resources");
}
