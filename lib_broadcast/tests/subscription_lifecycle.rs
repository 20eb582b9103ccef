use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lib_broadcast::model::Feedback;
use lib_broadcast::{
    BroadcastError, BroadcastResult, BrokerConnection, BrokerTransport, LifecycleState, LivenessProbe, NoopProbe,
    RawMessage, Subscription, SubscriptionManager, SubscriptionScope, Topic,
};
use tokio::sync::{mpsc, oneshot};

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    closes: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> [usize; 4] {
        [
            self.connects.load(Ordering::SeqCst),
            self.subscribes.load(Ordering::SeqCst),
            self.unsubscribes.load(Ordering::SeqCst),
            self.closes.load(Ordering::SeqCst),
        ]
    }
}

#[derive(Default)]
struct Faults {
    connect: bool,
    subscribe: bool,
    teardown: bool,
}

/// Transport whose single subscription yields whatever the test pushes into `feed`.
struct FakeTransport {
    counters: Arc<Counters>,
    faults: Arc<Faults>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    subscribe_gate: Gate,
    feed: Arc<Mutex<Option<mpsc::UnboundedReceiver<RawMessage>>>>,
}

type Gate = Arc<Mutex<Option<oneshot::Receiver<()>>>>;

struct FakeConnection {
    counters: Arc<Counters>,
    faults: Arc<Faults>,
    subscribe_gate: Gate,
    feed: Arc<Mutex<Option<mpsc::UnboundedReceiver<RawMessage>>>>,
}

#[async_trait]
impl BrokerTransport for FakeTransport {
    type Connection = FakeConnection;

    async fn connect(&self, _endpoint: &str) -> BroadcastResult<FakeConnection> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.faults.connect {
            return Err(BroadcastError::Connect("connection refused".into()));
        }
        Ok(FakeConnection {
            counters: Arc::clone(&self.counters),
            faults: Arc::clone(&self.faults),
            subscribe_gate: Arc::clone(&self.subscribe_gate),
            feed: Arc::clone(&self.feed),
        })
    }
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    async fn subscribe(&self, topic: &Topic) -> BroadcastResult<Subscription> {
        self.counters.subscribes.fetch_add(1, Ordering::SeqCst);
        let gate = self.subscribe_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.faults.subscribe {
            return Err(BroadcastError::Subscribe {
                topic: topic.to_string(),
                reason: "Permissions Violation".into(),
            });
        }
        let receiver = self
            .feed
            .lock()
            .unwrap()
            .take()
            .expect("fake transport supports one subscription");
        Ok(Subscription::new(1, topic.clone(), receiver))
    }

    async fn unsubscribe(&self, _sid: u64) -> BroadcastResult<()> {
        self.counters.unsubscribes.fetch_add(1, Ordering::SeqCst);
        if self.faults.teardown {
            return Err(BroadcastError::Transport("socket reset".into()));
        }
        Ok(())
    }

    async fn publish(&self, _topic: &Topic, _payload: Bytes) -> BroadcastResult<()> {
        Ok(())
    }

    async fn close(&self) -> BroadcastResult<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        if self.faults.teardown {
            return Err(BroadcastError::Transport("socket reset".into()));
        }
        Ok(())
    }
}

struct FailingProbe;

#[async_trait]
impl LivenessProbe for FailingProbe {
    async fn check(&self) -> BroadcastResult<String> {
        Err(BroadcastError::Probe("503 Service Unavailable".into()))
    }
}

struct Harness {
    manager: SubscriptionManager<FakeTransport>,
    counters: Arc<Counters>,
    feed: mpsc::UnboundedSender<RawMessage>,
    subscribe_gate: Gate,
}

impl Harness {
    /// Makes the next subscribe wait until the returned sender fires.
    fn hold_subscribe(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.subscribe_gate.lock().unwrap() = Some(gate);
        release
    }
}

fn harness(faults: Faults, gate: Option<oneshot::Receiver<()>>, probe: Arc<dyn LivenessProbe>) -> Harness {
    let counters = Arc::new(Counters::default());
    let (feed, receiver) = mpsc::unbounded_channel();
    let subscribe_gate: Gate = Arc::default();
    let transport = FakeTransport {
        counters: Arc::clone(&counters),
        faults: Arc::new(faults),
        gate: Mutex::new(gate),
        subscribe_gate: Arc::clone(&subscribe_gate),
        feed: Arc::new(Mutex::new(Some(receiver))),
    };
    Harness {
        manager: SubscriptionManager::new(Arc::new(transport), probe, "ws://fake"),
        counters,
        feed,
        subscribe_gate,
    }
}

fn message(subject: &str, payload: &str) -> RawMessage {
    RawMessage {
        subject: subject.to_string(),
        reply_to: None,
        payload: Bytes::from(payload.to_string()),
    }
}

type Channels<T> = (
    mpsc::UnboundedReceiver<T>,
    mpsc::UnboundedReceiver<BroadcastError>,
);

fn attach_feedback(h: &Harness, topic: &str) -> (SubscriptionScope, Channels<Feedback>) {
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    let (err_tx, err_rx) = mpsc::unbounded_channel();
    let scope = h.manager.attach(
        Topic::new(topic).unwrap(),
        move |fb: Feedback| {
            let _ = msg_tx.send(fb);
        },
        move |err| {
            let _ = err_tx.send(err);
        },
    );
    (scope, (msg_rx, err_rx))
}

async fn wait_for_state(scope: &SubscriptionScope, state: LifecycleState) {
    let mut rx = scope.state_changes();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

#[tokio::test]
async fn attach_then_immediate_detach_never_delivers() {
    let h = harness(Faults::default(), None, Arc::new(NoopProbe));
    h.feed.send(message("feedback.create", r#"{"email":"a@b.com"}"#)).unwrap();

    let (scope, (mut messages, mut errors)) = attach_feedback(&h, "feedback.create");
    scope.detach().await;

    assert!(drain(&mut messages).is_empty());
    assert!(drain(&mut errors).is_empty());
    assert_eq!(scope.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn delivers_every_message_once_in_order() {
    let h = harness(Faults::default(), None, Arc::new(NoopProbe));
    let (scope, (mut messages, mut errors)) = attach_feedback(&h, "feedback.create");

    for i in 0..5 {
        h.feed
            .send(message("feedback.create", &format!(r#"{{"id":"{i}","email":"u{i}@x.io"}}"#)))
            .unwrap();
    }
    let mut seen = Vec::new();
    for _ in 0..5 {
        seen.push(messages.recv().await.unwrap().id.unwrap());
    }
    scope.detach().await;

    assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
    assert!(drain(&mut messages).is_empty());
    assert!(drain(&mut errors).is_empty());
}

#[tokio::test]
async fn detach_twice_cleans_up_once() {
    let h = harness(Faults::default(), None, Arc::new(NoopProbe));
    let (scope, _channels) = attach_feedback(&h, "feedback.update");
    wait_for_state(&scope, LifecycleState::Consuming).await;

    scope.detach().await;
    scope.detach().await;

    assert_eq!(h.counters.snapshot(), [1, 1, 1, 1]);
    assert!(scope.is_detached());
}

#[tokio::test]
async fn connect_failure_is_reported_once_and_never_subscribes() {
    let faults = Faults {
        connect: true,
        ..Faults::default()
    };
    let h = harness(faults, None, Arc::new(NoopProbe));
    let (scope, (_messages, mut errors)) = attach_feedback(&h, "feedback.create");
    scope.closed().await;

    let reported = drain(&mut errors);
    assert_eq!(reported, vec![BroadcastError::Connect("connection refused".into())]);
    assert_eq!(h.counters.snapshot(), [1, 0, 0, 0]);
}

#[tokio::test]
async fn subscribe_failure_is_reported_once_and_closes_connection() {
    let faults = Faults {
        subscribe: true,
        ..Faults::default()
    };
    let h = harness(faults, None, Arc::new(NoopProbe));
    let (scope, (_messages, mut errors)) = attach_feedback(&h, "media.delete");
    scope.closed().await;

    let reported = drain(&mut errors);
    assert_eq!(reported.len(), 1);
    assert!(reported[0].is_setup_failure());
    assert_eq!(h.counters.snapshot(), [1, 1, 0, 1]);

    // Detaching a failed scope is still fine.
    scope.detach().await;
    assert_eq!(h.counters.snapshot(), [1, 1, 0, 1]);
}

#[tokio::test]
async fn feedback_create_payload_reaches_handler_once() {
    let h = harness(Faults::default(), None, Arc::new(NoopProbe));
    let (scope, (mut messages, mut errors)) = attach_feedback(&h, "feedback.create");

    h.feed
        .send(message("feedback.create", r#"{"id":"42","email":"a@b.com"}"#))
        .unwrap();
    let fb = messages.recv().await.unwrap();
    scope.detach().await;

    assert_eq!(fb.id.as_deref(), Some("42"));
    assert_eq!(fb.email, "a@b.com");
    assert!(drain(&mut messages).is_empty());
    assert!(drain(&mut errors).is_empty());
}

#[tokio::test]
async fn detach_during_connect_closes_the_late_connection() {
    let (release, gate) = oneshot::channel();
    let h = harness(Faults::default(), Some(gate), Arc::new(NoopProbe));
    let (scope, (mut messages, mut errors)) = attach_feedback(&h, "feedback.create");
    wait_for_state(&scope, LifecycleState::Connecting).await;

    tokio::join!(scope.detach(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(scope.is_detached());
        release.send(()).unwrap();
    });

    assert_eq!(h.counters.snapshot(), [1, 0, 0, 1]);
    assert_eq!(scope.state(), LifecycleState::Closed);
    assert!(drain(&mut messages).is_empty());
    assert!(drain(&mut errors).is_empty());
}

#[tokio::test]
async fn detach_during_subscribe_releases_the_late_subscription() {
    let h = harness(Faults::default(), None, Arc::new(NoopProbe));
    let release = h.hold_subscribe();
    h.feed.send(message("feedback.create", r#"{"email":"early@x.io"}"#)).unwrap();
    let (scope, (mut messages, mut errors)) = attach_feedback(&h, "feedback.create");
    wait_for_state(&scope, LifecycleState::Subscribing).await;

    tokio::join!(scope.detach(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(scope.is_detached());
        release.send(()).unwrap();
    });

    assert_eq!(h.counters.snapshot(), [1, 1, 1, 1]);
    assert_eq!(scope.state(), LifecycleState::Closed);
    assert!(drain(&mut messages).is_empty());
    assert!(drain(&mut errors).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn messages_queued_at_detach_stop_at_detach() {
    let h = harness(Faults::default(), None, Arc::new(NoopProbe));
    let (scope, (mut messages, mut errors)) = attach_feedback(&h, "feedback.update");
    wait_for_state(&scope, LifecycleState::Consuming).await;

    for i in 0..50 {
        h.feed
            .send(message("feedback.update", &format!(r#"{{"id":"{i}","email":"u{i}@x.io"}}"#)))
            .unwrap();
    }
    scope.detach().await;

    // Whatever got through before the cancel is an in-order prefix.
    let delivered: Vec<String> = drain(&mut messages).into_iter().filter_map(|fb| fb.id).collect();
    let expected: Vec<String> = (0..delivered.len()).map(|i| i.to_string()).collect();
    assert_eq!(delivered, expected);

    let _ = h.feed.send(message("feedback.update", r#"{"id":"late","email":"late@x.io"}"#));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(drain(&mut messages).is_empty());
    assert!(drain(&mut errors).is_empty());
    assert_eq!(h.counters.snapshot(), [1, 1, 1, 1]);
}

#[tokio::test]
async fn connect_failure_after_detach_is_not_reported() {
    let (release, gate) = oneshot::channel();
    let faults = Faults {
        connect: true,
        ..Faults::default()
    };
    let h = harness(faults, Some(gate), Arc::new(NoopProbe));
    let (scope, (_messages, mut errors)) = attach_feedback(&h, "feedback.create");
    wait_for_state(&scope, LifecycleState::Connecting).await;

    tokio::join!(scope.detach(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.send(()).unwrap();
    });

    assert!(drain(&mut errors).is_empty());
}

#[tokio::test]
async fn malformed_payload_is_skipped_and_reported() {
    let h = harness(Faults::default(), None, Arc::new(NoopProbe));
    let (scope, (mut messages, mut errors)) = attach_feedback(&h, "feedback.create");

    h.feed.send(message("feedback.create", "{oops")).unwrap();
    h.feed.send(message("feedback.create", r#"{"email":"ok@x.io"}"#)).unwrap();

    assert_eq!(messages.recv().await.unwrap().email, "ok@x.io");
    let err = errors.recv().await.unwrap();
    assert!(matches!(err, BroadcastError::Parse { ref topic, .. } if topic == "feedback.create"));

    scope.detach().await;
    assert!(drain(&mut errors).is_empty());
}

#[tokio::test]
async fn probe_failure_does_not_stop_setup() {
    let h = harness(Faults::default(), None, Arc::new(FailingProbe));
    let (scope, (mut messages, mut errors)) = attach_feedback(&h, "feedback.create");

    h.feed.send(message("feedback.create", r#"{"email":"a@b.com"}"#)).unwrap();
    assert_eq!(messages.recv().await.unwrap().email, "a@b.com");
    scope.detach().await;

    assert!(drain(&mut errors).is_empty());
    assert_eq!(h.counters.snapshot(), [1, 1, 1, 1]);
}

#[tokio::test]
async fn teardown_failures_are_swallowed() {
    let faults = Faults {
        teardown: true,
        ..Faults::default()
    };
    let h = harness(faults, None, Arc::new(NoopProbe));
    let (scope, (_messages, mut errors)) = attach_feedback(&h, "media.update");
    wait_for_state(&scope, LifecycleState::Consuming).await;

    scope.detach().await;

    // Both steps ran even though unsubscribe failed.
    assert_eq!(h.counters.snapshot(), [1, 1, 1, 1]);
    assert!(drain(&mut errors).is_empty());
}

#[tokio::test]
async fn broker_ending_the_stream_closes_the_scope() {
    let h = harness(Faults::default(), None, Arc::new(NoopProbe));
    let (scope, (_messages, mut errors)) = attach_feedback(&h, "feedback.delete");
    wait_for_state(&scope, LifecycleState::Consuming).await;

    let Harness { counters, feed, .. } = h;
    drop(feed);
    scope.closed().await;

    assert_eq!(counters.snapshot(), [1, 1, 1, 1]);
    assert!(drain(&mut errors).is_empty());
    assert!(!scope.is_detached());
}

#[tokio::test]
async fn observes_every_setup_state() {
    let h = harness(Faults::default(), None, Arc::new(NoopProbe));
    let (scope, _channels) = attach_feedback(&h, "feedback.create");
    let mut states = scope.state_changes();
    assert_eq!(*states.borrow_and_update(), LifecycleState::Idle);

    wait_for_state(&scope, LifecycleState::Consuming).await;
    scope.detach().await;
    states.changed().await.ok();
    assert_eq!(*states.borrow(), LifecycleState::Closed);
}
