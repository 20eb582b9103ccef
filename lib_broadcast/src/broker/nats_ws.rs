//! # NATS over WebSocket
//!
//! Production transport. A connection is one WebSocket session speaking the
//! NATS client protocol; after the handshake a background I/O task owns the
//! socket and the public handle talks to it through a command channel.
//!
//! ## Handshake:
//! 1. open the WebSocket (`tokio-tungstenite`);
//! 2. read the server `INFO` greeting;
//! 3. send `CONNECT` followed by `PING`;
//! 4. wait for `PONG`. A `-ERR` here is a connect failure.
//!
//! ## Subscribe acknowledgement:
//! NATS does not acknowledge `SUB` in quiet mode, so every `SUB` is followed by
//! a `PING`. Errors the server emits before the matching `PONG` (permissions
//! violations, invalid subjects) fail that subscribe call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use super::protocol::{
    encode_connect, encode_ping, encode_pong, encode_pub, encode_sub, encode_unsub, ConnectOptions,
    ProtocolParser, ServerInfo, ServerOp,
};
use super::{BrokerConnection, BrokerTransport, RawMessage, Subscription, Topic};
use crate::configs::BroadcastConfig;
use crate::error::{BroadcastError, BroadcastResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings for [`NatsWsTransport`].
#[derive(Debug, Clone)]
pub struct NatsWsOptions {
    /// Connection name reported in `CONNECT`.
    pub client_name: String,
    /// Upper bound for the whole handshake.
    pub connect_timeout: Duration,
}

impl Default for NatsWsOptions {
    fn default() -> Self {
        Self {
            client_name: "lib_broadcast".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens NATS sessions over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct NatsWsTransport {
    options: NatsWsOptions,
}

impl NatsWsTransport {
    /// Creates a transport with explicit options.
    pub fn new(options: NatsWsOptions) -> Self {
        Self { options }
    }

    /// Creates a transport from the broadcast configuration.
    pub fn from_config(config: &BroadcastConfig) -> Self {
        Self::new(NatsWsOptions {
            client_name: config.client_name.clone(),
            connect_timeout: config.connect_timeout(),
        })
    }
}

#[async_trait]
impl BrokerTransport for NatsWsTransport {
    type Connection = NatsWsConnection;

    async fn connect(&self, endpoint: &str) -> BroadcastResult<NatsWsConnection> {
        match tokio::time::timeout(self.options.connect_timeout, handshake(endpoint, &self.options)).await {
            Ok(result) => result,
            Err(_) => Err(BroadcastError::Connect(format!(
                "handshake with {} timed out after {}ms",
                endpoint,
                self.options.connect_timeout.as_millis()
            ))),
        }
    }
}

async fn handshake(endpoint: &str, options: &NatsWsOptions) -> BroadcastResult<NatsWsConnection> {
    info!(endpoint, "Connecting to broker");
    let (mut ws, _) = connect_async(endpoint)
        .await
        .map_err(|e| BroadcastError::Connect(e.to_string()))?;
    let mut parser = ProtocolParser::new();

    let info = match read_handshake_op(&mut ws, &mut parser).await? {
        ServerOp::Info(info) => info,
        ServerOp::Err(reason) => return Err(BroadcastError::Connect(reason)),
        other => {
            return Err(BroadcastError::Connect(format!("expected INFO greeting, got {other:?}")));
        }
    };
    match usize::try_from(info.max_payload) {
        Ok(0) | Err(_) => {}
        Ok(limit) => parser.set_max_payload(limit),
    }

    let mut hello = BytesMut::new();
    hello.extend_from_slice(&encode_connect(&ConnectOptions::named(&options.client_name))?);
    hello.extend_from_slice(&encode_ping());
    ws.send(Message::Binary(hello.freeze()))
        .await
        .map_err(|e| BroadcastError::Connect(e.to_string()))?;

    loop {
        match read_handshake_op(&mut ws, &mut parser).await? {
            ServerOp::Pong => break,
            ServerOp::Err(reason) => return Err(BroadcastError::Connect(reason)),
            ServerOp::Ping => {
                ws.send(Message::Binary(encode_pong()))
                    .await
                    .map_err(|e| BroadcastError::Connect(e.to_string()))?;
            }
            ServerOp::Ok | ServerOp::Info(_) | ServerOp::Msg { .. } => {}
        }
    }

    info!(
        endpoint,
        server_id = %info.server_id,
        version = %info.version,
        "Connected to broker"
    );

    let (commands, command_rx) = mpsc::unbounded_channel();
    let io_task = tokio::spawn(run_io(ws, parser, command_rx));

    Ok(NatsWsConnection {
        commands,
        next_sid: AtomicU64::new(0),
        info,
        io_task: Mutex::new(Some(io_task)),
    })
}

async fn read_handshake_op(ws: &mut WsStream, parser: &mut ProtocolParser) -> BroadcastResult<ServerOp> {
    loop {
        if let Some(op) = parser
            .next_op()
            .map_err(|e| BroadcastError::Connect(e.to_string()))?
        {
            return Ok(op);
        }
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => parser.feed(&data),
            Some(Ok(Message::Text(text))) => parser.feed(text.as_str().as_bytes()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(BroadcastError::Connect("socket closed during handshake".to_string()));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(BroadcastError::Connect(e.to_string())),
        }
    }
}

enum Command {
    Subscribe {
        sid: u64,
        topic: Topic,
        sender: mpsc::UnboundedSender<RawMessage>,
        ack: oneshot::Sender<BroadcastResult<()>>,
    },
    Unsubscribe {
        sid: u64,
        ack: oneshot::Sender<BroadcastResult<()>>,
    },
    Publish {
        frame: Bytes,
        ack: oneshot::Sender<BroadcastResult<()>>,
    },
    Close {
        ack: oneshot::Sender<()>,
    },
}

/// A subscribe waiting for the `PONG` that follows its `SUB`.
struct PendingSub {
    sid: u64,
    topic: Topic,
    ack: oneshot::Sender<BroadcastResult<()>>,
    error: Option<String>,
}

fn transport_err(e: impl std::fmt::Display) -> BroadcastError {
    BroadcastError::Transport(e.to_string())
}

/// Owns the socket after the handshake. Ends every subscription when it exits.
async fn run_io(ws: WsStream, mut parser: ProtocolParser, mut commands: mpsc::UnboundedReceiver<Command>) {
    let (mut sink, mut stream) = ws.split();
    let mut routes: HashMap<u64, mpsc::UnboundedSender<RawMessage>> = HashMap::new();
    let mut pending: VecDeque<PendingSub> = VecDeque::new();
    let mut close_ack: Option<oneshot::Sender<()>> = None;

    'io: loop {
        // Bytes buffered during the handshake are decoded before the first wait.
        loop {
            let op = match parser.next_op() {
                Ok(Some(op)) => op,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed broker frame");
                    continue;
                }
            };
            match op {
                ServerOp::Msg {
                    subject,
                    sid,
                    reply_to,
                    payload,
                } => match routes.get(&sid) {
                    Some(sender) => {
                        let message = RawMessage {
                            subject,
                            reply_to,
                            payload,
                        };
                        if sender.send(message).is_err() {
                            routes.remove(&sid);
                        }
                    }
                    None => trace!(sid, "Dropping message for released subscription"),
                },
                ServerOp::Ping => {
                    if let Err(e) = sink.send(Message::Binary(encode_pong())).await {
                        warn!(error = %e, "Failed to answer broker PING");
                        break 'io;
                    }
                }
                ServerOp::Pong => {
                    if let Some(sub) = pending.pop_front() {
                        match sub.error {
                            None => {
                                let _ = sub.ack.send(Ok(()));
                            }
                            Some(reason) => {
                                routes.remove(&sub.sid);
                                let _ = sub.ack.send(Err(BroadcastError::Subscribe {
                                    topic: sub.topic.to_string(),
                                    reason,
                                }));
                            }
                        }
                    }
                }
                ServerOp::Err(reason) => {
                    warn!(%reason, "Broker reported an error");
                    if let Some(front) = pending.front_mut() {
                        front.error.get_or_insert(reason);
                    }
                }
                ServerOp::Ok | ServerOp::Info(_) => {}
            }
        }

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Subscribe { sid, topic, sender, ack }) => {
                    let mut frame = BytesMut::new();
                    frame.extend_from_slice(&encode_sub(topic.as_str(), sid));
                    frame.extend_from_slice(&encode_ping());
                    if let Err(e) = sink.send(Message::Binary(frame.freeze())).await {
                        let _ = ack.send(Err(BroadcastError::Subscribe {
                            topic: topic.to_string(),
                            reason: e.to_string(),
                        }));
                        break 'io;
                    }
                    debug!(%topic, sid, "SUB sent");
                    routes.insert(sid, sender);
                    pending.push_back(PendingSub { sid, topic, ack, error: None });
                }
                Some(Command::Unsubscribe { sid, ack }) => {
                    routes.remove(&sid);
                    let result = sink.send(Message::Binary(encode_unsub(sid))).await.map_err(transport_err);
                    let failed = result.is_err();
                    let _ = ack.send(result);
                    if failed {
                        break 'io;
                    }
                    debug!(sid, "UNSUB sent");
                }
                Some(Command::Publish { frame, ack }) => {
                    let result = sink.send(Message::Binary(frame)).await.map_err(transport_err);
                    let failed = result.is_err();
                    let _ = ack.send(result);
                    if failed {
                        break 'io;
                    }
                }
                Some(Command::Close { ack }) => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    close_ack = Some(ack);
                    break 'io;
                }
                None => {
                    // Every handle was dropped without an explicit close.
                    let _ = sink.close().await;
                    break 'io;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Binary(data))) => parser.feed(&data),
                Some(Ok(Message::Text(text))) => parser.feed(text.as_str().as_bytes()),
                Some(Ok(Message::Close(_))) | None => {
                    info!("Broker closed the connection");
                    break 'io;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Broker socket error");
                    break 'io;
                }
            },
        }
    }

    for sub in pending.drain(..) {
        let _ = sub.ack.send(Err(BroadcastError::Subscribe {
            topic: sub.topic.to_string(),
            reason: "connection closed".to_string(),
        }));
    }
    // Dropping the senders ends every subscription's message sequence.
    routes.clear();
    if let Some(ack) = close_ack {
        let _ = ack.send(());
    }
    debug!("Broker I/O task finished");
}

/// Handle to one NATS WebSocket session.
pub struct NatsWsConnection {
    commands: mpsc::UnboundedSender<Command>,
    next_sid: AtomicU64,
    info: ServerInfo,
    io_task: Mutex<Option<JoinHandle<()>>>,
}

impl NatsWsConnection {
    /// The `INFO` greeting received during the handshake.
    pub fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    /// True once the I/O task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> BroadcastResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).map_err(|_| BroadcastError::Closed)?;
        rx.await.map_err(|_| BroadcastError::Closed)
    }
}

#[async_trait]
impl BrokerConnection for NatsWsConnection {
    async fn subscribe(&self, topic: &Topic) -> BroadcastResult<Subscription> {
        let sid = self.next_sid.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        let owned = topic.clone();

        self.request(|ack| Command::Subscribe {
            sid,
            topic: owned,
            sender,
            ack,
        })
        .await
        .map_err(|_| BroadcastError::Subscribe {
            topic: topic.to_string(),
            reason: "connection closed".to_string(),
        })??;

        Ok(Subscription::new(sid, topic.clone(), receiver))
    }

    async fn unsubscribe(&self, sid: u64) -> BroadcastResult<()> {
        self.request(|ack| Command::Unsubscribe { sid, ack }).await?
    }

    async fn publish(&self, topic: &Topic, payload: Bytes) -> BroadcastResult<()> {
        let reject = |reason: String| BroadcastError::Publish {
            topic: topic.to_string(),
            reason,
        };
        if topic.is_wildcard() {
            return Err(reject("cannot publish to a wildcard topic".to_string()));
        }
        if self.info.max_payload > 0 && payload.len() as u64 > self.info.max_payload {
            return Err(reject(format!(
                "payload of {} bytes exceeds server limit of {}",
                payload.len(),
                self.info.max_payload
            )));
        }

        let frame = encode_pub(topic.as_str(), &payload);
        self.request(|ack| Command::Publish { frame, ack })
            .await?
            .map_err(|e| reject(e.to_string()))
    }

    async fn close(&self) -> BroadcastResult<()> {
        // Already closed is fine: the I/O task is gone either way.
        let _ = self.request(|ack| Command::Close { ack }).await;

        let handle = self.io_task.lock().expect("io task lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!(error = %e, "Broker I/O task ended abnormally");
            }
        }
        Ok(())
    }
}
