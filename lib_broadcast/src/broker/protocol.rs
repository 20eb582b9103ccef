//! # NATS Client Protocol Codec
//!
//! The broker speaks the NATS text protocol, tunnelled through WebSocket
//! frames. Frame boundaries carry no meaning: one frame may hold half an
//! operation or several of them, so decoding goes through an incremental
//! buffer.
//!
//! ## Server operations decoded:
//! `INFO`, `MSG`, `PING`, `PONG`, `+OK`, `-ERR`.
//!
//! ## Client operations encoded:
//! `CONNECT`, `PING`, `PONG`, `SUB`, `UNSUB`, `PUB`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::BroadcastError;

const CRLF: &[u8] = b"\r\n";

/// Ceiling on a `MSG` payload until the server announces its own limit.
/// Matches the largest `max_payload` a NATS server accepts.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Longest control line accepted while waiting for its CRLF.
pub const MAX_CONTROL_LINE: usize = 4096;

/// Server identity sent in the `INFO` greeting. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ServerInfo {
    /// Unique id of the server process.
    #[serde(default)]
    pub server_id: String,
    /// Human readable server name.
    #[serde(default)]
    pub server_name: String,
    /// Server version string.
    #[serde(default)]
    pub version: String,
    /// Largest payload the server accepts, in bytes.
    #[serde(default)]
    pub max_payload: u64,
    /// Whether the server supports message headers.
    #[serde(default)]
    pub headers: bool,
    /// Whether the server expects credentials in `CONNECT`.
    #[serde(default)]
    pub auth_required: bool,
}

/// Body of the client `CONNECT` operation.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectOptions {
    /// Ask the server for `+OK` after every operation.
    pub verbose: bool,
    /// Strict subject checking on the server.
    pub pedantic: bool,
    /// Client library language.
    pub lang: String,
    /// Client library version.
    pub version: String,
    /// Protocol level; 1 enables async INFO updates.
    pub protocol: u8,
    /// Connection name shown in server monitoring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether this client wants `HMSG` frames.
    pub headers: bool,
    /// Whether messages published on this connection are echoed back to it.
    pub echo: bool,
}

impl ConnectOptions {
    /// Quiet, header-less options tagged with a connection name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            verbose: false,
            pedantic: false,
            lang: "rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol: 1,
            name: Some(name.into()),
            headers: false,
            echo: true,
        }
    }
}

/// One decoded operation from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOp {
    /// Server greeting or async cluster update.
    Info(ServerInfo),
    /// A delivered message for subscription `sid`.
    Msg {
        /// Concrete subject the message was published on.
        subject: String,
        /// Subscription id this delivery belongs to.
        sid: u64,
        /// Optional reply subject.
        reply_to: Option<String>,
        /// Raw payload.
        payload: Bytes,
    },
    /// Keepalive request; must be answered with `PONG`.
    Ping,
    /// Answer to a client `PING`.
    Pong,
    /// Acknowledgement in verbose mode.
    Ok,
    /// Server-side error; the text has its surrounding quotes removed.
    Err(String),
}

/// Incremental decoder for server operations.
#[derive(Debug)]
pub struct ProtocolParser {
    buffer: BytesMut,
    max_payload: usize,
}

impl Default for ProtocolParser {
    fn default() -> Self {
        Self {
            buffer: BytesMut::new(),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ProtocolParser {
    /// Creates an empty parser with [`DEFAULT_MAX_PAYLOAD`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects `MSG` payloads larger than `max_payload` bytes.
    pub fn set_max_payload(&mut self, max_payload: usize) {
        self.max_payload = max_payload;
    }

    /// Appends raw bytes received from the socket.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered, not yet decoded bytes.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Decodes the next complete operation.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A malformed operation is
    /// consumed before the error is returned, so decoding can resume with the
    /// following operation.
    pub fn next_op(&mut self) -> Result<Option<ServerOp>, BroadcastError> {
        let Some(line_end) = find_crlf(&self.buffer) else {
            if self.buffer.len() > MAX_CONTROL_LINE {
                let len = self.buffer.len();
                self.buffer.clear();
                return Err(BroadcastError::Protocol(format!(
                    "control line exceeds {MAX_CONTROL_LINE} bytes ({len} buffered without CRLF)"
                )));
            }
            return Ok(None);
        };

        let line = match std::str::from_utf8(&self.buffer[..line_end]) {
            Ok(line) => line.to_string(),
            Err(e) => {
                self.buffer.advance(line_end + CRLF.len());
                return Err(BroadcastError::Protocol(format!("control line is not UTF-8: {e}")));
            }
        };

        let (op, args) = match line.find(|c: char| c == ' ' || c == '\t') {
            Some(idx) => (&line[..idx], line[idx..].trim()),
            None => (line.as_str(), ""),
        };

        if op.eq_ignore_ascii_case("MSG") {
            return self.take_msg(line_end, args);
        }

        self.buffer.advance(line_end + CRLF.len());
        match op.to_ascii_uppercase().as_str() {
            "PING" => Ok(Some(ServerOp::Ping)),
            "PONG" => Ok(Some(ServerOp::Pong)),
            "+OK" => Ok(Some(ServerOp::Ok)),
            "-ERR" => Ok(Some(ServerOp::Err(args.trim_matches('\'').to_string()))),
            "INFO" => serde_json::from_str::<ServerInfo>(args)
                .map(|info| Some(ServerOp::Info(info)))
                .map_err(|e| BroadcastError::Protocol(format!("invalid INFO payload: {e}"))),
            other => Err(BroadcastError::Protocol(format!("unknown operation '{other}'"))),
        }
    }

    /// `MSG <subject> <sid> [reply-to] <#bytes>\r\n<payload>\r\n`
    fn take_msg(&mut self, line_end: usize, args: &str) -> Result<Option<ServerOp>, BroadcastError> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        let parsed = match parts.as_slice() {
            [subject, sid, size] => parse_msg_args(subject, sid, None, size),
            [subject, sid, reply, size] => parse_msg_args(subject, sid, Some(reply), size),
            _ => Err(BroadcastError::Protocol(format!("malformed MSG arguments '{args}'"))),
        };

        let (subject, sid, reply_to, size) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                self.buffer.advance(line_end + CRLF.len());
                return Err(e);
            }
        };

        let payload_start = line_end + CRLF.len();
        let frame_end = match payload_start
            .checked_add(size)
            .and_then(|end| end.checked_add(CRLF.len()))
        {
            Some(end) if size <= self.max_payload => end,
            _ => {
                // Only the control line can be dropped; the payload is never buffered.
                self.buffer.advance(payload_start);
                return Err(BroadcastError::Protocol(format!(
                    "MSG for sid {sid} declares {size} bytes, limit is {}",
                    self.max_payload
                )));
            }
        };
        if self.buffer.len() < frame_end {
            return Ok(None);
        }

        self.buffer.advance(payload_start);
        let payload = self.buffer.split_to(size).freeze();
        let trailer = self.buffer.split_to(CRLF.len());
        if &trailer[..] != CRLF {
            return Err(BroadcastError::Protocol(format!(
                "MSG payload for sid {sid} is not terminated by CRLF"
            )));
        }

        Ok(Some(ServerOp::Msg {
            subject,
            sid,
            reply_to,
            payload,
        }))
    }
}

fn parse_msg_args(
    subject: &str,
    sid: &str,
    reply: Option<&&str>,
    size: &str,
) -> Result<(String, u64, Option<String>, usize), BroadcastError> {
    let sid = sid
        .parse::<u64>()
        .map_err(|_| BroadcastError::Protocol(format!("invalid MSG sid '{sid}'")))?;
    let size = size
        .parse::<usize>()
        .map_err(|_| BroadcastError::Protocol(format!("invalid MSG size '{size}'")))?;
    Ok((subject.to_string(), sid, reply.map(|r| r.to_string()), size))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF.len()).position(|w| w == CRLF)
}

/// `CONNECT {json}\r\n`
pub fn encode_connect(options: &ConnectOptions) -> Result<Bytes, BroadcastError> {
    let json = serde_json::to_string(options)
        .map_err(|e| BroadcastError::Protocol(format!("cannot encode CONNECT: {e}")))?;
    Ok(Bytes::from(format!("CONNECT {json}\r\n")))
}

/// `PING\r\n`
pub fn encode_ping() -> Bytes {
    Bytes::from_static(b"PING\r\n")
}

/// `PONG\r\n`
pub fn encode_pong() -> Bytes {
    Bytes::from_static(b"PONG\r\n")
}

/// `SUB <subject> <sid>\r\n`
pub fn encode_sub(subject: &str, sid: u64) -> Bytes {
    Bytes::from(format!("SUB {subject} {sid}\r\n"))
}

/// `UNSUB <sid>\r\n`
pub fn encode_unsub(sid: u64) -> Bytes {
    Bytes::from(format!("UNSUB {sid}\r\n"))
}

/// `PUB <subject> <#bytes>\r\n<payload>\r\n`
pub fn encode_pub(subject: &str, payload: &[u8]) -> Bytes {
    let header = format!("PUB {subject} {}\r\n", payload.len());
    let mut out = BytesMut::with_capacity(header.len() + payload.len() + CRLF.len());
    out.put_slice(header.as_bytes());
    out.put_slice(payload);
    out.put_slice(CRLF);
    out.freeze()
}
