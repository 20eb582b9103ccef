//! # Broadcast Errors
//!
//! Every failure the subscription lifecycle can surface. The enum is `Clone`
//! so a single value can be handed to a caller's error handler while the
//! library keeps logging its own copy.

use thiserror::Error;

/// Errors that can occur while probing, connecting, subscribing, or consuming.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    /// The topic does not follow the broker's subject naming rules.
    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic {
        /// The rejected topic text.
        topic: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The liveness probe failed. Never fatal.
    #[error("Liveness probe failed: {0}")]
    Probe(String),

    /// The transport session to the broker could not be established.
    #[error("Connect error: {0}")]
    Connect(String),

    /// The broker refused or failed the subscription.
    #[error("Subscribe error for topic '{topic}': {reason}")]
    Subscribe {
        /// Topic that could not be bound.
        topic: String,
        /// Broker or transport reason.
        reason: String,
    },

    /// A message payload was not valid UTF-8 text.
    #[error("Decode error on topic '{topic}': {reason}")]
    Decode {
        /// Topic the message arrived on.
        topic: String,
        /// Underlying UTF-8 error.
        reason: String,
    },

    /// A message payload did not match the declared shape.
    #[error("Parse error on topic '{topic}': {reason}")]
    Parse {
        /// Topic the message arrived on.
        topic: String,
        /// Underlying JSON or validation error.
        reason: String,
    },

    /// The broker sent something the wire codec does not understand.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A publish could not be serialised or written.
    #[error("Publish error on topic '{topic}': {reason}")]
    Publish {
        /// Target topic.
        topic: String,
        /// Serialisation or transport reason.
        reason: String,
    },

    /// The connection is already closed.
    #[error("Connection closed")]
    Closed,

    /// Low-level I/O or WebSocket failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl BroadcastError {
    /// True for the failures that end an attach before any message can flow.
    pub fn is_setup_failure(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Subscribe { .. })
    }

    /// True for per-message failures that leave the stream running.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::Parse { .. })
    }
}

/// Convenience alias used across the crate.
pub type BroadcastResult<T> = Result<T, BroadcastError>;
