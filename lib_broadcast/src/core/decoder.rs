//! # Message Decoders
//!
//! Turns a [`RawMessage`] into the value handed to the message handler.
//! Invalid UTF-8 is a [`BroadcastError::Decode`]; text that does not fit the
//! target shape is a [`BroadcastError::Parse`].

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::broker::RawMessage;
use crate::error::{BroadcastError, BroadcastResult};

/// Decodes one raw delivery into a typed value.
pub trait Decoder: Send + Sync + 'static {
    /// The value passed to the message handler.
    type Output: Send + 'static;

    /// Decodes `msg`. Errors are reported and the stream moves on.
    fn decode(&self, msg: &RawMessage) -> BroadcastResult<Self::Output>;
}

/// Payload as UTF-8 text.
fn utf8(msg: &RawMessage) -> BroadcastResult<&str> {
    std::str::from_utf8(&msg.payload).map_err(|e| BroadcastError::Decode {
        topic: msg.subject.clone(),
        reason: e.to_string(),
    })
}

/// Passes the payload through as a `String`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDecoder;

impl Decoder for TextDecoder {
    type Output = String;

    fn decode(&self, msg: &RawMessage) -> BroadcastResult<String> {
        utf8(msg).map(str::to_owned)
    }
}

/// UTF-8 then `serde_json` into `T`.
pub struct JsonDecoder<T> {
    _target: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    /// A decoder targeting `T`.
    pub fn new() -> Self {
        Self { _target: PhantomData }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonDecoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonDecoder<{}>", std::any::type_name::<T>())
    }
}

impl<T: DeserializeOwned + Send + 'static> Decoder for JsonDecoder<T> {
    type Output = T;

    fn decode(&self, msg: &RawMessage) -> BroadcastResult<T> {
        let text = utf8(msg)?;
        serde_json::from_str(text).map_err(|e| BroadcastError::Parse {
            topic: msg.subject.clone(),
            reason: e.to_string(),
        })
    }
}

/// Runs a check on every value an inner decoder produces.
///
/// A rejected value is a [`BroadcastError::Parse`] carrying the check's message.
pub struct Validated<D, F> {
    inner: D,
    check: F,
}

impl<D, F> Validated<D, F>
where
    D: Decoder,
    F: Fn(&D::Output) -> Result<(), String> + Send + Sync + 'static,
{
    /// Wraps `inner` with `check`.
    pub fn new(inner: D, check: F) -> Self {
        Self { inner, check }
    }
}

impl<D, F> Decoder for Validated<D, F>
where
    D: Decoder,
    F: Fn(&D::Output) -> Result<(), String> + Send + Sync + 'static,
{
    type Output = D::Output;

    fn decode(&self, msg: &RawMessage) -> BroadcastResult<D::Output> {
        let value = self.inner.decode(msg)?;
        (self.check)(&value).map_err(|reason| BroadcastError::Parse {
            topic: msg.subject.clone(),
            reason,
        })?;
        Ok(value)
    }
}
