//! # Core Subscription Module
//!
//! Binds consumer callbacks to broker topics for the lifetime of a scope.
//!
//! ## Core Components:
//!
//! - **`subscription_manager`**: `SubscriptionManager::attach` and the
//!   `SubscriptionScope` it returns. One background task per scope runs
//!   probe, connect, subscribe and consume, then releases everything once.
//!
//! - **`decoder`**: how raw payloads become typed values (`JsonDecoder`,
//!   `TextDecoder`, and `Validated` for extra checks).
//!
//! - **`lifecycle`**: the observable `LifecycleState` machine.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Payload decoding.
pub mod decoder;
/// Lifecycle states and legal transitions.
pub mod lifecycle;
/// Attach/detach of topic subscriptions.
pub mod subscription_manager;

// --- Public API Re-exports ---
pub use decoder::{Decoder, JsonDecoder, TextDecoder, Validated};
pub use lifecycle::LifecycleState;
pub use subscription_manager::{SubscriptionManager, SubscriptionScope};
