//! # lib_broadcast
//!
//! Real-time topic subscriptions over a message broker, scoped to the
//! lifetime of the consumer that asked for them.
//!
//! ```no_run
//! use lib_broadcast::{BroadcastConfig, SubscriptionManager, Topic};
//! use lib_broadcast::model::Feedback;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = BroadcastConfig::from_env()?;
//! let manager = SubscriptionManager::from_config(&config)?;
//! let scope = manager.attach(
//!     Topic::new("feedback.create")?,
//!     |fb: Feedback| println!("new feedback from {}", fb.email),
//!     |err| eprintln!("broadcast error: {err}"),
//! );
//! // ...
//! scope.detach().await;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod configs;
pub mod core;
pub mod error;
pub mod loggers;
pub mod model;
pub mod retrieve;

pub use broker::{BrokerConnection, BrokerTransport, LocalBroker, NatsWsTransport, Publisher, RawMessage, Subscription, Topic};
pub use configs::{BroadcastConfig, ConfigError};
pub use self::core::{Decoder, JsonDecoder, LifecycleState, SubscriptionManager, SubscriptionScope, TextDecoder, Validated};
pub use error::{BroadcastError, BroadcastResult};
pub use retrieve::{HttpProbe, LivenessProbe, NoopProbe};
