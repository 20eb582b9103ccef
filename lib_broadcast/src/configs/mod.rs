//! # Configuration Module
//!
//! Resolves the endpoints and tuning knobs the subscription manager needs.
//!
//! ## Contained Modules:
//! - **`config_broadcast`**: `BroadcastConfig`, loaded from arguments, the
//!   environment, or a deserialised file section.

/// Endpoint and timeout settings for probing and connecting.
pub mod config_broadcast;

pub use config_broadcast::{BroadcastConfig, ConfigError};
