//! # Data Retrieval Module
//!
//! HTTP access to the companion API. The subscription manager only needs it
//! for the liveness probe, but the client is generic.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, featuring automatic retries with exponential
//!   backoff.
//! - **`probe`**: the `LivenessProbe` seam, with an HTTP implementation and a
//!   no-op one for when probing is disabled.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;
/// Best-effort reachability check run before connecting.
pub mod probe;

pub use ky_http::{ApiClient, ApiResponse};
pub use probe::{HttpProbe, LivenessProbe, NoopProbe};
