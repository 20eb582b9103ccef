/// Console and JSON-file `tracing` setup with log pruning.
pub mod logger_tracing;

pub use logger_tracing::setup_logging;
