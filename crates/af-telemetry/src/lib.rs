//! Logging setup shared by the agent-foundry binaries.
//!
//! Everything else in the workspace only emits `tracing` events; this crate
//! decides where they go and in which format.

pub mod logging;

pub use logging::{init_from_config, init_logging, init_logging_json};
