//! Background worker for agent-foundry.
//!
//! The daemon drains the durable feature queue one feature at a time through
//! the agent pipeline, runs retention, and sends status notifications.

pub mod daemon;
pub mod queue;

pub use daemon::{Daemon, DaemonIntervals};
pub use queue::{FeatureProcessor, FeatureQueue, JobError, QueueError, QueueSettings};
