pub mod config;
pub mod job_store;
pub mod notification;
pub mod pattern_store;
pub mod registry;
pub mod types;
