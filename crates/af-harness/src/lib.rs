//! Harness: reliability infrastructure around model dispatch.
//!
//! - Circuit breaker shared by every dispatch
//! - Sliding-window rate limiter for queue job starts
//! - Exponential retry policy
//! - Cooperative shutdown coordination
//! - Tool catalog resolving tool groups to definitions

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;
pub mod shutdown;
pub mod tools;
