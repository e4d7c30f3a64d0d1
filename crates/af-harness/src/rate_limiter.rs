use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::warn;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The key already used its quota for the current window.
    #[error("rate limit exceeded for key `{key}` – retry after {retry_after:?}")]
    Exceeded {
        key: String,
        /// Time until the oldest recorded start leaves the window.
        retry_after: Duration,
    },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Starts allowed per window.
    pub max_requests: u32,
    /// Length of the rolling window.
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
        }
    }

    /// Allow `count` requests per rolling minute.
    pub fn per_minute(count: u32) -> Self {
        Self::new(count, Duration::from_secs(60))
    }

    /// Allow `count` requests per rolling hour.
    pub fn per_hour(count: u32) -> Self {
        Self::new(count, Duration::from_secs(3600))
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Sliding-window limiter: each key keeps the instants of its recent starts
/// and admits a new one only while fewer than `max_requests` fall inside the
/// window.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Record a start for `key` if the window has room.
    pub fn check(&self, key: &str) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut window = self.windows.entry(key.to_string()).or_default();
        evict(&mut window, now, self.config.window);

        if window.len() < self.config.max_requests as usize {
            window.push_back(now);
            return Ok(());
        }

        let retry_after = window
            .front()
            .map(|oldest| self.config.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(self.config.window);
        warn!(key, ?retry_after, "rate limit exceeded");
        Err(RateLimitError::Exceeded {
            key: key.to_string(),
            retry_after,
        })
    }

    /// Starts still available for `key` in the current window.
    pub fn remaining(&self, key: &str) -> u32 {
        let max = self.config.max_requests;
        match self.windows.get_mut(key) {
            Some(mut window) => {
                evict(&mut window, Instant::now(), self.config.window);
                max.saturating_sub(window.len() as u32)
            }
            None => max,
        }
    }
}

fn evict(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(oldest) = window.front() {
        if now.duration_since(*oldest) >= span {
            window.pop_front();
        } else {
            break;
        }
    }
}
