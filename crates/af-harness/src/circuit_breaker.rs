use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation – dispatches go straight through.
    Closed,
    /// Too many consecutive failures – the next dispatch sits out the cool-down.
    Open,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long a dispatch waits on an open circuit before forcing it closed.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl From<&af_core::config::BreakerConfig> for CircuitBreakerConfig {
    fn from(cfg: &af_core::config::BreakerConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold.max(1),
            cooldown: Duration::from_secs(cfg.cooldown_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Inner state (behind Mutex)
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct InnerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Process-wide breaker over every model dispatch.
///
/// The counter is global, not per role: five failures anywhere open the
/// circuit for everyone. There is no half-open probing; a dispatch that finds
/// the circuit open sleeps the cool-down, then closes it and resets the count.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<InnerState>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(InnerState {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
            })),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state of the circuit breaker.
    pub async fn state(&self) -> CircuitState {
        let guard = self.inner.lock().await;
        guard.state
    }

    /// Returns the current consecutive failure count.
    pub async fn failure_count(&self) -> u32 {
        let guard = self.inner.lock().await;
        guard.failure_count
    }

    /// If the circuit is open, wait the cool-down and force it closed.
    /// Returns the time spent waiting.
    pub async fn wait_if_open(&self) -> Duration {
        let opened_at = {
            let guard = self.inner.lock().await;
            match guard.state {
                CircuitState::Closed => return Duration::ZERO,
                CircuitState::Open => guard.opened_at,
            }
        };

        warn!(
            cooldown_ms = self.config.cooldown.as_millis() as u64,
            open_for_ms = opened_at.map(|t| t.elapsed().as_millis() as u64),
            "circuit breaker open, pausing dispatch"
        );
        let started = Instant::now();
        tokio::time::sleep(self.config.cooldown).await;

        self.reset().await;
        info!("circuit breaker transitioning Open -> Closed after cool-down");
        started.elapsed()
    }

    pub async fn record_success(&self) {
        let mut guard = self.inner.lock().await;
        guard.failure_count = 0;
    }

    /// Count one failed attempt. Returns the state after counting.
    pub async fn record_failure(&self) -> CircuitState {
        let mut guard = self.inner.lock().await;
        guard.failure_count += 1;

        if guard.state == CircuitState::Closed
            && guard.failure_count >= self.config.failure_threshold
        {
            warn!(
                failures = guard.failure_count,
                "circuit breaker transitioning Closed -> Open"
            );
            guard.state = CircuitState::Open;
            guard.opened_at = Some(Instant::now());
        }
        guard.state
    }

    /// Manually reset the circuit breaker to the **Closed** state.
    pub async fn reset(&self) {
        let mut guard = self.inner.lock().await;
        guard.state = CircuitState::Closed;
        guard.failure_count = 0;
        guard.opened_at = None;
    }
}
