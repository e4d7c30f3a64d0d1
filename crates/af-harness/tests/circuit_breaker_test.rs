//! Global consecutive-failure circuit breaker.

use af_harness::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use std::time::Duration;

fn fast_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 5,
        cooldown: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn starts_closed() {
    let cb = CircuitBreaker::new(fast_config());
    assert_eq!(cb.state().await, CircuitState::Closed);
    assert_eq!(cb.wait_if_open().await, Duration::ZERO);
}

#[tokio::test]
async fn opens_after_threshold_failures() {
    let cb = CircuitBreaker::new(fast_config());
    for _ in 0..4 {
        assert_eq!(cb.record_failure().await, CircuitState::Closed);
    }
    assert_eq!(cb.record_failure().await, CircuitState::Open);
    assert_eq!(cb.failure_count().await, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_all_counted() {
    let cb = CircuitBreaker::new(fast_config());
    let handles: Vec<_> = (0..5)
        .map(|_| {
            let cb = cb.clone();
            tokio::spawn(async move { cb.record_failure().await })
        })
        .collect();

    let mut opened = 0;
    for h in handles {
        if h.await.unwrap() == CircuitState::Open {
            opened += 1;
        }
    }
    assert_eq!(opened, 1);
    assert_eq!(cb.state().await, CircuitState::Open);
    assert_eq!(cb.failure_count().await, 5);
}

#[tokio::test]
async fn success_resets_counter() {
    let cb = CircuitBreaker::new(fast_config());
    for _ in 0..4 {
        cb.record_failure().await;
    }
    cb.record_success().await;
    assert_eq!(cb.failure_count().await, 0);

    for _ in 0..4 {
        cb.record_failure().await;
    }
    assert_eq!(cb.state().await, CircuitState::Closed);
}

#[tokio::test]
async fn open_circuit_waits_cooldown_then_closes() {
    let cb = CircuitBreaker::new(fast_config());
    for _ in 0..5 {
        cb.record_failure().await;
    }
    assert_eq!(cb.state().await, CircuitState::Open);

    let waited = cb.wait_if_open().await;
    assert!(waited >= Duration::from_millis(50));
    assert_eq!(cb.state().await, CircuitState::Closed);
    assert_eq!(cb.failure_count().await, 0);
}

#[tokio::test]
async fn clones_share_state() {
    let cb = CircuitBreaker::new(fast_config());
    let other = cb.clone();
    for _ in 0..5 {
        other.record_failure().await;
    }
    assert_eq!(cb.state().await, CircuitState::Open);
    cb.reset().await;
    assert_eq!(other.state().await, CircuitState::Closed);
}

#[test]
fn config_from_core() {
    let core = af_core::config::BreakerConfig {
        failure_threshold: 7,
        cooldown_secs: 12,
    };
    let cfg = CircuitBreakerConfig::from(&core);
    assert_eq!(cfg.failure_threshold, 7);
    assert_eq!(cfg.cooldown, Duration::from_secs(12));
}
