//! Sliding-window rate limiter.

use std::time::Duration;

use af_harness::rate_limiter::{RateLimitConfig, RateLimitError, RateLimiter};

#[test]
fn allows_requests_within_limit() {
    let limiter = RateLimiter::new(RateLimitConfig::per_hour(5));
    for _ in 0..5 {
        assert!(limiter.check("jobs").is_ok());
    }
    assert_eq!(limiter.remaining("jobs"), 0);
}

#[test]
fn rejects_when_window_full() {
    let limiter = RateLimiter::new(RateLimitConfig::per_hour(5));
    for _ in 0..5 {
        limiter.check("jobs").unwrap();
    }
    match limiter.check("jobs") {
        Err(RateLimitError::Exceeded { key, retry_after }) => {
            assert_eq!(key, "jobs");
            assert!(retry_after <= Duration::from_secs(3600));
            assert!(retry_after > Duration::from_secs(3590));
        }
        Ok(()) => panic!("sixth start in the hour should be refused"),
    }
}

#[test]
fn separate_keys_have_separate_windows() {
    let limiter = RateLimiter::new(RateLimitConfig::per_minute(2));
    limiter.check("a").unwrap();
    limiter.check("a").unwrap();
    assert!(limiter.check("a").is_err());
    assert!(limiter.check("b").is_ok());
    assert_eq!(limiter.remaining("never-used"), 2);
}

#[test]
fn zero_limit_is_clamped_to_one() {
    let config = RateLimitConfig::new(0, Duration::from_secs(1));
    assert_eq!(config.max_requests, 1);
}

#[tokio::test]
async fn window_slides() {
    let limiter = RateLimiter::new(RateLimitConfig::new(2, Duration::from_millis(50)));
    limiter.check("k").unwrap();
    limiter.check("k").unwrap();
    assert!(limiter.check("k").is_err());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(limiter.check("k").is_ok());
}
