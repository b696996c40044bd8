//! Per-operation fault isolator with bounded concurrency-aware failure
//! accounting.
//!
//! ```text
//! CLOSED --(consecutiveFailures >= N)--> OPEN
//! OPEN   --(resetTimeout elapsed)-----> HALF_OPEN
//! HALF_OPEN --(halfOpenRequests successes)--> CLOSED
//! HALF_OPEN --(any failure)----------> OPEN
//! ```
//!
//! `execute` is the only admission path: callers never touch circuit state
//! directly, which is what keeps each key's admission-then-accounting
//! sequence strictly ordered without a separate lock around call sites.

mod config;
mod state;

pub use config::{CircuitBreakerConfig, CircuitBreakerError};
pub use state::{CircuitBreaker, CircuitStats, ExecuteError, State};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn opens_cools_half_opens_closes() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(100),
            half_open_requests: 2,
        })
        .unwrap();

        for _ in 0..3 {
            let res: Result<(), ExecuteError<&str>> =
                breaker.execute("k", || async { Err("boom") }).await;
            assert!(matches!(res, Err(ExecuteError::Op(_))));
        }
        assert_eq!(breaker.get_state("k").await, State::Open);

        let res: Result<(), ExecuteError<&str>> = breaker.execute("k", || async { Ok(()) }).await;
        assert!(matches!(res, Err(ExecuteError::Open(_))));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(breaker.get_state("k").await, State::HalfOpen);

        for _ in 0..2 {
            let res: Result<(), ExecuteError<&str>> =
                breaker.execute("k", || async { Ok(()) }).await;
            assert!(res.is_ok());
        }
        assert_eq!(breaker.get_state("k").await, State::Closed);
        let stats = breaker.get_stats("k").await;
        assert_eq!(stats.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(50),
            half_open_requests: 3,
        })
        .unwrap();

        let _: Result<(), ExecuteError<&str>> =
            breaker.execute("k", || async { Err("boom") }).await;
        assert_eq!(breaker.get_state("k").await, State::Open);

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(breaker.get_state("k").await, State::HalfOpen);

        let _: Result<(), ExecuteError<&str>> =
            breaker.execute("k", || async { Err("boom again") }).await;
        assert_eq!(breaker.get_state("k").await, State::Open);
    }

    #[tokio::test]
    async fn pending_requests_never_negative_and_bounds_concurrency() {
        let breaker = Arc::new(
            CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: 100,
                reset_timeout: Duration::from_secs(1),
                half_open_requests: 1,
            })
            .unwrap(),
        );
        let concurrent = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let breaker = Arc::clone(&breaker);
            let concurrent = Arc::clone(&concurrent);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _: Result<(), ExecuteError<&str>> = breaker
                    .execute("k", || async {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let stats = breaker.get_stats("k").await;
        assert_eq!(stats.pending_requests, 0);
        assert_eq!(stats.successes, 8);
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(50),
            half_open_requests: 1,
        })
        .unwrap();
        let _: Result<(), ExecuteError<&str>> =
            breaker.execute("k", || async { Err("boom") }).await;
        assert_eq!(breaker.get_state("k").await, State::Open);

        breaker.reset(Some("k")).await;
        let stats = breaker.get_stats("k").await;
        assert_eq!(stats.state, State::Closed);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.successes, 0);
        assert_eq!(stats.consecutive_failures, 0);
    }

    #[test]
    fn rejects_invalid_config() {
        let err = CircuitBreakerConfig {
            failure_threshold: 0,
            reset_timeout: Duration::from_millis(10),
            half_open_requests: 1,
        }
        .validate();
        assert!(err.is_err());
    }
}
