use thiserror::Error;

/// Errors produced by [`super::CircuitBreakerConfig::validate`] and
/// [`super::CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    /// Construction-time validation failure (bad threshold, zero timeout, ...).
    #[error("invalid circuit breaker config: {0}")]
    ConfigInvalid(String),

    /// Admission denied for `key` — the circuit is open, or half-open and
    /// out of probe quota, or closed but pre-emptively shedding.
    #[error("circuit '{0}' is open")]
    CircuitOpen(String),
}

/// Configuration for one [`super::CircuitBreaker`] key-space.
///
/// All circuits created under a single `CircuitBreaker` share this
/// configuration; there are no per-key overrides.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (in `Closed`) before the circuit opens.
    pub failure_threshold: u32,
    /// Time a circuit stays `Open` before probing with a `HalfOpen` attempt.
    pub reset_timeout: std::time::Duration,
    /// Successful admissions required in `HalfOpen` before closing.
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: std::time::Duration::from_millis(60_000),
            half_open_requests: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate the bounds required at construction time.
    pub fn validate(&self) -> Result<(), CircuitBreakerError> {
        if self.failure_threshold < 1 {
            return Err(CircuitBreakerError::ConfigInvalid(
                "failure_threshold must be >= 1".to_string(),
            ));
        }
        if self.reset_timeout.is_zero() {
            return Err(CircuitBreakerError::ConfigInvalid(
                "reset_timeout must be > 0".to_string(),
            ));
        }
        if self.half_open_requests < 1 {
            return Err(CircuitBreakerError::ConfigInvalid(
                "half_open_requests must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
