use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::config::{CircuitBreakerConfig, CircuitBreakerError};

/// One of the three states a circuit can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

/// Error wrapper returned by [`CircuitBreaker::execute`]: either admission
/// was denied, or the wrapped operation itself failed.
#[derive(Debug)]
pub enum ExecuteError<E> {
    /// Admission was denied — the breaker's own `CircuitOpen` error.
    Open(CircuitBreakerError),
    /// The operation ran and returned an error.
    Op(E),
}

impl<E: std::fmt::Display> std::fmt::Display for ExecuteError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecuteError::Open(e) => write!(f, "{e}"),
            ExecuteError::Op(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for ExecuteError<E> {}

/// Snapshot of one circuit's counters, safe to serialize out to callers.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub key: String,
    pub state: State,
    pub failures: u64,
    pub successes: u64,
    pub consecutive_failures: u32,
    pub pending_requests: u32,
    pub half_open_attempts: u32,
    pub total_requests: u64,
}

/// Mutable per-key state. Guarded by a single `RwLock` so admission,
/// accounting, and timer firing observe a total order per key, as §5
/// requires.
struct Inner {
    state: State,
    failures: u64,
    successes: u64,
    consecutive_failures: u32,
    pending_requests: u32,
    half_open_attempts: u32,
    last_failure_time: Option<Instant>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: State::Closed,
            failures: 0,
            successes: 0,
            consecutive_failures: 0,
            pending_requests: 0,
            half_open_attempts: 0,
            last_failure_time: None,
        }
    }
}

struct Circuit {
    key: String,
    inner: RwLock<Inner>,
    reset_timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Circuit {
    fn new(key: String) -> Arc<Self> {
        Arc::new(Self {
            key,
            inner: RwLock::new(Inner::new()),
            reset_timer: Mutex::new(None),
        })
    }

    async fn cancel_timer(&self) {
        if let Some(handle) = self.reset_timer.lock().await.take() {
            handle.abort();
        }
    }

    /// Arm (replacing any existing) the reset timer. After `reset_timeout`
    /// elapses, if the circuit is still `Open`, transition to `HalfOpen`.
    async fn arm_reset_timer(self: &Arc<Self>, reset_timeout: Duration) {
        let mut slot = self.reset_timer.lock().await;
        if let Some(old) = slot.take() {
            old.abort();
        }
        let circuit = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(reset_timeout).await;
            let mut inner = circuit.inner.write().await;
            if inner.state == State::Open {
                inner.state = State::HalfOpen;
                inner.half_open_attempts = 0;
                debug!(key = %circuit.key, "circuit breaker timer fired, transitioning to half-open");
            }
            *circuit.reset_timer.lock().await = None;
        });
        *slot = Some(handle);
    }
}

/// A per-key fault isolator. One `CircuitBreaker` owns many keyed circuits,
/// created lazily on first use, matching the `RateLimiter` per-client
/// keying pattern this crate is grounded on.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: DashMap<String, Arc<Circuit>>,
}

impl CircuitBreaker {
    /// Construct a breaker, validating `config` up front.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, CircuitBreakerError> {
        config.validate()?;
        Ok(Self {
            config,
            circuits: DashMap::new(),
        })
    }

    fn circuit_for(&self, key: &str) -> Arc<Circuit> {
        if let Some(existing) = self.circuits.get(key) {
            return Arc::clone(&existing);
        }
        self.circuits
            .entry(key.to_string())
            .or_insert_with(|| Circuit::new(key.to_string()))
            .clone()
    }

    /// The only admission path. Runs `op` if admitted; accounts success or
    /// failure on resolution and re-raises the operation's error.
    pub async fn execute<F, Fut, T, E>(&self, key: &str, op: F) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let circuit = self.circuit_for(key);

        {
            let mut inner = circuit.inner.write().await;
            match inner.state {
                State::Open => {
                    return Err(ExecuteError::Open(CircuitBreakerError::CircuitOpen(
                        key.to_string(),
                    )));
                }
                State::HalfOpen => {
                    if inner.half_open_attempts >= self.config.half_open_requests {
                        return Err(ExecuteError::Open(CircuitBreakerError::CircuitOpen(
                            key.to_string(),
                        )));
                    }
                }
                State::Closed => {
                    if inner.consecutive_failures + inner.pending_requests
                        >= self.config.failure_threshold
                    {
                        return Err(ExecuteError::Open(CircuitBreakerError::CircuitOpen(
                            key.to_string(),
                        )));
                    }
                }
            }
            inner.pending_requests += 1;
        }

        let result = op().await;

        {
            let mut inner = circuit.inner.write().await;
            inner.pending_requests = inner.pending_requests.saturating_sub(1);
        }

        match result {
            Ok(value) => {
                self.record_success(&circuit).await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure(&circuit).await;
                Err(ExecuteError::Op(err))
            }
        }
    }

    async fn record_success(&self, circuit: &Arc<Circuit>) {
        let mut inner = circuit.inner.write().await;
        inner.successes += 1;
        match inner.state {
            State::HalfOpen => {
                inner.half_open_attempts += 1;
                if inner.half_open_attempts >= self.config.half_open_requests {
                    inner.state = State::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_attempts = 0;
                    inner.last_failure_time = None;
                    debug!(key = %circuit.key, "circuit breaker closed after half-open probes succeeded");
                    drop(inner);
                    circuit.cancel_timer().await;
                }
            }
            State::Closed => {
                inner.consecutive_failures = 0;
            }
            State::Open => {}
        }
    }

    async fn record_failure(&self, circuit: &Arc<Circuit>) {
        let mut arm_timeout = None;
        {
            let mut inner = circuit.inner.write().await;
            inner.failures += 1;
            inner.consecutive_failures += 1;
            inner.last_failure_time = Some(Instant::now());

            match inner.state {
                State::HalfOpen => {
                    inner.state = State::Open;
                    inner.half_open_attempts = 0;
                    warn!(key = %circuit.key, "circuit breaker reopened after half-open failure");
                    arm_timeout = Some(self.config.reset_timeout);
                }
                State::Closed => {
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.state = State::Open;
                        warn!(
                            key = %circuit.key,
                            consecutive_failures = inner.consecutive_failures,
                            "circuit breaker opened after consecutive failures"
                        );
                        arm_timeout = Some(self.config.reset_timeout);
                    }
                }
                State::Open => {}
            }
        }
        if let Some(timeout) = arm_timeout {
            circuit.arm_reset_timer(timeout).await;
        }
    }

    /// Current state of `key`, creating it (as `Closed`) if unseen.
    pub async fn get_state(&self, key: &str) -> State {
        self.circuit_for(key).inner.read().await.state
    }

    /// Snapshot of `key`'s counters.
    pub async fn get_stats(&self, key: &str) -> CircuitStats {
        let circuit = self.circuit_for(key);
        let inner = circuit.inner.read().await;
        CircuitStats {
            key: key.to_string(),
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            consecutive_failures: inner.consecutive_failures,
            pending_requests: inner.pending_requests,
            half_open_attempts: inner.half_open_attempts,
            total_requests: inner.failures + inner.successes,
        }
    }

    /// Snapshot of every circuit ever touched.
    pub async fn get_all_stats(&self) -> Vec<CircuitStats> {
        let keys: Vec<String> = self.circuits.iter().map(|e| e.key().clone()).collect();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get_stats(&key).await);
        }
        out
    }

    /// Delete state and cancel the timer for `key`, or for every key when
    /// `key` is `None`.
    pub async fn reset(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                if let Some((_, circuit)) = self.circuits.remove(key) {
                    circuit.cancel_timer().await;
                }
            }
            None => {
                let all: Vec<Arc<Circuit>> =
                    self.circuits.iter().map(|e| Arc::clone(e.value())).collect();
                self.circuits.clear();
                for circuit in all {
                    circuit.cancel_timer().await;
                }
            }
        }
    }
}
