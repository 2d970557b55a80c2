//! Circuit breaker for storage calls
//!
//! The breaker has three states:
//! - Closed: calls pass through, consecutive failures are counted
//! - Open: calls are rejected without touching storage until `reset_timeout` has
//!   passed since the last failure
//! - HalfOpen: a single probe call at a time is admitted; enough consecutive probe
//!   successes close the circuit, any probe failure opens it again
//!
//! State sits behind a `parking_lot::Mutex` that is only taken to admit a call and to
//! record its outcome, never across an `.await`. A call whose future is dropped before
//! completing records nothing; if it held the half-open probe slot the slot is freed.

use super::FileGateway;
use crate::error::{CircuitOpenError, FileSystemError, GatewayError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Consecutive half-open successes before closing
    pub success_threshold: u32,
    /// Upper bound for a single call
    pub timeout: Duration,
    /// Time after the last failure before a probe is allowed
    pub reset_timeout: Duration,
    /// Failures further apart than this do not accumulate
    pub failure_window: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(30),
            failure_window: Some(Duration::from_secs(60)),
        }
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub since_last_failure: Option<Duration>,
}

impl CircuitStats {
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_calls as f64
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
            probe_in_flight: false,
            total_calls: 0,
            total_failures: 0,
            rejected_calls: 0,
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, moving Open to HalfOpen if the reset timeout has passed
    pub fn state(&self) -> CircuitState {
        let mut inner = self.state.lock();
        self.refresh_open(&mut inner, Instant::now());
        inner.state
    }

    pub fn stats(&self) -> CircuitStats {
        let mut inner = self.state.lock();
        let now = Instant::now();
        self.refresh_open(&mut inner, now);
        CircuitStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
            since_last_failure: inner.last_failure.map(|at| now.duration_since(at)),
        }
    }

    /// Force the circuit closed and clear all counters
    pub fn reset(&self) {
        let mut inner = self.state.lock();
        *inner = BreakerState::new();
        info!(circuit = %self.name, "Circuit breaker reset");
    }

    fn refresh_open(&self, inner: &mut BreakerState, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .last_failure
            .map(|at| now.duration_since(at))
            .unwrap_or(self.config.reset_timeout);
        if elapsed >= self.config.reset_timeout {
            info!(circuit = %self.name, "Circuit breaker entering half-open state");
            inner.state = CircuitState::HalfOpen;
            inner.consecutive_successes = 0;
            inner.probe_in_flight = false;
        }
    }

    /// Admit a call or reject it with the time left before the next attempt
    pub fn acquire(&self) -> Result<Permit<'_>, CircuitOpenError> {
        let mut inner = self.state.lock();
        let now = Instant::now();
        self.refresh_open(&mut inner, now);

        match inner.state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::Open => {
                inner.rejected_calls += 1;
                let elapsed = inner
                    .last_failure
                    .map(|at| now.duration_since(at))
                    .unwrap_or_default();
                Err(self.rejection(self.config.reset_timeout.saturating_sub(elapsed)))
            }
            CircuitState::HalfOpen if inner.probe_in_flight => {
                inner.rejected_calls += 1;
                Err(self.rejection(self.config.timeout))
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = true;
                debug!(circuit = %self.name, "Admitting half-open probe");
                Ok(Permit::new(self, true))
            }
        }
    }

    fn rejection(&self, retry_after: Duration) -> CircuitOpenError {
        CircuitOpenError {
            circuit: self.name.clone(),
            retry_after,
        }
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.state.lock();
        inner.total_calls += 1;
        if probe {
            inner.probe_in_flight = false;
        }

        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if probe => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    info!(circuit = %self.name, "Circuit breaker closed");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                }
            }
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.state.lock();
        let now = Instant::now();
        inner.total_calls += 1;
        inner.total_failures += 1;
        if probe {
            inner.probe_in_flight = false;
        }

        match inner.state {
            CircuitState::Closed => {
                if let (Some(window), Some(last)) = (self.config.failure_window, inner.last_failure) {
                    if now.duration_since(last) > window {
                        inner.consecutive_failures = 0;
                    }
                }
                inner.consecutive_failures += 1;
                inner.last_failure = Some(now);

                debug!(
                    circuit = %self.name,
                    failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );

                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit breaker opened"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen if probe => {
                warn!(circuit = %self.name, "Half-open probe failed, reopening circuit");
                inner.state = CircuitState::Open;
                inner.consecutive_successes = 0;
                inner.last_failure = Some(now);
            }
            _ => inner.last_failure = Some(now),
        }
    }

    /// Run `fut` under the breaker with the configured timeout
    pub async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        let permit = self.acquire()?;

        match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(err)) => {
                if is_storage_failure(&err) {
                    permit.failure();
                } else {
                    permit.success();
                }
                Err(err)
            }
            Err(_) => {
                permit.failure();
                Err(GatewayError::Timeout {
                    operation: operation.to_string(),
                    after: self.config.timeout,
                })
            }
        }
    }
}

// A missing file is a valid answer from healthy storage
fn is_storage_failure(err: &GatewayError) -> bool {
    !matches!(err, GatewayError::FileSystem(FileSystemError::NotFound { .. }))
}

/// Admission ticket for one call; report its outcome with [`Permit::success`] or
/// [`Permit::failure`]. Dropping it unreported records nothing.
#[must_use]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    reported: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            reported: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.reported = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.reported && self.probe {
            self.breaker.state.lock().probe_in_flight = false;
        }
    }
}

/// [`FileGateway`] that routes every call of `G` through a [`CircuitBreaker`]
pub struct CircuitBreakerGateway<G> {
    inner: G,
    breaker: Arc<CircuitBreaker>,
}

impl<G: FileGateway> CircuitBreakerGateway<G> {
    pub fn new(inner: G, config: CircuitBreakerConfig) -> Self {
        Self::with_breaker(inner, Arc::new(CircuitBreaker::new("file-system", config)))
    }

    pub fn with_breaker(inner: G, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl<G: FileGateway> FileGateway for CircuitBreakerGateway<G> {
    async fn exists(&self, path: &Path) -> Result<bool, GatewayError> {
        self.breaker.call("exists", self.inner.exists(path)).await
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<String>, GatewayError> {
        self.breaker.call("list_directory", self.inner.list_directory(path)).await
    }

    async fn read_file(&self, path: &Path) -> Result<String, GatewayError> {
        self.breaker.call("read_file", self.inner.read_file(path)).await
    }

    async fn read_first_line(&self, path: &Path) -> Result<Option<String>, GatewayError> {
        self.breaker.call("read_first_line", self.inner.read_first_line(path)).await
    }

    async fn file_size(&self, path: &Path) -> Result<u64, GatewayError> {
        self.breaker.call("file_size", self.inner.file_size(path)).await
    }
}
