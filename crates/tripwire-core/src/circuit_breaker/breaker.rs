//! Circuit breaker implementation

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio::time::error::Elapsed;

use super::types::{CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
use crate::error::{
    BreakerError, BreakerResult, CallAbandonedError, CircuitOpenError, CircuitTimeoutError,
};

/// Circuit breaker for protecting against failing dependencies
///
/// State, consecutive counters, timestamps and lifetime totals live behind a
/// single lock. Admission (including the open -> half-open probe decision) and
/// outcome recording each take the lock once, so concurrent callers can never
/// both cross a threshold or observe a half-applied transition.
pub struct CircuitBreaker {
    /// Dependency name (for logging and registry lookup)
    name: String,
    /// Configuration, fixed for the breaker's lifetime
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

#[derive(Debug, Default)]
struct CallTotals {
    calls: u64,
    successes: u64,
    failures: u64,
    timeouts: u64,
    rejected: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Only meaningful while closed
    consecutive_failures: u32,
    /// Only meaningful while half-open
    consecutive_successes: u32,
    /// Gates the open -> half-open transition
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    totals: CallTotals,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
            last_failure_at: None,
            last_success_at: None,
            totals: CallTotals::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Timeout,
    /// The call was dropped, panicked or cancelled before an outcome was known
    Abandoned,
}

/// Admission ticket for one call.
///
/// Consumed by exactly one of `record`/`release`; if it is dropped unconsumed
/// the call counts as a failure.
struct CallPermit<'a> {
    breaker: Option<&'a CircuitBreaker>,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker: Some(breaker),
        }
    }

    fn record(mut self, outcome: Outcome) {
        if let Some(breaker) = self.breaker.take() {
            breaker.record(outcome);
        }
    }

    /// Settle the call without touching breaker state
    fn release(mut self) {
        self.breaker = None;
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if let Some(breaker) = self.breaker.take() {
            tracing::debug!(circuit = %breaker.name, "Call abandoned before completion");
            breaker.record(Outcome::Abandoned);
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default config
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom config
    ///
    /// Zero thresholds and a zero call timeout are clamped to their minimum
    /// with a warning; use [`CircuitBreakerConfig::validate`] to reject them instead.
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        let config = config.normalized(&name);
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Get the dependency name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the normalized configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current stored state.
    ///
    /// An open breaker whose recovery window has elapsed still reports
    /// `Open` here; it moves to half-open when the next call arrives.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// The operation is not invoked when the circuit is open. Otherwise it runs
    /// under the configured call timeout and its outcome is recorded once:
    ///
    /// - `Ok` is recorded as a success and returned.
    /// - An error the failure classifier accepts is recorded as a failure and
    ///   returned unchanged as [`BreakerError::Operation`].
    /// - An error the classifier rejects is returned the same way but leaves
    ///   breaker state untouched.
    /// - A timeout drops the operation future, is recorded as a failure and
    ///   returned as [`BreakerError::Timeout`].
    ///
    /// If the returned future is dropped mid-call, the call is recorded as a
    /// failure.
    ///
    /// The timeout only fires at an `.await` point. Synchronous or blocking
    /// work must go through [`execute_blocking`](Self::execute_blocking)
    /// instead of being wrapped in an `async` block.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let permit = self.admit()?;

        match tokio::time::timeout(self.config.call_timeout, operation()).await {
            Ok(result) => self.settle(permit, result),
            Err(elapsed) => {
                permit.record(Outcome::Timeout);
                Err(self.timeout_error(elapsed).into())
            }
        }
    }

    /// Execute a synchronous operation on tokio's blocking pool
    ///
    /// Admission, the call timeout and outcome recording work as in
    /// [`execute`](Self::execute). When the timeout fires the call is recorded
    /// as a timeout straight away; the closure keeps running on its blocking
    /// thread and whatever it eventually returns is discarded. A panic in the
    /// closure is recorded as a failure and returned as
    /// [`BreakerError::Abandoned`].
    pub async fn execute_blocking<T, E, F>(&self, operation: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        let permit = self.admit()?;
        let handle = tokio::task::spawn_blocking(operation);

        match tokio::time::timeout(self.config.call_timeout, handle).await {
            Ok(Ok(result)) => self.settle(permit, result),
            Ok(Err(join_error)) => {
                tracing::debug!(
                    circuit = %self.name,
                    panicked = join_error.is_panic(),
                    "Blocking call did not complete"
                );
                permit.record(Outcome::Abandoned);
                Err(CallAbandonedError {
                    name: self.name.clone(),
                    source: join_error,
                }
                .into())
            }
            Err(elapsed) => {
                // Dropping the handle detaches the blocking task
                permit.record(Outcome::Timeout);
                Err(self.timeout_error(elapsed).into())
            }
        }
    }

    /// Get circuit breaker statistics
    pub fn get_stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        let time_until_probe = match inner.state {
            CircuitState::Open => Some(self.remaining_open(&inner).unwrap_or(Duration::ZERO)),
            _ => None,
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            total_calls: inner.totals.calls,
            total_successes: inner.totals.successes,
            total_failures: inner.totals.failures,
            total_timeouts: inner.totals.timeouts,
            total_rejected_while_open: inner.totals.rejected,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            success_rate: inner.totals.successes as f64 / inner.totals.calls.max(1) as f64,
            last_failure_time: inner.last_failure_at,
            last_success_time: inner.last_success_at,
            time_until_probe,
            config: self.config.clone(),
        }
    }

    /// Manually reset the circuit breaker to closed state
    ///
    /// Lifetime totals and timestamps are kept.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(
                circuit = %self.name,
                from = %inner.state,
                "Circuit breaker manually reset"
            );
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
    }

    /// Record the operation's own result
    fn settle<T, E>(&self, permit: CallPermit<'_>, result: Result<T, E>) -> BreakerResult<T, E>
    where
        E: std::error::Error + 'static,
    {
        match result {
            Ok(value) => {
                permit.record(Outcome::Success);
                Ok(value)
            }
            Err(error) => {
                if self.config.failure_classifier.is_failure(&error) {
                    permit.record(Outcome::Failure);
                } else {
                    tracing::debug!(
                        circuit = %self.name,
                        error = %error,
                        "Passing through error not classified as failure"
                    );
                    permit.release();
                }
                Err(BreakerError::Operation(error))
            }
        }
    }

    /// Decide whether a call may run, probing if the recovery window elapsed
    fn admit(&self) -> Result<CallPermit<'_>, CircuitOpenError> {
        let mut inner = self.inner.lock();
        inner.totals.calls += 1;

        if inner.state == CircuitState::Open {
            if let Some(remaining) = self.remaining_open(&inner) {
                inner.totals.rejected += 1;
                tracing::debug!(
                    circuit = %self.name,
                    remaining_ms = remaining.as_millis() as u64,
                    "Rejecting call while circuit is open"
                );
                return Err(CircuitOpenError {
                    name: self.name.clone(),
                    remaining,
                    recovery_timeout: self.config.recovery_timeout,
                    last_failure_at: inner.last_failure_at,
                });
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
        }

        Ok(CallPermit::new(self))
    }

    /// Time left in the recovery window, `None` once a probe is allowed
    fn remaining_open(&self, inner: &BreakerInner) -> Option<Duration> {
        let last_failure = inner.last_failure?;
        let remaining = self
            .config
            .recovery_timeout
            .saturating_sub(last_failure.elapsed());
        (!remaining.is_zero()).then_some(remaining)
    }

    fn record(&self, outcome: Outcome) {
        let mut inner = self.inner.lock();
        match outcome {
            Outcome::Success => self.on_success(&mut inner),
            Outcome::Failure | Outcome::Abandoned => self.on_failure(&mut inner),
            Outcome::Timeout => {
                inner.totals.timeouts += 1;
                tracing::debug!(
                    circuit = %self.name,
                    timeout_ms = self.config.call_timeout.as_millis() as u64,
                    "Call timed out"
                );
                self.on_failure(&mut inner);
            }
        }
    }

    fn on_success(&self, inner: &mut BreakerInner) {
        inner.totals.successes += 1;
        inner.last_success_at = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                // Late result of a call admitted before the circuit opened
            }
        }
    }

    fn on_failure(&self, inner: &mut BreakerInner) {
        inner.totals.failures += 1;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open state opens the circuit again
                self.transition(inner, CircuitState::Open);
            }
            CircuitState::Open => {
                // Already open; the refreshed timestamp pushes back the next probe
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }

        let failures = inner.consecutive_failures;
        inner.state = to;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;

        match to {
            CircuitState::Open => tracing::warn!(
                circuit = %self.name,
                %from,
                %to,
                consecutive_failures = failures,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => tracing::info!(
                circuit = %self.name,
                %from,
                %to,
                "Circuit breaker transitioning to half-open"
            ),
            CircuitState::Closed => tracing::info!(
                circuit = %self.name,
                %from,
                %to,
                "Circuit breaker closed"
            ),
        }
    }

    fn timeout_error(&self, elapsed: Elapsed) -> CircuitTimeoutError {
        CircuitTimeoutError {
            name: self.name.clone(),
            timeout: self.config.call_timeout,
            source: elapsed,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}
