//! Circuit breaker types and configuration

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, operations proceed normally
    Closed,
    /// Circuit is open, operations are rejected
    Open,
    /// Circuit is half-open, calls are let through to probe recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

type ClassifierFn = dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync;

/// Decides which operation errors count as breaker failures.
///
/// Errors the classifier rejects are handed back to the caller without
/// touching breaker state, e.g. input validation errors that say nothing
/// about the health of the dependency.
#[derive(Clone)]
pub struct FailureClassifier(Arc<ClassifierFn>);

impl FailureClassifier {
    /// Count every error as a failure
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Classify with a custom predicate
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// Count every error except those of type `T`
    pub fn ignoring<T: Error + 'static>() -> Self {
        Self::new(|error| !error.is::<T>())
    }

    /// Count only errors of type `T`
    pub fn only<T: Error + 'static>() -> Self {
        Self::new(|error| error.is::<T>())
    }

    /// Whether `error` should be recorded as a failure
    pub fn is_failure(&self, error: &(dyn Error + 'static)) -> bool {
        (self.0)(error)
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::all()
    }
}

impl std::fmt::Debug for FailureClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureClassifier").finish_non_exhaustive()
    }
}

/// Configuration for circuit breaker behavior
///
/// Durations use humantime notation when (de)serialized:
///
/// ```toml
/// failure_threshold = 3
/// recovery_timeout = "60s"
/// success_threshold = 2
/// call_timeout = "5s"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in closed state that open the circuit
    pub failure_threshold: u32,
    /// Minimum time the circuit stays open before a probe is allowed
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    /// Consecutive successes in half-open state that close the circuit
    pub success_threshold: u32,
    /// Maximum time a single call may take
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Which errors count as failures
    #[serde(skip)]
    pub failure_classifier: FailureClassifier,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
            call_timeout: Duration::from_secs(30),
            failure_classifier: FailureClassifier::all(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a config for aggressive circuit breaking
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(15),
            success_threshold: 1,
            call_timeout: Duration::from_secs(10),
            failure_classifier: FailureClassifier::all(),
        }
    }

    /// Create a config for lenient circuit breaking
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(120),
            success_threshold: 3,
            call_timeout: Duration::from_secs(60),
            failure_classifier: FailureClassifier::all(),
        }
    }

    /// Set the consecutive failures that open the circuit
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open before a trial call
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Set the consecutive half-open successes that close the circuit
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the per-call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set which errors count as failures
    pub fn with_failure_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.failure_classifier = classifier;
        self
    }

    /// Check that every value is in range.
    ///
    /// `name` only labels the error.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid(name, "failure_threshold must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid(name, "success_threshold must be at least 1"));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::invalid(name, "call_timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Clamp out-of-range values so the state machine stays well defined
    pub(crate) fn normalized(mut self, name: &str) -> Self {
        if let Err(e) = self.validate(name) {
            tracing::warn!(circuit = %name, error = %e, "Clamping invalid circuit breaker config");
            self.failure_threshold = self.failure_threshold.max(1);
            self.success_threshold = self.success_threshold.max(1);
            if self.call_timeout.is_zero() {
                self.call_timeout = Duration::from_millis(1);
            }
        }
        self
    }
}

/// Point-in-time statistics for a circuit breaker
///
/// Every field is read under the same lock, so a snapshot never mixes values
/// from before and after a transition.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Failures caused by the call timeout (also counted in `total_failures`)
    pub total_timeouts: u64,
    pub total_rejected_while_open: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// `total_successes / max(total_calls, 1)`
    pub success_rate: f64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    /// Remaining open dwell before the next probe; `None` unless open
    #[serde(with = "humantime_serde")]
    pub time_until_probe: Option<Duration>,
    pub config: CircuitBreakerConfig,
}

impl CircuitBreakerStats {
    /// Calculate failure rate as a percentage
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            (self.total_failures as f64 / self.total_calls as f64) * 100.0
        }
    }
}
