//! Error types for circuit breaker operations
//!
//! Callers need to tell three situations apart:
//! - the breaker refused the call because the dependency is presumed down
//!   ([`CircuitOpenError`])
//! - the dependency was attempted but did not answer in time
//!   ([`CircuitTimeoutError`])
//! - the dependency was attempted and returned its own error
//!   ([`BreakerError::Operation`], carried unchanged)
//!
//! A blocking call that panics or is cancelled by runtime shutdown surfaces
//! as [`CallAbandonedError`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::error::Elapsed;

/// Result type alias for operations guarded by a circuit breaker
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// The circuit is open and the recovery window has not elapsed yet.
///
/// The operation was not invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit breaker '{name}' is open, next probe allowed in {remaining:?}")]
pub struct CircuitOpenError {
    /// Name of the breaker that rejected the call
    pub name: String,
    /// Time left until the next probe is allowed
    pub remaining: Duration,
    /// Configured recovery timeout of the breaker
    pub recovery_timeout: Duration,
    /// Wall-clock time of the failure that started the current window
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// The operation exceeded the configured call timeout.
///
/// Counted as a failure by the breaker.
#[derive(Error, Debug)]
#[error("Circuit breaker '{name}': operation timed out after {timeout:?}")]
pub struct CircuitTimeoutError {
    /// Name of the breaker that enforced the timeout
    pub name: String,
    /// Configured call timeout
    pub timeout: Duration,
    #[source]
    pub source: Elapsed,
}

/// A blocking operation panicked or was cancelled before returning.
///
/// Counted as a failure by the breaker.
#[derive(Error, Debug)]
#[error("Circuit breaker '{name}': blocking operation did not complete")]
pub struct CallAbandonedError {
    /// Name of the breaker that ran the call
    pub name: String,
    #[source]
    pub source: JoinError,
}

/// Errors raised while loading or validating breaker configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration text is not valid TOML for the expected schema
    #[error("Failed to parse circuit breaker config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configuration value is out of range
    #[error("Invalid config for breaker '{breaker}': {reason}")]
    Invalid { breaker: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(breaker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            breaker: breaker.into(),
            reason: reason.into(),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`](crate::CircuitBreaker::execute)
/// and [`CircuitBreaker::execute_blocking`](crate::CircuitBreaker::execute_blocking)
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Call rejected without running the operation
    Open(CircuitOpenError),
    /// Operation exceeded the call timeout
    Timeout(CircuitTimeoutError),
    /// Blocking operation panicked or was cancelled
    Abandoned(CallAbandonedError),
    /// Operation's own error, unchanged
    Operation(E),
}

impl<E> BreakerError<E> {
    /// Stable code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Open(_) => "CIRCUIT_OPEN",
            Self::Timeout(_) => "CIRCUIT_TIMEOUT",
            Self::Abandoned(_) => "CALL_ABANDONED",
            Self::Operation(_) => "OPERATION_FAILED",
        }
    }

    /// The breaker rejected the call without running it
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// The operation ran but exceeded its call timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The error was produced by the breaker itself rather than by the operation.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Operation(_))
    }

    /// Borrow the operation's error, if that is what this is
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Take the operation's error, if that is what this is
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<CircuitOpenError> for BreakerError<E> {
    fn from(error: CircuitOpenError) -> Self {
        Self::Open(error)
    }
}

impl<E> From<CircuitTimeoutError> for BreakerError<E> {
    fn from(error: CircuitTimeoutError) -> Self {
        Self::Timeout(error)
    }
}

impl<E> From<CallAbandonedError> for BreakerError<E> {
    fn from(error: CallAbandonedError) -> Self {
        Self::Abandoned(error)
    }
}

impl<E: std::fmt::Display> std::fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(e) => write!(f, "{}", e),
            Self::Timeout(e) => write!(f, "{}", e),
            Self::Abandoned(e) => write!(f, "{}", e),
            Self::Operation(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(_) => None,
            Self::Timeout(e) => Some(&e.source),
            Self::Abandoned(e) => Some(&e.source),
            Self::Operation(e) => e.source(),
        }
    }
}
