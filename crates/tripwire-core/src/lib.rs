//! Tripwire Core Library
//!
//! Named circuit breakers for async services. A caller fetches the breaker for
//! a dependency from a [`CircuitBreakerRegistry`] and runs each call through
//! [`CircuitBreaker::execute`]:
//!
//! ```no_run
//! use std::time::Duration;
//! use tripwire_core::{CircuitBreakerConfig, CircuitBreakerRegistry};
//!
//! # async fn synthesize(_: &str) -> Result<Vec<u8>, std::io::Error> { Ok(Vec::new()) }
//! # async fn run() {
//! let registry = CircuitBreakerRegistry::new();
//! let config = CircuitBreakerConfig::default().with_call_timeout(Duration::from_secs(5));
//! let breaker = registry.get_or_create("tts", Some(config));
//!
//! match breaker.execute(|| synthesize("hello")).await {
//!     Ok(audio) => println!("{} bytes", audio.len()),
//!     Err(e) if e.is_open() => println!("tts unavailable: {e}"),
//!     Err(e) => println!("tts failed: {e}"),
//! }
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats,
    CircuitState, FailureClassifier,
};
pub use config::RegistryConfig;
pub use error::{
    BreakerError, BreakerResult, CallAbandonedError, CircuitOpenError, CircuitTimeoutError,
    ConfigError,
};
