//! Circuit breaker registry for managing multiple circuit breakers

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::breaker::CircuitBreaker;
use super::types::{CircuitBreakerConfig, CircuitBreakerStats};
use crate::config::RegistryConfig;

static GLOBAL_REGISTRY: Lazy<CircuitBreakerRegistry> = Lazy::new(CircuitBreakerRegistry::new);

/// Collection of named circuit breakers, one per protected dependency
///
/// Each name maps to exactly one breaker for the registry's lifetime. The
/// first caller to ask for a name decides its configuration; later callers
/// get the same instance and their config is ignored.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: RegistryConfig,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry that hands out default-configured breakers
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom defaults and per-name overrides
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// The process-wide registry.
    ///
    /// Created empty on first access and never torn down. Fetch it once at the
    /// composition root and pass it down rather than calling this everywhere.
    pub fn global() -> &'static CircuitBreakerRegistry {
        &GLOBAL_REGISTRY
    }

    /// Get or create the breaker for `name`
    ///
    /// A new breaker uses `config` if given, else the registry's override for
    /// `name`, else the registry defaults. Concurrent first calls for the same
    /// name all receive the single instance that won the insert.
    pub fn get_or_create(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = config.unwrap_or_else(|| self.config.config_for(name).clone());
                tracing::debug!(circuit = %name, "Registering circuit breaker");
                Arc::new(CircuitBreaker::with_config(name, config))
            })
            .clone()
    }

    /// Get or create a breaker using the registry's configuration
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create(name, None)
    }

    /// Look up an existing breaker without creating one
    pub fn lookup(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Get all circuit breaker names
    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered breakers
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker has been registered yet
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Get stats for all circuit breakers, keyed by name
    pub fn get_all_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        self.snapshot()
            .into_iter()
            .map(|(name, breaker)| (name, breaker.get_stats()))
            .collect()
    }

    /// Reset every registered breaker; membership is unchanged
    pub fn reset_all(&self) {
        for (_, breaker) in self.snapshot() {
            breaker.reset();
        }
        tracing::info!(count = self.breakers.len(), "Reset all circuit breakers");
    }

    /// Clone the entries out so no map shard is held while a breaker is locked
    fn snapshot(&self) -> Vec<(String, Arc<CircuitBreaker>)> {
        self.breakers
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.names())
            .field("config", &self.config)
            .finish()
    }
}
