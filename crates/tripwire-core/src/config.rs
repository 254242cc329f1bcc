//! Registry configuration
//!
//! Applications typically keep breaker settings next to the rest of their
//! service config and hand the relevant table to [`RegistryConfig::from_toml_str`]:
//!
//! ```toml
//! [defaults]
//! failure_threshold = 5
//! recovery_timeout = "60s"
//!
//! [breakers.tts]
//! failure_threshold = 3
//! call_timeout = "5s"
//! ```
//!
//! An override only needs the fields it changes: the rest are taken from the
//! `[defaults]` table, and anything missing there from the built-in defaults.
//! Above, `tts` ends up with `recovery_timeout = "60s"` from `[defaults]`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::ConfigError;

/// Defaults plus per-breaker overrides for a [`CircuitBreakerRegistry`](crate::CircuitBreakerRegistry)
///
/// Each entry in `breakers` is a complete config. [`from_toml_str`](Self::from_toml_str)
/// builds those entries by layering the override table over `[defaults]`;
/// [`with_breaker`](Self::with_breaker) stores the given config as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Config for breakers without an override
    pub defaults: CircuitBreakerConfig,
    /// Overrides keyed by breaker name
    pub breakers: HashMap<String, CircuitBreakerConfig>,
}

/// Document shape before overrides are layered over the defaults
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRegistryConfig {
    defaults: toml::Table,
    breakers: HashMap<String, toml::Table>,
}

impl RegistryConfig {
    /// Parse and validate a TOML document
    ///
    /// Fields an override leaves out are inherited from `[defaults]`.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RawRegistryConfig = toml::from_str(input)?;

        let defaults: CircuitBreakerConfig = raw.defaults.clone().try_into()?;
        let mut breakers = HashMap::with_capacity(raw.breakers.len());
        for (name, overrides) in raw.breakers {
            let mut merged = raw.defaults.clone();
            merged.extend(overrides);
            breakers.insert(name, merged.try_into()?);
        }

        let config = Self { defaults, breakers };
        config.validate()?;
        Ok(config)
    }

    /// Replace the config used for breakers without an override
    pub fn with_defaults(mut self, defaults: CircuitBreakerConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Register a complete config for the breaker named `name`
    pub fn with_breaker(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.breakers.insert(name.into(), config);
        self
    }

    /// Config a newly created breaker named `name` should use
    pub fn config_for(&self, name: &str) -> &CircuitBreakerConfig {
        self.breakers.get(name).unwrap_or(&self.defaults)
    }

    /// Validate the defaults and every override
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.defaults.validate("defaults")?;
        for (name, config) in &self.breakers {
            config.validate(name)?;
        }
        Ok(())
    }
}
