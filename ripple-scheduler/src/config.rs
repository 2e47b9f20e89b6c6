//! Scheduler configuration.

use std::time::Duration;

use ripple_core::ConfigError;

use crate::constants::{
    DEFAULT_RESET_JITTER_SECS, DEVELOPMENT_RESET_JITTER_SECS, ENV_LOG_FAILURES,
    ENV_RESET_JITTER_SECS,
};

/// Configuration shared by the refresh and watermark-reset tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound of the random delay applied before each cron-triggered
    /// watermark reset (default: 60 seconds)
    pub reset_jitter: Duration,

    /// Whether failed scheduled cycles are logged at error level
    /// (default: true)
    pub log_failures: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reset_jitter: Duration::from_secs(DEFAULT_RESET_JITTER_SECS),
            log_failures: true,
        }
    }
}

impl SchedulerConfig {
    /// Create a new scheduler config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create SchedulerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `RIPPLE_RESET_JITTER_SECS`: Max random delay before a watermark reset (default: 60)
    /// - `RIPPLE_LOG_FAILURES`: Whether to log failed cycles at error level (default: true)
    ///
    /// Unset variables take their defaults. A set but unparsable value is an
    /// error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let reset_jitter = match lookup(ENV_RESET_JITTER_SECS) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                field: ENV_RESET_JITTER_SECS.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_RESET_JITTER_SECS,
        };

        let log_failures = match lookup(ENV_LOG_FAILURES) {
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: ENV_LOG_FAILURES.to_string(),
                        value: raw,
                        reason: "expected a boolean".to_string(),
                    })
                }
            },
            None => true,
        };

        Ok(Self {
            reset_jitter: Duration::from_secs(reset_jitter),
            log_failures,
        })
    }

    /// Configuration for development and tests: resets fire on the dot.
    pub fn development() -> Self {
        Self {
            reset_jitter: Duration::from_secs(DEVELOPMENT_RESET_JITTER_SECS),
            log_failures: true,
        }
    }

    /// Configuration for production fleets.
    pub fn production() -> Self {
        Self {
            reset_jitter: Duration::from_secs(DEFAULT_RESET_JITTER_SECS),
            log_failures: true,
        }
    }

    /// Set the reset jitter.
    pub fn with_reset_jitter(mut self, jitter: Duration) -> Self {
        self.reset_jitter = jitter;
        self
    }

    /// Enable or disable error-level logging of failed cycles.
    pub fn with_log_failures(mut self, enabled: bool) -> Self {
        self.log_failures = enabled;
        self
    }
}
