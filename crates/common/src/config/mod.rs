//! Serializable settings for the resilience primitives
//!
//! Settings structs mirror the builders field for field but use plain,
//! file-friendly types: delays in (fractional) seconds for retry policies,
//! milliseconds for timeout guards, and snake_case [`ErrorKind`] names.
//! Every field has a default, so a settings file only needs to name what it
//! changes. Conversion into the runtime types goes through the builders and
//! therefore applies exactly the same validation.
//!
//! ```toml
//! [retry]
//! max_attempts = 5
//! initial_delay_secs = 0.5
//! delay_ceiling_secs = 8.0
//! reraise_on = ["permission_denied"]
//!
//! [timeout]
//! deadline = 30000
//! force_kill = true
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigResult, ConfigurationError, ErrorKind};
use crate::resilience::retry::{
    RetryPolicy, DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS,
};
use crate::utils::serde::duration_millis;

/// Retry policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_secs: f64,
    pub backoff_factor: f64,
    /// Zero disables the ceiling
    pub delay_ceiling_secs: f64,
    pub reraise_on: Vec<ErrorKind>,
    pub suppress_on: Vec<ErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_secs: DEFAULT_INITIAL_DELAY.as_secs_f64(),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            delay_ceiling_secs: 0.0,
            reraise_on: Vec::new(),
            suppress_on: Vec::new(),
        }
    }
}

impl RetrySettings {
    /// Parse settings from a TOML document holding the fields at top level
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Validate and convert into a [`RetryPolicy`]
    pub fn to_policy(&self) -> ConfigResult<RetryPolicy> {
        RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .initial_delay_secs(self.initial_delay_secs)
            .backoff_factor(self.backoff_factor)
            .delay_ceiling_secs(self.delay_ceiling_secs)
            .reraise_on(self.reraise_on.iter().copied())
            .suppress_on(self.suppress_on.iter().copied())
            .build()
    }
}

impl TryFrom<RetrySettings> for RetryPolicy {
    type Error = ConfigurationError;

    fn try_from(settings: RetrySettings) -> ConfigResult<Self> {
        settings.to_policy()
    }
}

impl TryFrom<&RetrySettings> for RetryPolicy {
    type Error = ConfigurationError;

    fn try_from(settings: &RetrySettings) -> ConfigResult<Self> {
        settings.to_policy()
    }
}

impl From<&RetryPolicy> for RetrySettings {
    fn from(policy: &RetryPolicy) -> Self {
        let mut reraise_on: Vec<_> = policy.reraise_on().iter().copied().collect();
        let mut suppress_on: Vec<_> = policy.suppress_on().iter().copied().collect();
        reraise_on.sort();
        suppress_on.sort();

        Self {
            max_attempts: policy.max_attempts(),
            initial_delay_secs: policy.initial_delay().as_secs_f64(),
            backoff_factor: policy.backoff_factor(),
            delay_ceiling_secs: policy.delay_ceiling().as_secs_f64(),
            reraise_on,
            suppress_on,
        }
    }
}

/// Timeout guard settings
///
/// `deadline` has no usable default; leaving it out fails conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    #[serde(with = "duration_millis")]
    pub deadline: Duration,
    pub force_kill: bool,
    #[serde(with = "duration_millis")]
    pub termination_grace: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::ZERO,
            force_kill: true,
            termination_grace: Duration::from_millis(100),
        }
    }
}

impl TimeoutSettings {
    /// Parse settings from a TOML document holding the fields at top level
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Validate and convert into a [`TimeoutGuard`](crate::resilience::TimeoutGuard)
    #[cfg(feature = "runtime")]
    pub fn to_guard(&self) -> ConfigResult<crate::resilience::TimeoutGuard> {
        crate::resilience::TimeoutGuard::builder()
            .deadline(self.deadline)
            .force_kill(self.force_kill)
            .termination_grace(self.termination_grace)
            .build()
    }
}

/// Combined settings document with optional `[retry]` and `[timeout]` tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub retry: RetrySettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutSettings>,
}

impl ResilienceSettings {
    /// Parse a settings document
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let settings: Self = toml::from_str(source)?;
        debug!(
            max_attempts = settings.retry.max_attempts,
            has_timeout = settings.timeout.is_some(),
            "Loaded resilience settings"
        );
        Ok(settings)
    }

    /// Render the settings back to TOML
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string(self)
            .map_err(|err| ConfigurationError::Parse { format: "TOML", message: err.to_string() })
    }
}
