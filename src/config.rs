//! Step configuration.
//!
//! Builders accept the same settings one by one; [`StepConfig`] exists so a
//! step can also be described in a configuration file and loaded with serde.
//!
//! ```
//! use ironbatch::config::StepConfig;
//!
//! let config: StepConfig = serde_json::from_str(r#"{ "name": "load", "commit_interval": 50 }"#).unwrap();
//! assert_eq!(config.commit_interval, 50);
//! assert!(config.validate().is_ok());
//! ```

use crate::error::BatchError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    /// Identifier of the step; must not be blank.
    pub name: String,
    /// Maximum number of items per chunk (per consumer in the fan-out executor).
    pub commit_interval: usize,
    /// Number of consumer workers. Ignored by the single-threaded executor.
    pub consumers: usize,
    /// Seconds a worker waits at a handshake before giving up. 0 waits forever.
    pub wait_timeout_secs: u64,
    /// Return failed executions as `Err(BatchError::StepExecution)`.
    pub throw_errors: bool,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            commit_interval: 1,
            consumers: num_cpus::get().max(1),
            wait_timeout_secs: 0,
            throw_errors: true,
        }
    }
}

impl StepConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Handshake timeout, `None` when waits are unbounded.
    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_secs > 0).then(|| Duration::from_secs(self.wait_timeout_secs))
    }

    /// Items read per fan-out round, `None` if it does not fit in a `usize`.
    #[must_use]
    pub fn round_size(&self) -> Option<usize> {
        self.consumers.checked_mul(self.commit_interval)
    }

    /// Check the settings shared by every step kind.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Validation`] describing the first invalid setting.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.name.trim().is_empty() {
            return Err(BatchError::validation("the step must have a name"));
        }
        if self.commit_interval == 0 {
            return Err(BatchError::validation("the commit interval must be at least 1"));
        }
        if self.consumers == 0 {
            return Err(BatchError::validation("the consumers must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_name_is_rejected() {
        let config = StepConfig::named("   ");
        assert!(matches!(config.validate(), Err(BatchError::Validation(_))));
    }

    #[test]
    fn round_size_detects_overflow() {
        let mut config = StepConfig::named("s");
        config.consumers = 3;
        config.commit_interval = 4;
        assert_eq!(config.round_size(), Some(12));
        config.commit_interval = usize::MAX / 2;
        assert_eq!(config.round_size(), None);
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let mut config = StepConfig::named("s");
        assert_eq!(config.wait_timeout(), None);
        config.wait_timeout_secs = 3;
        assert_eq!(config.wait_timeout(), Some(Duration::from_secs(3)));
    }
}
