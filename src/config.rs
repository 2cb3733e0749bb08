//! Engine configuration
//!
//! Every field has a default, so a YAML file only needs the keys it
//! overrides:
//!
//! ```yaml
//! min_text_chars: 20
//! readiness:
//!   interval_ms: 250
//!   max_attempts: 10
//! ```

use crate::engine::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rendered characters a message needs before it is considered ready
    pub min_text_chars: usize,
    /// Readiness polling for a candidate host node
    pub readiness: RetryPolicy,
    /// How long to look for the host's own action tray before synthesizing one
    pub tray_wait: RetryPolicy,
    /// Polling for the chat container before a scan
    pub page_ready: RetryPolicy,
    /// Delay before a control's status returns to idle
    pub revert_delay_ms: u64,
    /// Pause after a navigation before re-scanning
    pub navigation_settle_ms: u64,
    /// Capacity of the engine event channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 10,
            readiness: RetryPolicy::attempts(Duration::from_millis(200), 25),
            tray_wait: RetryPolicy::elapsed(Duration::from_millis(100), Duration::from_secs(3)),
            page_ready: RetryPolicy::elapsed(Duration::from_millis(100), Duration::from_secs(10)),
            revert_delay_ms: 2000,
            navigation_settle_ms: 100,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, policy) in [
            ("readiness", &self.readiness),
            ("tray_wait", &self.tray_wait),
            ("page_ready", &self.page_ready),
        ] {
            policy
                .validate()
                .map_err(|reason| ConfigError::Invalid { field, reason })?;
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "event_capacity",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn revert_delay(&self) -> Duration {
        Duration::from_millis(self.revert_delay_ms)
    }

    pub fn navigation_settle(&self) -> Duration {
        Duration::from_millis(self.navigation_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Ceiling;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = EngineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.readiness.ceiling, Ceiling::Attempts(25));
    }

    #[test]
    fn partial_override() {
        let config = EngineConfig::from_yaml_str(
            "min_text_chars: 20\ntray_wait:\n  interval_ms: 50\n  max_attempts: 4\n",
        )
        .unwrap();
        assert_eq!(config.min_text_chars, 20);
        assert_eq!(
            config.tray_wait,
            RetryPolicy::attempts(Duration::from_millis(50), 4)
        );
        assert_eq!(config.revert_delay(), Duration::from_millis(2000));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = EngineConfig::from_yaml_str("readiness:\n  interval_ms: 0\n  max_attempts: 3\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "readiness", .. }));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("savechat.yaml");
        std::fs::write(&path, "event_capacity: 8\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.event_capacity, 8);
    }
}
