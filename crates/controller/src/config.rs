//! Controller configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use switchyard_diagnostics::HealthPolicy;
use switchyard_transition::OrchestratorConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Longest accepted failure window (one year).
pub const MAX_FAILURE_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Tunables for [`ModeController`](crate::ModeController).
///
/// Every field has a default, so a partial JSON file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Mode file, relative to the application root.
    pub state_file: PathBuf,
    /// How long a switch waits for an in-flight transition.
    pub switch_wait_ms: u64,
    pub transition_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub rollback_timeout_ms: u64,
    pub health_interval_ms: u64,
    pub failure_window_secs: u64,
    /// More failures than this inside the window is unhealthy.
    pub failure_threshold: usize,
    pub history_capacity: usize,
    /// Bound on waiting for in-flight switches during shutdown.
    pub shutdown_drain_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("mode.txt"),
            switch_wait_ms: 10_000,
            transition_timeout_ms: 15_000,
            settle_delay_ms: 100,
            rollback_timeout_ms: 5_000,
            health_interval_ms: 5_000,
            failure_window_secs: 300,
            failure_threshold: 3,
            history_capacity: 100,
            shutdown_drain_ms: 5_000,
        }
    }
}

impl ControllerConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = ?path, "No config file; using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.health_interval_ms == 0 {
            return invalid("health_interval_ms", "must be at least 1");
        }
        if self.transition_timeout_ms == 0 {
            return invalid("transition_timeout_ms", "must be at least 1");
        }
        if self.history_capacity == 0 {
            return invalid("history_capacity", "must be at least 1");
        }
        if self.failure_window_secs == 0 || self.failure_window_secs > MAX_FAILURE_WINDOW_SECS {
            return invalid(
                "failure_window_secs",
                &format!("must be between 1 and {MAX_FAILURE_WINDOW_SECS}"),
            );
        }
        Ok(())
    }

    /// Platform data directory for switchyard, e.g. `~/.local/share/switchyard`.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("switchyard")
    }

    pub fn switch_wait(&self) -> Duration {
        Duration::from_millis(self.switch_wait_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            default_timeout: Duration::from_millis(self.transition_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            rollback_timeout: Duration::from_millis(self.rollback_timeout_ms),
        }
    }

    /// Health thresholds. An out-of-range window falls back to the default.
    pub fn health_policy(&self) -> HealthPolicy {
        let defaults = HealthPolicy::default();
        let window = i64::try_from(self.failure_window_secs.min(MAX_FAILURE_WINDOW_SECS))
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .filter(|window| *window > chrono::TimeDelta::zero())
            .unwrap_or(defaults.failure_window);
        HealthPolicy {
            failure_window: window,
            failure_threshold: self.failure_threshold,
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.switch_wait(), Duration::from_secs(10));
        assert_eq!(config.orchestrator(), OrchestratorConfig::default());
        assert_eq!(config.health_policy(), HealthPolicy::default());
    }

    #[test]
    fn test_partial_json_keeps_other_defaults() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{"switch_wait_ms": 250, "state_file": "state/mode.txt"}"#)
                .unwrap();
        assert_eq!(config.switch_wait_ms, 250);
        assert_eq!(config.state_file, PathBuf::from("state/mode.txt"));
        assert_eq!(config.history_capacity, 100);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn test_zero_health_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"health_interval_ms": 0}"#).unwrap();

        assert!(matches!(
            ControllerConfig::load(&path),
            Err(ConfigError::Invalid {
                field: "health_interval_ms",
                ..
            })
        ));
    }

    #[test]
    fn test_huge_failure_window_rejected_and_never_panics() {
        let config = ControllerConfig {
            failure_window_secs: u64::MAX,
            ..ControllerConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "failure_window_secs",
                ..
            })
        ));
        assert_eq!(
            config.health_policy().failure_window,
            chrono::TimeDelta::seconds(MAX_FAILURE_WINDOW_SECS as i64)
        );
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(ControllerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            ControllerConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
