//! System snapshot structures.

use crate::mode::Mode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A mode value as reported by one cooperating component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeObservation {
    /// Reporting component (e.g. "registry", "orchestrator").
    pub component: String,

    /// Mode the component believes is current.
    pub mode: Mode,
}

impl ModeObservation {
    pub fn new(component: impl Into<String>, mode: Mode) -> Self {
        Self {
            component: component.into(),
            mode,
        }
    }
}

/// Point-in-time view of the cross-component facts used for validation.
///
/// Every observation is optional: a missing value means the observer was not
/// available and the corresponding check is skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Mode the caller expects to be current.
    #[serde(default)]
    pub current_mode: Option<Mode>,

    /// Modes reported by individual components.
    #[serde(default)]
    pub observed_modes: Vec<ModeObservation>,

    /// Whether raw input is being suppressed.
    #[serde(default)]
    pub suppression_enabled: Option<bool>,

    /// Whether the virtual-controller driver is connected.
    #[serde(default)]
    pub driver_connected: Option<bool>,

    /// Whether a physical input device is connected.
    #[serde(default)]
    pub device_connected: Option<bool>,

    /// Whether the hardware passthrough loop is running.
    #[serde(default)]
    pub passthrough_running: Option<bool>,

    /// When the last successful transition was committed.
    #[serde(default)]
    pub last_transition_at: Option<DateTime<Utc>>,

    /// When this snapshot was captured.
    pub captured_at: DateTime<Utc>,
}

impl Default for SystemSnapshot {
    fn default() -> Self {
        Self {
            current_mode: None,
            observed_modes: Vec::new(),
            suppression_enabled: None,
            driver_connected: None,
            device_connected: None,
            passthrough_running: None,
            last_transition_at: None,
            captured_at: Utc::now(),
        }
    }
}

impl SystemSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_current_mode(mut self, mode: Mode) -> Self {
        self.current_mode = Some(mode);
        self
    }

    pub fn with_suppression(mut self, enabled: bool) -> Self {
        self.suppression_enabled = Some(enabled);
        self
    }

    pub fn with_driver_connected(mut self, connected: bool) -> Self {
        self.driver_connected = Some(connected);
        self
    }

    pub fn with_device_connected(mut self, connected: bool) -> Self {
        self.device_connected = Some(connected);
        self
    }

    pub fn with_passthrough_running(mut self, running: bool) -> Self {
        self.passthrough_running = Some(running);
        self
    }

    /// Record the mode reported by `component`.
    pub fn observe(&mut self, component: impl Into<String>, mode: Mode) {
        self.observed_modes.push(ModeObservation::new(component, mode));
    }

    pub fn with_observation(mut self, component: impl Into<String>, mode: Mode) -> Self {
        self.observe(component, mode);
        self
    }

    /// The mode state checks run against: the expected mode if set, else the
    /// first observation.
    pub fn effective_mode(&self) -> Option<Mode> {
        self.current_mode
            .or_else(|| self.observed_modes.first().map(|o| o.mode))
    }

    /// All reported mode values (expected mode first), paired with their source.
    pub fn mode_reports(&self) -> Vec<(&str, Mode)> {
        let mut reports = Vec::with_capacity(self.observed_modes.len() + 1);
        if let Some(mode) = self.current_mode {
            reports.push(("expected", mode));
        }
        reports.extend(
            self.observed_modes
                .iter()
                .map(|o| (o.component.as_str(), o.mode)),
        );
        reports
    }

    /// True when at least two reports name different modes.
    pub fn has_mode_disagreement(&self) -> bool {
        let reports = self.mode_reports();
        match reports.first() {
            Some((_, first)) => reports.iter().any(|(_, mode)| mode != first),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snapshot_has_no_observations() {
        let snapshot = SystemSnapshot::default();
        assert!(snapshot.current_mode.is_none());
        assert!(snapshot.suppression_enabled.is_none());
        assert!(snapshot.effective_mode().is_none());
        assert!(!snapshot.has_mode_disagreement());
    }

    #[test]
    fn test_effective_mode_falls_back_to_observation() {
        let snapshot = SystemSnapshot::new().with_observation("registry", Mode::ConvertedOutput);
        assert_eq!(snapshot.effective_mode(), Some(Mode::ConvertedOutput));
    }

    #[test]
    fn test_disagreement_includes_expected_mode() {
        let agreeing = SystemSnapshot::new()
            .with_current_mode(Mode::Native)
            .with_observation("registry", Mode::Native);
        assert!(!agreeing.has_mode_disagreement());

        let disagreeing = agreeing.with_observation("tray", Mode::HardwarePassthrough);
        assert!(disagreeing.has_mode_disagreement());
    }

    #[test]
    fn test_snapshot_deserializes_sparse_json() {
        let json = r#"{"captured_at": "2026-01-01T00:00:00Z", "driver_connected": false}"#;
        let snapshot: SystemSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.driver_connected, Some(false));
        assert!(snapshot.device_connected.is_none());
        assert!(snapshot.observed_modes.is_empty());
    }
}
