//! Health evaluation over the transition history and the state snapshot.

use crate::history::TransitionHistory;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use switchyard_mode::ValidationOutcome;

/// Result of one health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub is_healthy: bool,
    /// Human-readable findings, blocking and advisory alike.
    pub issues: Vec<String>,
}

/// Thresholds for [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    /// Trailing window in which failures are counted.
    pub failure_window: Duration,
    /// More failures than this inside the window is unhealthy.
    pub failure_threshold: usize,
    /// History fill ratio that raises an advisory.
    pub near_capacity_ratio: f64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_window: Duration::minutes(5),
            failure_threshold: 3,
            near_capacity_ratio: 0.9,
        }
    }
}

/// Evaluate health at `now`.
///
/// Only the failure count decides `is_healthy`; the findings of the
/// consistency audit and the history fill level are reported as advisories.
pub fn evaluate(
    history: &TransitionHistory,
    consistency: &ValidationOutcome,
    policy: &HealthPolicy,
    now: DateTime<Utc>,
) -> HealthReport {
    let mut issues = Vec::new();
    let mut is_healthy = true;

    let failures = history.failures_since(now - policy.failure_window);
    if failures > policy.failure_threshold {
        is_healthy = false;
        issues.push(format!(
            "{} failed transitions in the last {} minutes (threshold {})",
            failures,
            policy.failure_window.num_minutes(),
            policy.failure_threshold
        ));
    }

    for issue in &consistency.issues {
        issues.push(format!("advisory: {issue}"));
    }

    let fill = history.len() as f64 / history.capacity() as f64;
    if fill >= policy.near_capacity_ratio {
        issues.push(format!(
            "advisory: transition history near capacity ({}/{})",
            history.len(),
            history.capacity()
        ));
    }

    HealthReport {
        timestamp: now,
        is_healthy,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::TransitionEvent;
    use switchyard_mode::{validate_system_state, Mode, SystemSnapshot};

    fn failure_at(at: DateTime<Utc>) -> TransitionEvent {
        TransitionEvent {
            timestamp: at,
            from: Mode::Native,
            to: Mode::ConvertedOutput,
            success: false,
            error: Some("execute phase failed: driver missing".into()),
            caller_id: "test".into(),
        }
    }

    fn history_with_failures(count: usize, now: DateTime<Utc>) -> TransitionHistory {
        let mut history = TransitionHistory::default();
        for n in 0..count {
            history.push(failure_at(now - Duration::seconds(10 * n as i64)));
        }
        history
    }

    #[test]
    fn test_four_recent_failures_unhealthy() {
        let now = Utc::now();
        let report = evaluate(
            &history_with_failures(4, now),
            &ValidationOutcome::default(),
            &HealthPolicy::default(),
            now,
        );

        assert!(!report.is_healthy);
        assert!(report.issues[0].starts_with("4 failed transitions"));
    }

    #[test]
    fn test_three_recent_failures_healthy() {
        let now = Utc::now();
        let report = evaluate(
            &history_with_failures(3, now),
            &ValidationOutcome::default(),
            &HealthPolicy::default(),
            now,
        );

        assert!(report.is_healthy);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_old_failures_fall_out_of_window() {
        let now = Utc::now();
        let mut history = TransitionHistory::default();
        for n in 0..5 {
            history.push(failure_at(now - Duration::minutes(6) - Duration::seconds(n)));
        }

        let report = evaluate(
            &history,
            &ValidationOutcome::default(),
            &HealthPolicy::default(),
            now,
        );
        assert!(report.is_healthy);
    }

    #[test]
    fn test_consistency_findings_are_advisory() {
        let snapshot = SystemSnapshot::new()
            .with_current_mode(Mode::HardwarePassthrough)
            .with_suppression(true);

        let report = evaluate(
            &TransitionHistory::default(),
            &validate_system_state(&snapshot),
            &HealthPolicy::default(),
            Utc::now(),
        );

        assert!(report.is_healthy);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].starts_with("advisory:"));
    }

    #[test]
    fn test_near_capacity_is_advisory() {
        let now = Utc::now();
        let mut history = TransitionHistory::with_capacity(10);
        for n in 0..9 {
            history.push(TransitionEvent {
                success: true,
                error: None,
                ..failure_at(now - Duration::minutes(10 + n))
            });
        }

        let report = evaluate(
            &history,
            &ValidationOutcome::default(),
            &HealthPolicy::default(),
            now,
        );
        assert!(report.is_healthy);
        assert!(report.issues.iter().any(|i| i.contains("near capacity (9/10)")));
    }
}
