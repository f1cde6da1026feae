//! Validation policy as data.
//!
//! [`TRANSITION_RULES`] is the `Mode × Mode → predicate` precondition table;
//! [`STATE_RULES`] holds the consistency checks run against any snapshot.

use crate::mode::Mode;
use crate::snapshot::SystemSnapshot;
use crate::validator::{Issue, Severity};

/// Which source modes a rule covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeMatch {
    Any,
    Exactly(Mode),
}

impl ModeMatch {
    pub fn matches(&self, mode: Mode) -> bool {
        match self {
            ModeMatch::Any => true,
            ModeMatch::Exactly(expected) => *expected == mode,
        }
    }
}

/// A precondition for entering `to`.
pub struct TransitionRule {
    pub name: &'static str,
    pub from: ModeMatch,
    pub to: Mode,
    pub severity: Severity,
    pub component: &'static str,
    pub message: &'static str,
    /// `Some(true)` holds, `Some(false)` violated, `None` not observable (skipped).
    pub holds: fn(&SystemSnapshot) -> Option<bool>,
}

impl TransitionRule {
    pub fn applies_to(&self, from: Mode, to: Mode) -> bool {
        self.from.matches(from) && self.to == to
    }

    /// The issue raised when the rule is observably violated.
    pub fn evaluate(&self, snapshot: &SystemSnapshot) -> Option<Issue> {
        match (self.holds)(snapshot) {
            Some(false) => Some(Issue {
                severity: self.severity,
                component: self.component.to_string(),
                message: self.message.to_string(),
            }),
            _ => None,
        }
    }
}

pub static TRANSITION_RULES: &[TransitionRule] = &[
    TransitionRule {
        name: "passthrough-needs-device",
        from: ModeMatch::Any,
        to: Mode::HardwarePassthrough,
        severity: Severity::Warning,
        component: "device",
        message: "hardware passthrough requires a connected physical input device",
        holds: |s| s.device_connected,
    },
    TransitionRule {
        name: "converted-output-needs-driver",
        from: ModeMatch::Any,
        to: Mode::ConvertedOutput,
        severity: Severity::Error,
        component: "driver",
        message: "converted output requires the virtual-controller driver to be connected",
        holds: |s| s.driver_connected,
    },
];

/// A consistency check over a whole snapshot.
pub struct StateRule {
    pub name: &'static str,
    pub check: fn(&SystemSnapshot) -> Option<Issue>,
}

pub static STATE_RULES: &[StateRule] = &[
    StateRule {
        name: "suppression-matches-mode",
        check: suppression_matches_mode,
    },
    StateRule {
        name: "passthrough-loop-only-in-passthrough",
        check: passthrough_loop_only_in_passthrough,
    },
    StateRule {
        name: "observers-agree",
        check: observers_agree,
    },
];

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

// Mismatch is expected briefly while hooks are swapped, hence Warning.
fn suppression_matches_mode(snapshot: &SystemSnapshot) -> Option<Issue> {
    let mode = snapshot.effective_mode()?;
    let enabled = snapshot.suppression_enabled?;
    if enabled == mode.expects_suppression() {
        return None;
    }
    Some(Issue::warning(
        "suppression",
        format!(
            "suppression is {} but {mode} expects it {}",
            on_off(enabled),
            on_off(mode.expects_suppression())
        ),
    ))
}

fn passthrough_loop_only_in_passthrough(snapshot: &SystemSnapshot) -> Option<Issue> {
    let mode = snapshot.effective_mode()?;
    if snapshot.passthrough_running == Some(true) && !mode.allows_passthrough_loop() {
        return Some(Issue::warning(
            "passthrough",
            format!("passthrough loop still running in {mode} (resource leak)"),
        ));
    }
    None
}

fn observers_agree(snapshot: &SystemSnapshot) -> Option<Issue> {
    if !snapshot.has_mode_disagreement() {
        return None;
    }
    let reports = snapshot
        .mode_reports()
        .into_iter()
        .map(|(component, mode)| format!("{component}={mode}"))
        .collect::<Vec<_>>()
        .join(", ");
    Some(Issue::error(
        "mode",
        format!("components disagree on the current mode ({reports})"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_names_are_unique() {
        let mut names: Vec<_> = TRANSITION_RULES
            .iter()
            .map(|r| r.name)
            .chain(STATE_RULES.iter().map(|r| r.name))
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_mode_match() {
        assert!(ModeMatch::Any.matches(Mode::Native));
        assert!(ModeMatch::Exactly(Mode::Native).matches(Mode::Native));
        assert!(!ModeMatch::Exactly(Mode::Native).matches(Mode::ConvertedOutput));
    }

    #[test]
    fn test_rule_skipped_without_observation() {
        let rule = &TRANSITION_RULES[1];
        assert!(rule.evaluate(&SystemSnapshot::default()).is_none());
        assert!(rule
            .evaluate(&SystemSnapshot::new().with_driver_connected(true))
            .is_none());
        let issue = rule
            .evaluate(&SystemSnapshot::new().with_driver_connected(false))
            .unwrap();
        assert_eq!(issue.severity, Severity::Error);
    }

    #[test]
    fn test_rules_only_apply_to_their_target() {
        let leaving_passthrough: Vec<_> = TRANSITION_RULES
            .iter()
            .filter(|r| r.applies_to(Mode::HardwarePassthrough, Mode::Native))
            .collect();
        assert!(leaving_passthrough.is_empty());
    }
}
