//! Transition and system-state validation.
//!
//! Both entry points are pure: they read a [`SystemSnapshot`] and return a
//! [`ValidationOutcome`]. The policy itself lives in [`crate::rules`].

use crate::mode::Mode;
use crate::rules::{STATE_RULES, TRANSITION_RULES};
use crate::snapshot::SystemSnapshot;
use serde::{Deserialize, Serialize};

/// Message of the structural error raised for `from == to`.
pub const NO_OP_MESSAGE: &str = "no-op transition requested";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Advisory only.
    Warning,
    /// Blocks a transition or marks the system state invalid.
    Error,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub component: String,
    pub message: String,
}

impl Issue {
    pub fn warning(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn error(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{level} [{}]: {}", self.component, self.message)
    }
}

/// Result of a validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub issues: Vec<Issue>,
}

impl Default for ValidationOutcome {
    fn default() -> Self {
        Self::from_issues(Vec::new())
    }
}

impl ValidationOutcome {
    /// `is_valid` is derived: true iff no Error issue is present.
    pub fn from_issues(issues: Vec<Issue>) -> Self {
        let is_valid = !issues.iter().any(Issue::is_error);
        Self { is_valid, issues }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| !i.is_error())
    }

    /// One-line summary of the error issues, for outcome messages.
    pub fn error_summary(&self) -> String {
        self.errors()
            .map(|i| format!("{}: {}", i.component, i.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Log every issue at a level matching its severity.
    pub fn log(&self, context: &str) {
        for issue in &self.issues {
            match issue.severity {
                Severity::Warning => tracing::warn!(
                    context = context,
                    component = %issue.component,
                    "{}",
                    issue.message
                ),
                Severity::Error => tracing::error!(
                    context = context,
                    component = %issue.component,
                    "{}",
                    issue.message
                ),
            }
        }
    }
}

/// Decide whether `from → to` may be attempted given `snapshot`.
pub fn validate_transition(from: Mode, to: Mode, snapshot: &SystemSnapshot) -> ValidationOutcome {
    if from == to {
        return ValidationOutcome::from_issues(vec![Issue::error("transition", NO_OP_MESSAGE)]);
    }

    let issues = TRANSITION_RULES
        .iter()
        .filter(|rule| rule.applies_to(from, to))
        .filter_map(|rule| rule.evaluate(snapshot))
        .collect();

    ValidationOutcome::from_issues(issues)
}

/// Check the snapshot for internal consistency, independent of any transition.
pub fn validate_system_state(snapshot: &SystemSnapshot) -> ValidationOutcome {
    let issues = STATE_RULES
        .iter()
        .filter_map(|rule| (rule.check)(snapshot))
        .collect();

    ValidationOutcome::from_issues(issues)
}

/// Injectable validation seam.
pub trait Validator: Send + Sync {
    fn validate_transition(&self, from: Mode, to: Mode, snapshot: &SystemSnapshot)
        -> ValidationOutcome;

    fn validate_system_state(&self, snapshot: &SystemSnapshot) -> ValidationOutcome;
}

/// Validator backed by the rule tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleValidator;

impl Validator for RuleValidator {
    fn validate_transition(
        &self,
        from: Mode,
        to: Mode,
        snapshot: &SystemSnapshot,
    ) -> ValidationOutcome {
        validate_transition(from, to, snapshot)
    }

    fn validate_system_state(&self, snapshot: &SystemSnapshot) -> ValidationOutcome {
        validate_system_state(snapshot)
    }
}

/// Validator for minimal deployments: only the structural no-op check remains.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveValidator;

impl Validator for PermissiveValidator {
    fn validate_transition(
        &self,
        from: Mode,
        to: Mode,
        _snapshot: &SystemSnapshot,
    ) -> ValidationOutcome {
        if from == to {
            return ValidationOutcome::from_issues(vec![Issue::error("transition", NO_OP_MESSAGE)]);
        }
        ValidationOutcome::default()
    }

    fn validate_system_state(&self, _snapshot: &SystemSnapshot) -> ValidationOutcome {
        ValidationOutcome::default()
    }
}
