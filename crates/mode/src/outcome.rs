//! Transition outcome records.

use crate::mode::Mode;
use crate::validator::ValidationOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phases of the transition protocol, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    /// Waiting for the transition slot.
    Acquire,
    PreValidate,
    Prepare,
    Execute,
    PostValidate,
    Finalize,
    Rollback,
}

impl TransitionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionPhase::Acquire => "acquire",
            TransitionPhase::PreValidate => "pre-validate",
            TransitionPhase::Prepare => "prepare",
            TransitionPhase::Execute => "execute",
            TransitionPhase::PostValidate => "post-validate",
            TransitionPhase::Finalize => "finalize",
            TransitionPhase::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for TransitionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transition did not commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionFailure {
    #[error("validation failed: {summary}")]
    Validation { summary: String },

    #[error("prepare phase failed: {message}")]
    Prepare { message: String },

    #[error("execute phase failed: {message}")]
    Execute { message: String },

    #[error("post-validation failed: {summary}")]
    PostValidation { summary: String },

    #[error("transition cancelled during {phase}")]
    Cancelled { phase: TransitionPhase },

    #[error("transition timed out during {phase}")]
    TimedOut { phase: TransitionPhase },

    #[error("another transition is in progress (waited {waited_ms}ms)")]
    Busy { waited_ms: u64 },

    #[error("mode controller has been shut down")]
    Disposed,
}

/// Result of one protocol phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: TransitionPhase,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Immutable record of one transition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: Mode,
    pub to: Mode,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TransitionFailure>,
    pub pre_validation: ValidationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_validation: Option<ValidationOutcome>,
    #[serde(default)]
    pub phase_results: Vec<PhaseResult>,
    /// Whether the previous mode was re-applied after a failure.
    #[serde(default)]
    pub rolled_back: bool,
}

impl TransitionOutcome {
    /// Successful outcome for a request that targeted the current mode.
    pub fn no_op(mode: Mode) -> Self {
        let now = Utc::now();
        Self {
            from: mode,
            to: mode,
            started_at: now,
            completed_at: now,
            success: true,
            error_message: None,
            failure: None,
            pre_validation: ValidationOutcome::default(),
            post_validation: None,
            phase_results: Vec::new(),
            rolled_back: false,
        }
    }

    /// Failed outcome for a request refused before any phase ran.
    pub fn rejected(from: Mode, to: Mode, failure: TransitionFailure) -> Self {
        let now = Utc::now();
        Self {
            from,
            to,
            started_at: now,
            completed_at: now,
            success: false,
            error_message: Some(failure.to_string()),
            failure: Some(failure),
            pre_validation: ValidationOutcome::default(),
            post_validation: None,
            phase_results: Vec::new(),
            rolled_back: false,
        }
    }

    /// True when the outcome committed a different mode.
    pub fn changed_mode(&self) -> bool {
        self.success && self.from != self.to
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }

    pub fn phase(&self, phase: TransitionPhase) -> Option<&PhaseResult> {
        self.phase_results.iter().find(|p| p.phase == phase)
    }
}
