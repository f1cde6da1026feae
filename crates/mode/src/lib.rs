//! Operating modes for switchyard.
//!
//! This crate is the pure domain layer of the mode orchestration stack:
//! - Which modes exist and how legacy spellings map onto them
//! - What a system snapshot looks like
//! - Which transitions are legal and when a system state is consistent
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Domain Layer                             │
//! │  mode.rs      - Mode enum, toggle order, legacy table       │
//! │  snapshot.rs  - SystemSnapshot, ModeObservation             │
//! │  provider.rs  - Traits for injected observations            │
//! │  rules.rs     - Precondition and consistency tables         │
//! │  validator.rs - Pure validation over a snapshot             │
//! │  outcome.rs   - Transition outcome records                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use switchyard_mode::{validate_transition, Mode, SystemSnapshot};
//!
//! let snapshot = SystemSnapshot::new().with_driver_connected(false);
//! let outcome = validate_transition(Mode::Native, Mode::ConvertedOutput, &snapshot);
//! assert!(!outcome.is_valid);
//! ```

mod mode;
mod outcome;
mod provider;
mod snapshot;
mod validator;

pub mod rules;

pub use mode::{Mode, ParseModeError, LEGACY_SPELLINGS};
pub use outcome::{PhaseResult, TransitionFailure, TransitionOutcome, TransitionPhase};
pub use provider::{
    NullProvider, Observations, SharedObservations, SystemStateProvider, SystemStateProviderRef,
};
pub use snapshot::{ModeObservation, SystemSnapshot};
pub use validator::{
    validate_system_state, validate_transition, Issue, PermissiveValidator, RuleValidator,
    Severity, ValidationOutcome, Validator, NO_OP_MESSAGE,
};
