//! Shared event contracts for mode orchestration.
//!
//! This crate defines the payloads that flow from the orchestration core to
//! its consumers (tray, overlay, hotkey feedback, logging). Using shared types
//! keeps producers and consumers agreeing on field names.
//!
//! Two delivery paths are provided:
//! - [`Subscribers`]: typed, synchronous, in-process observers
//! - [`EventBus`]: JSON payloads by topic, for UI bridges

mod bus;
mod subscribers;

pub use bus::{emit_event, EmittedEvent, EventBus, EventBusRef, InMemoryEventBus};
pub use subscribers::{Callback, SubscriptionId, Subscribers};

use serde::{Deserialize, Serialize};
use switchyard_mode::Mode;

/// Event emitted after a successful, state-changing switch.
///
/// Producers: mode controller (after persistence)
/// Consumers: tray, overlay, input hooks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeChangedEvent {
    /// Mode before the switch.
    pub from: Mode,
    /// Mode now active.
    pub to: Mode,
    /// Who requested the switch (e.g. "tray", "hotkey").
    #[serde(default)]
    pub caller_id: String,
    /// Timestamp in milliseconds since epoch.
    #[serde(default)]
    pub timestamp_ms: i64,
}

impl ModeChangedEvent {
    /// Event stamped with `at`, normally the recorder's clock.
    pub fn new(
        from: Mode,
        to: Mode,
        caller_id: impl Into<String>,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            from,
            to,
            caller_id: caller_id.into(),
            timestamp_ms: at.timestamp_millis(),
        }
    }
}

/// Event names as constants to prevent typos.
pub mod event_names {
    /// Mode changed event.
    pub const MODE_CHANGED: &str = "mode:changed";
    /// Health report published by the periodic check.
    pub const HEALTH_REPORT: &str = "diagnostics:health";
    /// Transition attempt recorded in history.
    pub const TRANSITION_RECORDED: &str = "diagnostics:transition";
}
