//! Diagnostics for mode orchestration.
//!
//! - [`DiagnosticsRecorder`]: bounded transition history, key/value system
//!   state and on-demand health evaluation
//! - [`HealthMonitor`]: runs the health check periodically on a tokio task
//! - [`Clock`]: injectable time source for the failure window
//!
//! Readers take short `std::sync` locks only, so queries stay responsive
//! while a transition is in flight.

mod clock;
mod health;
mod history;
mod monitor;
mod recorder;
mod state;

pub use clock::{Clock, ClockRef, ManualClock, SystemClock};
pub use health::{evaluate, HealthPolicy, HealthReport};
pub use history::{TransitionEvent, TransitionHistory, DEFAULT_HISTORY_CAPACITY};
pub use monitor::{HealthMonitor, DEFAULT_HEALTH_INTERVAL, MIN_HEALTH_INTERVAL};
pub use recorder::{DiagnosticsRecorder, DiagnosticsRef};
pub use state::{state_keys, StateStore};
