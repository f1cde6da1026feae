//! Public entry point for mode orchestration.
//!
//! [`ModeController`] is the only type UI code needs: it switches and
//! toggles modes, restores the persisted mode at startup, answers
//! diagnostics queries and delivers change notifications.
//!
//! # Example
//!
//! ```ignore
//! let controller = ModeController::open(&root, config, registry)?.build();
//! controller.start()?;
//! controller.initialize_from_persistence().await;
//! controller.subscribe_mode_changed(|e| println!("{} -> {}", e.from, e.to))?;
//! controller.switch(Mode::HardwarePassthrough).await;
//! ```

mod config;
mod controller;
mod drain;
mod error;

pub use config::{ConfigError, ControllerConfig};
pub use controller::{
    DiagnosticsSummary, ModeController, ModeControllerBuilder, SwitchOptions, DEFAULT_CALLER,
};
pub use error::{ControllerError, Result};
