//! In-process stand-ins for the platform side effects of each mode.
//!
//! Each handler flips the shared observations the way the real hooks and
//! driver would, so validation and the health monitor see a coherent system.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use switchyard_mode::{Mode, SharedObservations};
use switchyard_transition::{HandlerError, HandlerSet, ModeHandler};

pub struct SimulatedHandler {
    mode: Mode,
    observations: SharedObservations,
    latency: Duration,
}

impl SimulatedHandler {
    pub fn new(mode: Mode, observations: SharedObservations, latency: Duration) -> Self {
        Self {
            mode,
            observations,
            latency,
        }
    }
}

#[async_trait]
impl ModeHandler for SimulatedHandler {
    async fn activate(&self) -> Result<(), HandlerError> {
        tokio::time::sleep(self.latency).await;

        match self.mode {
            Mode::Native => {
                self.observations.set_suppression(true);
            }
            Mode::ConvertedOutput => {
                if self.observations.get().driver_connected == Some(false) {
                    return Err(HandlerError::failed(
                        self.mode,
                        "virtual controller driver is not connected",
                    ));
                }
                self.observations.set_suppression(true);
            }
            Mode::HardwarePassthrough => {
                if self.observations.get().device_connected == Some(false) {
                    return Err(HandlerError::failed(
                        self.mode,
                        "no physical device to pass through",
                    ));
                }
                self.observations.update(|o| {
                    o.suppression_enabled = Some(false);
                    o.passthrough_running = Some(true);
                });
            }
        }

        tracing::debug!(mode = %self.mode, "Simulated handler activated");
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), HandlerError> {
        if self.mode == Mode::HardwarePassthrough {
            self.observations.update(|o| {
                o.passthrough_running = Some(false);
                o.suppression_enabled = Some(true);
            });
        }
        Ok(())
    }
}

/// Handler set covering every mode, starting in `initial`.
pub fn registry(
    initial: Mode,
    observations: &SharedObservations,
    latency: Duration,
) -> Arc<HandlerSet> {
    let set = HandlerSet::new(initial);
    for mode in Mode::ALL {
        set.register(
            mode,
            Arc::new(SimulatedHandler::new(mode, observations.clone(), latency)),
        );
    }
    observations.update(|o| {
        o.suppression_enabled.get_or_insert(initial.expects_suppression());
        o.passthrough_running.get_or_insert(initial.allows_passthrough_loop());
    });
    Arc::new(set)
}
