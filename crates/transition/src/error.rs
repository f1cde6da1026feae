use switchyard_mode::Mode;

/// Failure reported by a mode handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("no handler registered for {0}")]
    NotRegistered(Mode),

    #[error("{mode} handler failed: {message}")]
    Failed { mode: Mode, message: String },

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(mode: Mode, message: impl Into<String>) -> Self {
        Self::Failed {
            mode,
            message: message.into(),
        }
    }
}

/// Why the transition slot could not be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("transition slot still held after {waited_ms}ms")]
    TimedOut { waited_ms: u64 },

    #[error("transition guard is closed")]
    Closed,
}
