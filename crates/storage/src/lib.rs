//! Durable storage of the current operating mode.
//!
//! The mode lives in a single plain-text file holding one canonical mode
//! name. Earlier releases wrote other spellings; those are migrated on load.
//! Reads and writes never fail outward: the in-memory mode stays
//! authoritative and persistence problems are logged.

mod path;
mod store;

pub use path::resolve_within_root;
pub use store::{LoadOutcome, LoadSource, MemoryModeStore, ModeStateStore};

use std::path::PathBuf;
use std::sync::Arc;
use switchyard_mode::Mode;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("path {path:?} resolves outside of {root:?}")]
    OutsideRoot { root: PathBuf, path: PathBuf },
    #[error("invalid state file path {0:?}")]
    InvalidPath(PathBuf),
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage seam for the persisted mode.
pub trait ModeRepository: Send + Sync {
    /// Read the persisted mode, falling back to the default.
    fn load(&self) -> Mode;

    /// Like [`load`](Self::load), also saying where the mode came from.
    fn load_detailed(&self) -> LoadOutcome;

    /// Write `mode`; returns false if it could not be saved durably.
    fn persist(&self, mode: Mode) -> bool;

    /// Mode last read from or written to durable storage.
    fn last_persisted(&self) -> Option<Mode>;
}

pub type ModeRepositoryRef = Arc<dyn ModeRepository>;
