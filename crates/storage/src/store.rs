use crate::path::resolve_within_root;
use crate::{ModeRepository, Result, StoreError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use switchyard_mode::Mode;

/// Where a loaded mode came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    /// No state file yet (cold start).
    Missing,
    /// File held a canonical mode name.
    Canonical,
    /// File held a legacy spelling that was mapped.
    Migrated { legacy: String },
    /// File content matched nothing; default used.
    Unrecognized { raw: String },
    /// File exists but could not be read; default used.
    ReadFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub mode: Mode,
    pub source: LoadSource,
}

/// Map persisted text to a mode, canonical names first.
pub(crate) fn parse_persisted(raw: &str) -> (Mode, LoadSource) {
    let text = raw.trim();
    if let Ok(mode) = text.parse::<Mode>() {
        return (mode, LoadSource::Canonical);
    }
    if let Some(mode) = Mode::from_legacy(text) {
        return (
            mode,
            LoadSource::Migrated {
                legacy: text.to_string(),
            },
        );
    }
    (
        Mode::default(),
        LoadSource::Unrecognized {
            raw: text.to_string(),
        },
    )
}

/// File-backed mode storage confined to an application root.
pub struct ModeStateStore {
    path: PathBuf,
    last_persisted: Mutex<Option<Mode>>,
}

impl ModeStateStore {
    /// Open the state file at `relative` under `root`.
    ///
    /// This is the only fallible entry point: a path outside the root is a
    /// configuration error and is reported to the caller.
    pub fn open(root: &Path, relative: impl AsRef<Path>) -> Result<Self> {
        let path = resolve_within_root(root, relative.as_ref())?;
        tracing::debug!(path = %path.display(), "Mode state file resolved");
        Ok(Self {
            path,
            last_persisted: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted mode and report how it was obtained.
    ///
    /// Legacy spellings are rewritten in canonical form (best effort).
    pub fn load_detailed(&self) -> LoadOutcome {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No persisted mode, using default");
                self.set_last_persisted(None);
                return LoadOutcome {
                    mode: Mode::default(),
                    source: LoadSource::Missing,
                };
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to read persisted mode");
                self.set_last_persisted(None);
                return LoadOutcome {
                    mode: Mode::default(),
                    source: LoadSource::ReadFailed,
                };
            }
        };

        let (mode, source) = parse_persisted(&raw);
        match &source {
            LoadSource::Canonical => {
                self.set_last_persisted(Some(mode));
            }
            LoadSource::Migrated { legacy } => {
                tracing::info!(legacy = %legacy, mode = %mode, "Migrating legacy mode value");
                if !self.persist(mode) {
                    // The legacy text still maps to `mode`, so it remains durable.
                    self.set_last_persisted(Some(mode));
                }
            }
            LoadSource::Unrecognized { raw } => {
                tracing::warn!(raw = %raw, default = %mode, "Unrecognized persisted mode, using default");
                self.set_last_persisted(None);
            }
            LoadSource::Missing | LoadSource::ReadFailed => {}
        }

        LoadOutcome { mode, source }
    }

    /// Write-then-rename so a crash leaves either the old or the new value.
    fn try_persist(&self, mode: Mode) -> Result<()> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| StoreError::InvalidPath(self.path.clone()))?;
        let tmp = self
            .path
            .with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
        let io = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };

        {
            let mut file = fs::File::create(&tmp).map_err(io(&tmp))?;
            file.write_all(mode.name().as_bytes()).map_err(io(&tmp))?;
            file.write_all(b"\n").map_err(io(&tmp))?;
            file.sync_all().map_err(io(&tmp))?;
        }

        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io {
                path: self.path.clone(),
                source: e,
            });
        }
        Ok(())
    }

    fn set_last_persisted(&self, mode: Option<Mode>) {
        *self
            .last_persisted
            .lock()
            .expect("mode store mutex poisoned") = mode;
    }
}

impl ModeRepository for ModeStateStore {
    fn load(&self) -> Mode {
        self.load_detailed().mode
    }

    fn load_detailed(&self) -> LoadOutcome {
        ModeStateStore::load_detailed(self)
    }

    fn persist(&self, mode: Mode) -> bool {
        match self.try_persist(mode) {
            Ok(()) => {
                tracing::debug!(mode = %mode, path = %self.path.display(), "Mode persisted");
                self.set_last_persisted(Some(mode));
                true
            }
            Err(e) => {
                tracing::error!(mode = %mode, error = %e, "Mode not durably saved");
                false
            }
        }
    }

    fn last_persisted(&self) -> Option<Mode> {
        *self
            .last_persisted
            .lock()
            .expect("mode store mutex poisoned")
    }
}

/// In-memory storage for tests and deployments without a writable root.
#[derive(Default)]
pub struct MemoryModeStore {
    value: Mutex<Option<Mode>>,
    fail_writes: AtomicBool,
}

impl MemoryModeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: Mode) -> Self {
        Self {
            value: Mutex::new(Some(mode)),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make subsequent writes report failure.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl ModeRepository for MemoryModeStore {
    fn load(&self) -> Mode {
        self.value
            .lock()
            .expect("mode store mutex poisoned")
            .unwrap_or_default()
    }

    fn load_detailed(&self) -> LoadOutcome {
        match *self.value.lock().expect("mode store mutex poisoned") {
            Some(mode) => LoadOutcome {
                mode,
                source: LoadSource::Canonical,
            },
            None => LoadOutcome {
                mode: Mode::default(),
                source: LoadSource::Missing,
            },
        }
    }

    fn persist(&self, mode: Mode) -> bool {
        if self.fail_writes.load(Ordering::SeqCst) {
            tracing::error!(mode = %mode, "Mode not durably saved");
            return false;
        }
        *self.value.lock().expect("mode store mutex poisoned") = Some(mode);
        true
    }

    fn last_persisted(&self) -> Option<Mode> {
        *self.value.lock().expect("mode store mutex poisoned")
    }
}
