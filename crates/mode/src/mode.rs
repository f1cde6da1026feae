//! Mode definitions, canonical names and legacy migration.
//!
//! Pure domain logic - no I/O, no platform dependencies.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Mutually exclusive operating mode of the input pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Mode {
    /// Native passthrough disabled; raw input is suppressed.
    #[default]
    Native,

    /// Input is converted in software and emitted through the virtual controller.
    ConvertedOutput,

    /// The physical device is forwarded as-is by the passthrough loop.
    HardwarePassthrough,
}

impl Mode {
    /// Every mode, in toggle order.
    pub const ALL: [Mode; 3] = [Mode::Native, Mode::ConvertedOutput, Mode::HardwarePassthrough];

    /// Canonical persisted name.
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Native => "Native",
            Mode::ConvertedOutput => "ConvertedOutput",
            Mode::HardwarePassthrough => "HardwarePassthrough",
        }
    }

    /// Returns a human-readable label for the mode.
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Native => "Native",
            Mode::ConvertedOutput => "Converted Output",
            Mode::HardwarePassthrough => "Hardware Passthrough",
        }
    }

    /// Next mode in the toggle cycle: Native → ConvertedOutput → HardwarePassthrough → Native.
    pub fn next(&self) -> Mode {
        match self {
            Mode::Native => Mode::ConvertedOutput,
            Mode::ConvertedOutput => Mode::HardwarePassthrough,
            Mode::HardwarePassthrough => Mode::Native,
        }
    }

    /// Whether raw input suppression should be active while this mode is current.
    pub fn expects_suppression(&self) -> bool {
        !matches!(self, Mode::HardwarePassthrough)
    }

    /// Whether the passthrough loop is allowed to run in this mode.
    pub fn allows_passthrough_loop(&self) -> bool {
        matches!(self, Mode::HardwarePassthrough)
    }

    /// Map a legacy persisted spelling to its mode.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    pub fn from_legacy(raw: &str) -> Option<Mode> {
        let needle = raw.trim();
        LEGACY_SPELLINGS
            .iter()
            .find(|(spelling, _)| spelling.eq_ignore_ascii_case(needle))
            .map(|(_, mode)| *mode)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Spellings written by earlier releases, mapped to the current modes.
pub const LEGACY_SPELLINGS: &[(&str, Mode)] = &[
    ("Disabled", Mode::Native),
    ("None", Mode::Native),
    ("Off", Mode::Native),
    ("0", Mode::Native),
    ("Enabled", Mode::ConvertedOutput),
    ("Emulation", Mode::ConvertedOutput),
    ("ControllerEmulation", Mode::ConvertedOutput),
    ("VirtualController", Mode::ConvertedOutput),
    ("1", Mode::ConvertedOutput),
    ("Passthrough", Mode::HardwarePassthrough),
    ("ControllerPassthrough", Mode::HardwarePassthrough),
    ("2", Mode::HardwarePassthrough),
];

/// Returned when a string is not a canonical mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized mode name: {0:?}")]
pub struct ParseModeError(pub String);

impl FromStr for Mode {
    type Err = ParseModeError;

    /// Parses canonical names only; legacy spellings go through [`Mode::from_legacy`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Mode::ALL
            .iter()
            .copied()
            .find(|mode| mode.name().eq_ignore_ascii_case(needle))
            .ok_or_else(|| ParseModeError(s.to_string()))
    }
}
