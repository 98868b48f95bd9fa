//! Machine states and preset identifiers.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lowest accepted preset target in decigrams (0.1 g).
pub const MIN_PRESET_DG: u16 = 1;
/// Highest accepted preset target in decigrams (30.0 g).
pub const MAX_PRESET_DG: u16 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineState {
    Idle,
    SetLeft,
    SetRight,
    Calibrate,
    Weighing,
    Running,
    Paused,
    Empty,
    Measuring,
    Finished,
    Saving,
    Updating,
}

impl MachineState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::SetLeft => "SET_LEFT",
            Self::SetRight => "SET_RIGHT",
            Self::Calibrate => "CALIBRATE",
            Self::Weighing => "WEIGHING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Empty => "EMPTY",
            Self::Measuring => "MEASURING",
            Self::Finished => "FINISHED",
            Self::Saving => "SAVING",
            Self::Updating => "UPDATING",
        }
    }

    /// States in which a grind session exists.
    pub const fn in_session(self) -> bool {
        matches!(
            self,
            Self::Running | Self::Measuring | Self::Paused | Self::Empty | Self::Finished
        )
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two presets: left button selects `Small`, right button selects `Large`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetId {
    #[default]
    Small,
    Large,
}

impl PresetId {
    /// Stored selection index; anything other than 1 decodes to `Small`.
    pub const fn from_index(i: u8) -> Self {
        if i == 1 { Self::Large } else { Self::Small }
    }

    pub const fn index(self) -> u8 {
        match self {
            Self::Small => 0,
            Self::Large => 1,
        }
    }
}

impl fmt::Display for PresetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Small => "SMALL",
            Self::Large => "LARGE",
        })
    }
}

impl std::str::FromStr for PresetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" | "left" => Ok(Self::Small),
            "large" | "right" => Ok(Self::Large),
            other => Err(format!("unknown preset '{other}' (expected small|large)")),
        }
    }
}

/// Clamp any requested target into `[MIN_PRESET_DG, MAX_PRESET_DG]`.
#[inline]
pub fn clamp_preset_dg(requested: i64) -> u16 {
    let c = requested.clamp(i64::from(MIN_PRESET_DG), i64::from(MAX_PRESET_DG));
    u16::try_from(c).unwrap_or(MAX_PRESET_DG)
}

/// Convert grams to decigrams, rounding to nearest. `None` for non-finite input.
#[inline]
pub fn grams_to_dg(grams: f32) -> Option<i64> {
    if !grams.is_finite() {
        return None;
    }
    let dg = (f64::from(grams) * 10.0).round();
    // Saturate instead of wrapping; the result is clamped by the caller anyway.
    Some(dg.clamp(i64::MIN as f64, i64::MAX as f64) as i64)
}
