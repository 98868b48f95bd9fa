//! Remote command surface. Every command enters the same state-machine
//! paths as the physical buttons.
use crate::state::PresetId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteCommand {
    Start,
    StartWithPreset(PresetId),
    SelectPreset(PresetId),
    /// Requested target in decigrams; clamped into the preset range.
    SetPresetTarget(PresetId, i64),
    SetStallThreshold(f32),
    Calibrate,
    Tare,
    /// Stop the motor and park the machine for a firmware update.
    BeginUpdate,
    AbortUpdate,
}
