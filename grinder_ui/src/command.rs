//! Topic-style command parsing.
use grinder_core::state::grams_to_dg;
use grinder_core::{PresetId, RemoteCommand};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command topic '{0}'")]
    UnknownTopic(String),
    #[error("payload '{payload}' for '{topic}' is not a number of grams")]
    BadPayload { topic: String, payload: String },
}

/// Topics accepted by [`parse_command`], relative to the device namespace.
pub const COMMAND_TOPICS: &[&str] = &[
    "cmd/start",
    "cmd/start_left",
    "cmd/start_right",
    "cmd/left",
    "cmd/right",
    "cmd/calibrate",
    "cmd/tare_scale",
    "cmd/update",
    "cmd/update_abort",
    "preset_left/set",
    "preset_right/set",
    "block_threshold/set",
];

/// Parse one remote command.
///
/// `topic` is relative to the device namespace (`cmd/start`, not
/// `coffeegrinder/<id>/cmd/start`). Button-style topics ignore the payload;
/// the `*/set` topics take a decimal number of grams.
pub fn parse_command(topic: &str, payload: &str) -> Result<RemoteCommand, CommandError> {
    let topic = topic.trim_matches('/');
    let cmd = match topic {
        "cmd/start" => RemoteCommand::Start,
        "cmd/start_left" => RemoteCommand::StartWithPreset(PresetId::Small),
        "cmd/start_right" => RemoteCommand::StartWithPreset(PresetId::Large),
        "cmd/left" => RemoteCommand::SelectPreset(PresetId::Small),
        "cmd/right" => RemoteCommand::SelectPreset(PresetId::Large),
        "cmd/calibrate" => RemoteCommand::Calibrate,
        "cmd/tare_scale" => RemoteCommand::Tare,
        "cmd/update" => RemoteCommand::BeginUpdate,
        "cmd/update_abort" => RemoteCommand::AbortUpdate,
        "preset_left/set" => {
            RemoteCommand::SetPresetTarget(PresetId::Small, deci_grams(topic, payload)?)
        }
        "preset_right/set" => {
            RemoteCommand::SetPresetTarget(PresetId::Large, deci_grams(topic, payload)?)
        }
        "block_threshold/set" => RemoteCommand::SetStallThreshold(grams(topic, payload)?),
        other => return Err(CommandError::UnknownTopic(other.to_string())),
    };
    tracing::debug!(topic, payload, ?cmd, "remote command parsed");
    Ok(cmd)
}

/// Strip a device namespace such as `coffeegrinder/grinder-01/` from a full topic.
pub fn relative_topic<'a>(namespace: &str, full: &'a str) -> Option<&'a str> {
    let ns = namespace.trim_end_matches('/');
    full.strip_prefix(ns)?.strip_prefix('/')
}

fn grams(topic: &str, payload: &str) -> Result<f32, CommandError> {
    payload
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|g| g.is_finite())
        .ok_or_else(|| CommandError::BadPayload {
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
}

fn deci_grams(topic: &str, payload: &str) -> Result<i64, CommandError> {
    grams(topic, payload).and_then(|g| {
        grams_to_dg(g).ok_or_else(|| CommandError::BadPayload {
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
    })
}
