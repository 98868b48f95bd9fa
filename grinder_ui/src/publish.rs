//! Snapshot-to-topic diffing.
//!
//! Front ends publish retained values, so only fields whose rendered payload
//! changed since the last call are emitted. Weights are rendered at 0.1 g, so
//! jitter below that resolution never produces traffic.
use std::collections::HashMap;

use grinder_core::{PresetId, Snapshot};
use serde::Serialize;

/// One outgoing value, topic relative to the device namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicUpdate {
    pub topic: &'static str,
    pub payload: String,
}

/// Remembers the last payload per topic.
#[derive(Debug, Default)]
pub struct TopicDiff {
    last: HashMap<&'static str, String>,
}

impl TopicDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates for every field that changed since the previous call.
    /// The first call emits everything.
    pub fn diff(&mut self, snap: &Snapshot) -> Vec<TopicUpdate> {
        let mut out = Vec::new();
        for (topic, payload) in render(snap) {
            if self.last.get(topic) != Some(&payload) {
                self.last.insert(topic, payload.clone());
                out.push(TopicUpdate { topic, payload });
            }
        }
        out
    }

    /// Forget everything so the next `diff` republishes all topics,
    /// e.g. after the broker connection was re-established.
    pub fn reset(&mut self) {
        tracing::debug!("telemetry diff reset");
        self.last.clear();
    }
}

fn render(s: &Snapshot) -> [(&'static str, String); 11] {
    let selected_dg = match s.selected_preset {
        PresetId::Small => s.small_dg,
        PresetId::Large => s.large_dg,
    };
    [
        ("current_weight", tenths(s.current_weight_g)),
        (
            "selected_preset",
            format!("{} ({}g)", s.selected_preset, tenths(f32::from(selected_dg) / 10.0)),
        ),
        ("preset_left", tenths(f32::from(s.small_dg) / 10.0)),
        ("preset_right", tenths(f32::from(s.large_dg) / 10.0)),
        ("block_threshold", format!("{:.2}", s.stall_threshold_g)),
        ("scale_factor", format!("{:.2}", s.scale_factor)),
        ("presets_left_runs", s.small_runs.to_string()),
        ("presets_right_runs", s.large_runs.to_string()),
        ("total_weight", tenths(s.total_weight_g)),
        ("current_state", s.state.to_string()),
        ("motor_output", format!("{:.2}", s.motor_output)),
    ]
}

/// One decimal, with negative zero folded into zero.
fn tenths(v: f32) -> String {
    let r = (v * 10.0).round() / 10.0;
    let r = if r.abs() < f32::EPSILON { 0.0 } else { r };
    format!("{r:.1}")
}
