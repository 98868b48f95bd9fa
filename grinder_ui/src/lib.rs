#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Transport-free adapters between the grinder core and remote front ends.
//!
//! `command` turns `(topic, payload)` pairs from a broker or HTTP bridge into
//! [`RemoteCommand`]s; `publish` turns telemetry snapshots into the minimal set
//! of `(topic, payload)` updates. Wiring these to an actual broker is left to
//! the binary.

pub mod command;
pub mod publish;

pub use command::{COMMAND_TOPICS, CommandError, parse_command, relative_topic};
pub use grinder_core::RemoteCommand;
pub use publish::{TopicDiff, TopicUpdate};
