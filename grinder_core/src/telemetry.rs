//! Single-writer telemetry snapshot shared with presentation tasks.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::state::{MachineState, PresetId};

/// Read-only view of the controller published once per control tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub state: MachineState,
    pub selected_preset: PresetId,
    pub remaining_dg: u16,
    pub current_weight_g: f32,
    pub scale_factor: f32,
    pub stall_threshold_g: f32,
    pub small_runs: u32,
    pub large_runs: u32,
    pub total_weight_g: f32,
    pub small_dg: u16,
    pub large_dg: u16,
    /// Signed actuator output as last reported by the output task.
    pub motor_output: f32,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: MachineState::Idle,
            selected_preset: PresetId::Small,
            remaining_dg: 0,
            current_weight_g: 0.0,
            scale_factor: 1.0,
            stall_threshold_g: 0.0,
            small_runs: 0,
            large_runs: 0,
            total_weight_g: 0.0,
            small_dg: 0,
            large_dg: 0,
            motor_output: 0.0,
        }
    }
}

struct Shared {
    snapshot: RwLock<Snapshot>,
    version: AtomicU64,
}

/// Factory for the publisher/reader pair.
pub struct TelemetryCell;

impl TelemetryCell {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (TelemetryPublisher, TelemetryReader) {
        let shared = Arc::new(Shared {
            snapshot: RwLock::new(Snapshot::default()),
            version: AtomicU64::new(0),
        });
        (
            TelemetryPublisher {
                shared: shared.clone(),
            },
            TelemetryReader { shared },
        )
    }
}

/// The only writer. Deliberately not `Clone`.
pub struct TelemetryPublisher {
    shared: Arc<Shared>,
}

impl TelemetryPublisher {
    /// Replace the snapshot; the version advances only when something changed.
    pub fn publish(&self, snap: &Snapshot) {
        let mut g = match self.shared.snapshot.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *g != *snap {
            *g = snap.clone();
            self.shared.version.fetch_add(1, Ordering::Release);
        }
    }
}

#[derive(Clone)]
pub struct TelemetryReader {
    shared: Arc<Shared>,
}

impl TelemetryReader {
    pub fn snapshot(&self) -> Snapshot {
        match self.shared.snapshot.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Monotonic change counter; compare to detect updates without cloning.
    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::Acquire)
    }
}
