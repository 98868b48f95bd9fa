//! Persistence of presets, selection, calibration, counters and stall threshold.
//!
//! Stores return exactly what is stored so `save(load())` is a fixed point;
//! range checks happen in the controller when the values are adopted.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::{PresetDefaults, StallCfg};
use crate::error::{GrinderError, Result};
use crate::util::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub small_dg: u16,
    pub large_dg: u16,
    /// 0 = small, 1 = large; other values decode to small.
    pub selected: u8,
    pub scale_factor: f32,
    pub small_runs: u32,
    pub large_runs: u32,
    pub total_weight_g: f32,
    pub block_threshold_g: f32,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self::with_defaults(&PresetDefaults::default(), &StallCfg::default())
    }
}

impl PersistedState {
    /// First-boot state built from compiled-in defaults.
    pub fn with_defaults(presets: &PresetDefaults, stall: &StallCfg) -> Self {
        Self {
            small_dg: presets.small_dg,
            large_dg: presets.large_dg,
            selected: 0,
            scale_factor: 1.0,
            small_runs: 0,
            large_runs: 0,
            total_weight_g: 0.0,
            block_threshold_g: stall.block_threshold_g,
        }
    }
}

pub trait PresetStore {
    fn load(&self) -> Result<PersistedState>;
    fn save(&mut self, state: &PersistedState) -> Result<()>;
}

impl<T: PresetStore + ?Sized> PresetStore for Box<T> {
    fn load(&self) -> Result<PersistedState> {
        (**self).load()
    }
    fn save(&mut self, state: &PersistedState) -> Result<()> {
        (**self).save(state)
    }
}

/// In-memory store. Clones share contents, so tests can inspect what the
/// controller persisted and inject faults.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Option<PersistedState>>>,
    saves: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        let s = Self::default();
        if let Ok(mut g) = s.inner.lock() {
            *g = Some(state);
        }
        s
    }

    /// Number of successful saves so far.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<PersistedState> {
        self.inner.lock().ok().and_then(|g| g.clone())
    }

    /// Make every subsequent load and save fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(eyre::Report::new(GrinderError::Persistence(
                "store unavailable".into(),
            )));
        }
        Ok(())
    }
}

impl PresetStore for MemoryStore {
    fn load(&self) -> Result<PersistedState> {
        self.check()?;
        let g = self
            .inner
            .lock()
            .map_err(|_| GrinderError::Persistence("store lock poisoned".into()))?;
        Ok(g.clone().unwrap_or_default())
    }

    fn save(&mut self, state: &PersistedState) -> Result<()> {
        self.check()?;
        let mut g = self
            .inner
            .lock()
            .map_err(|_| GrinderError::Persistence("store lock poisoned".into()))?;
        *g = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// TOML file written atomically (temp file + rename).
#[derive(Debug, Clone)]
pub struct TomlFileStore {
    path: PathBuf,
    defaults: PersistedState,
}

impl TomlFileStore {
    pub fn new(path: impl Into<PathBuf>, defaults: PersistedState) -> Self {
        Self {
            path: path.into(),
            defaults,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PresetStore for TomlFileStore {
    fn load(&self) -> Result<PersistedState> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no persisted state, using defaults");
                return Ok(self.defaults.clone());
            }
            Err(e) => {
                return Err(eyre::Report::new(GrinderError::Persistence(format!(
                    "read {}: {e}",
                    self.path.display()
                ))));
            }
        };
        toml::from_str(&text).map_err(|e| {
            eyre::Report::new(GrinderError::Persistence(format!(
                "parse {}: {e}",
                self.path.display()
            )))
        })
    }

    fn save(&mut self, state: &PersistedState) -> Result<()> {
        let text = toml::to_string(state)
            .map_err(|e| GrinderError::Persistence(format!("serialize state: {e}")))?;
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(|e| GrinderError::Io(e.to_string()))?;
        }
        write_atomic(&self.path, text.as_bytes()).map_err(|e| {
            eyre::Report::new(GrinderError::Persistence(format!(
                "write {}: {e}",
                self.path.display()
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_defaults_until_saved() {
        let mut s = MemoryStore::new();
        assert_eq!(s.load().unwrap(), PersistedState::default());
        let mut st = PersistedState::default();
        st.small_runs = 3;
        s.save(&st).unwrap();
        assert_eq!(s.load().unwrap().small_runs, 3);
        assert_eq!(s.saves(), 1);
    }

    #[test]
    fn failing_store_reports_persistence_error() {
        let s = MemoryStore::new();
        s.set_failing(true);
        let err = s.load().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GrinderError>(),
            Some(GrinderError::Persistence(_))
        ));
    }
}
