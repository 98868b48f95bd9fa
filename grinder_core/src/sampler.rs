//! Background scale sampling.
//!
//! Spawns a thread that owns the `Scale` and pushes raw readings through a
//! bounded channel. Failed reads are counted so the control task can treat
//! them as sensor faults.
//!
//! Each `Sampler` spawns exactly one thread, which is shut down and joined
//! when the `Sampler` is dropped.
use crossbeam_channel as xch;
use grinder_traits::Scale;
use grinder_traits::clock::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

pub struct Sampler {
    rx: xch::Receiver<i32>,
    errors: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Sampler {
    /// Read `scale` at `hz`, waiting at most `timeout` per conversion.
    pub fn spawn<S, C>(mut scale: S, hz: u32, timeout: Duration, clock: C) -> Self
    where
        S: Scale + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let (tx, rx) = xch::bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let errors = Arc::new(AtomicU64::new(0));
        let errors_clone = errors.clone();
        let period = Duration::from_micros(crate::util::period_us(hz));

        let join_handle = std::thread::Builder::new()
            .name("grinder-sampler".into())
            .spawn(move || {
                loop {
                    if shutdown_clone.load(Ordering::Relaxed) {
                        tracing::debug!("sampler thread received shutdown signal");
                        break;
                    }

                    let started = clock.now();
                    match scale.read(timeout) {
                        Ok(v) => match tx.try_send(v) {
                            // The consumer only wants the newest value; a full slot
                            // means it has not caught up yet and this one is dropped.
                            Ok(()) | Err(xch::TrySendError::Full(_)) => {}
                            Err(xch::TrySendError::Disconnected(_)) => {
                                tracing::debug!("sampler consumer disconnected, exiting thread");
                                break;
                            }
                        },
                        Err(e) => {
                            errors_clone.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(error = %e, "scale read failed");
                        }
                    }

                    if shutdown_clone.load(Ordering::Relaxed) {
                        break;
                    }
                    let spent = clock.now().saturating_duration_since(started);
                    clock.sleep(period.saturating_sub(spent));
                }
                tracing::trace!("sampler thread exiting cleanly");
            });

        let join_handle = match join_handle {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn sampler thread");
                None
            }
        };

        Self {
            rx,
            errors,
            shutdown,
            join_handle,
        }
    }

    /// Newest reading since the last call, if any.
    pub fn latest(&self) -> Option<i32> {
        self.rx.try_iter().last()
    }

    /// Total failed reads since spawn.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.join_handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // The thread exits between reads or after the current read returns
        // (bounded by the sensor timeout).
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("sampler thread joined"),
                Err(e) => tracing::warn!(?e, "sampler thread panicked during shutdown"),
            }
        }
    }
}
