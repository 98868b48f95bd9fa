//! Raw-count to grams conversion with tare, calibration averaging and
//! plausibility checks. Lives on the control task; the sampler thread only
//! ships raw counts.
use std::collections::VecDeque;

use thiserror::Error;

use crate::config::ScaleCfg;

/// Samples within this many grams of the newest one count as settled for a tare.
const TARE_BAND_G: f64 = 0.5;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum SensorFault {
    #[error("non-finite reading")]
    NonFinite,
    #[error("implausible reading: {0:.1} g")]
    OutOfRange(f32),
}

#[derive(Debug, Clone)]
pub struct ScaleSource {
    max_plausible_g: f32,
    window: usize,
    ring: VecDeque<i32>,
    /// Raw counts at zero mass. `None` until the first sample (boot tare).
    zero_counts: Option<f64>,
    scale_factor: f32,
    last_good_g: f32,
}

impl ScaleSource {
    pub fn new(cfg: &ScaleCfg, scale_factor: f32) -> Self {
        let window = cfg.calibration_samples.max(1);
        let mut s = Self {
            max_plausible_g: cfg.max_plausible_g,
            window,
            ring: VecDeque::with_capacity(window),
            zero_counts: None,
            scale_factor: 1.0,
            last_good_g: 0.0,
        };
        s.set_scale_factor(scale_factor);
        s
    }

    /// Convert and record one raw sample. On fault the last good weight is
    /// kept and the sample stays out of the window.
    pub fn ingest(&mut self, raw: i32) -> Result<f32, SensorFault> {
        let zero = match self.zero_counts {
            Some(z) => z,
            None => {
                tracing::info!(zero_counts = raw, "initial tare from first sample");
                self.zero_counts = Some(f64::from(raw));
                f64::from(raw)
            }
        };

        let grams = ((f64::from(raw) - zero) / f64::from(self.scale_factor)) as f32;
        if !grams.is_finite() {
            return Err(SensorFault::NonFinite);
        }
        if grams.abs() > self.max_plausible_g {
            return Err(SensorFault::OutOfRange(grams));
        }
        if self.ring.len() == self.window {
            self.ring.pop_front();
        }
        self.ring.push_back(raw);
        self.last_good_g = grams;
        Ok(grams)
    }

    /// Last known-good net weight.
    pub fn read_grams(&self) -> f32 {
        self.last_good_g
    }

    /// Zero the scale at the newest settled level: the mean of the trailing
    /// run of samples that agree with the latest one. Older samples taken
    /// before a load change do not pull the zero.
    ///
    /// With no samples yet, the next sample becomes the zero point.
    pub fn tare(&mut self) {
        self.zero_counts = self.settled_raw();
        self.last_good_g = 0.0;
        tracing::debug!(zero_counts = ?self.zero_counts, "tare");
    }

    /// Mean of the recent samples minus the zero point, in raw counts.
    pub fn mean_net_raw(&self) -> Option<f64> {
        let mean = self.mean_raw()?;
        Some(mean - self.zero_counts.unwrap_or(mean))
    }

    pub fn samples(&self) -> usize {
        self.ring.len()
    }

    /// Drop buffered samples so the window refills with fresh readings only.
    pub fn restart_window(&mut self) {
        self.ring.clear();
    }

    pub fn window_full(&self) -> bool {
        self.ring.len() >= self.window
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    /// Install a new counts-per-gram factor. Zero or non-finite factors fall back to 1.0.
    pub fn set_scale_factor(&mut self, factor: f32) {
        if factor.is_finite() && factor != 0.0 {
            self.scale_factor = factor;
        } else {
            tracing::warn!(factor, "invalid scale factor, using 1.0");
            self.scale_factor = 1.0;
        }
        if let (Some(&raw), Some(zero)) = (self.ring.back(), self.zero_counts) {
            let g = ((f64::from(raw) - zero) / f64::from(self.scale_factor)) as f32;
            if g.is_finite() && g.abs() <= self.max_plausible_g {
                self.last_good_g = g;
            }
        }
    }

    fn settled_raw(&self) -> Option<f64> {
        let newest = f64::from(*self.ring.back()?);
        let band = TARE_BAND_G * f64::from(self.scale_factor).abs();
        let (sum, n) = self
            .ring
            .iter()
            .rev()
            .map(|&r| f64::from(r))
            .take_while(|r| (r - newest).abs() <= band)
            .fold((0.0, 0usize), |(sum, n), r| (sum + r, n + 1));
        Some(sum / n as f64)
    }

    fn mean_raw(&self) -> Option<f64> {
        if self.ring.is_empty() {
            return None;
        }
        let sum: f64 = self.ring.iter().map(|&r| f64::from(r)).sum();
        Some(sum / self.ring.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(factor: f32) -> ScaleSource {
        ScaleSource::new(&ScaleCfg::default(), factor)
    }

    #[test]
    fn first_sample_becomes_zero() {
        let mut s = source(100.0);
        assert_eq!(s.ingest(5_000), Ok(0.0));
        let g = s.ingest(5_500).unwrap();
        assert!((g - 5.0).abs() < 1e-6);
    }

    #[test]
    fn tare_twice_reads_zero_both_times() {
        let mut s = source(100.0);
        s.ingest(1_000).unwrap();
        for _ in 0..10 {
            s.ingest(2_000).unwrap();
        }
        s.tare();
        assert_eq!(s.read_grams(), 0.0);
        s.tare();
        assert_eq!(s.read_grams(), 0.0);
        assert_eq!(s.ingest(2_000), Ok(0.0));
    }

    #[test]
    fn implausible_reading_holds_last_good() {
        let mut s = source(1.0);
        s.ingest(0).unwrap();
        s.ingest(12).unwrap();
        assert_eq!(s.ingest(1_000_000), Err(SensorFault::OutOfRange(1_000_000.0)));
        assert!((s.read_grams() - 12.0).abs() < 1e-6);
    }

    #[test]
    fn zero_factor_falls_back_to_unity() {
        let s = source(0.0);
        assert_eq!(s.scale_factor(), 1.0);
        let s = source(f32::NAN);
        assert_eq!(s.scale_factor(), 1.0);
    }

    #[test]
    fn implausible_reading_stays_out_of_window() {
        let mut s = source(1.0);
        s.ingest(0).unwrap();
        s.ingest(10).unwrap();
        assert!(s.ingest(5_000_000).is_err());
        assert_eq!(s.samples(), 2);
        assert!((s.mean_net_raw().unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn tare_ignores_samples_before_a_load_change() {
        let mut s = source(100.0);
        for _ in 0..6 {
            s.ingest(0).unwrap();
        }
        for _ in 0..4 {
            s.ingest(20_000).unwrap();
        }
        s.tare();
        assert_eq!(s.ingest(20_000), Ok(0.0));
    }

    #[test]
    fn tare_averages_noise_around_the_settled_level() {
        let mut s = source(100.0);
        s.ingest(0).unwrap();
        for raw in [1_000, 1_020, 980, 1_010, 990] {
            s.ingest(raw).unwrap();
        }
        s.tare();
        let g = s.ingest(1_000).unwrap();
        assert!(g.abs() < 1e-6, "{g}");
    }

    #[test]
    fn tare_after_a_glitch_uses_good_samples() {
        let mut s = source(100.0);
        for _ in 0..8 {
            s.ingest(0).unwrap();
        }
        assert!(s.ingest(8_000_000).is_err());
        s.tare();
        let g = s.ingest(300).unwrap();
        assert!((g - 3.0).abs() < 1e-6, "{g}");
    }

    #[test]
    fn restarted_window_holds_only_fresh_samples() {
        let mut s = source(1.0);
        s.ingest(100).unwrap();
        s.tare();
        for raw in [150, 250] {
            s.ingest(raw).unwrap();
        }
        s.restart_window();
        assert!(!s.window_full());
        for _ in 0..ScaleCfg::default().calibration_samples {
            s.ingest(300).unwrap();
        }
        assert!(s.window_full());
        assert!((s.mean_net_raw().unwrap() - 200.0).abs() < 1e-9);
    }
}
