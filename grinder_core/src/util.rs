//! Time/period helpers and small filesystem utilities.
use std::{fs, io::Write, path::Path};

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;
/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Period in microseconds for a rate in Hz.
/// `hz` is clamped to at least 1 and the result is at least 1 µs.
#[inline]
pub fn period_us(hz: u32) -> u64 {
    (MICROS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Period in milliseconds for a rate in Hz.
/// `hz` is clamped to at least 1 and the result is at least 1 ms.
#[inline]
pub fn period_ms(hz: u32) -> u64 {
    (MILLIS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Number of ticks at `tick_hz` covering `ms`, rounded up.
#[inline]
pub fn ms_to_ticks(ms: u64, tick_hz: u32) -> u64 {
    (ms.saturating_mul(u64::from(tick_hz.max(1)))).div_ceil(MILLIS_PER_SEC)
}

/// Write `bytes` to a sibling temp file, fsync it, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}
