//! Monotonic nanosecond clock shared by producer and consumer processes.
//!
//! `sent_at_ns` travels on the wire, so both ends must read the same clock.
//! On unix this is `CLOCK_MONOTONIC`, which is system-wide (not per process).

use crate::utils::error::{LinkError, LinkResult};
use log::error;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static LAST_READING_NS: AtomicU64 = AtomicU64::new(0);
static FAILURE_LOGGED: AtomicBool = AtomicBool::new(false);

/// Reads the shared clock, surfacing a failed read. Binaries call this once at
/// startup so an unusable clock is fatal instead of silently skewing ages.
#[cfg(unix)]
pub fn try_monotonic_ns() -> LinkResult<u64> {
    use nix::time::{ClockId, clock_gettime};

    let ts = clock_gettime(ClockId::CLOCK_MONOTONIC).map_err(|e| LinkError::Clock(e.into()))?;
    let ns = (ts.tv_sec() as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec() as u64);
    LAST_READING_NS.fetch_max(ns, Ordering::Relaxed);
    Ok(ns)
}

#[cfg(not(unix))]
pub fn try_monotonic_ns() -> LinkResult<u64> {
    // No shared monotonic source here; wall clock is the closest cross-process option.
    let ns = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| LinkError::Clock(std::io::Error::other(e)))?
        .as_nanos() as u64;
    LAST_READING_NS.fetch_max(ns, Ordering::Relaxed);
    Ok(ns)
}

/// Infallible read for the hot path. A failed read is logged once and the last
/// good reading is returned, so ages stall rather than jump.
pub fn monotonic_ns() -> u64 {
    match try_monotonic_ns() {
        Ok(ns) => ns,
        Err(e) => {
            if !FAILURE_LOGGED.swap(true, Ordering::Relaxed) {
                error!("[Clock] {}; reusing last reading", e);
            }
            LAST_READING_NS.load(Ordering::Relaxed)
        }
    }
}

/// Milliseconds elapsed from `earlier_ns` to `now_ns`; clamps to zero when the
/// producer's stamp is ahead of ours.
#[inline]
pub fn elapsed_ms(earlier_ns: u64, now_ns: u64) -> f64 {
    now_ns.saturating_sub(earlier_ns) as f64 / 1e6
}
