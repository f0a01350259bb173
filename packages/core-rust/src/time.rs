//! Logical time.
//!
//! Timeouts and response times are expressed in logical units. A process-wide
//! scale factor maps one unit to a number of wall-clock milliseconds, so tests
//! can compress or stretch every timeout at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default milliseconds per logical unit.
pub const DEFAULT_SCALE_MS: u64 = 100;

static SCALE_MS: AtomicU64 = AtomicU64::new(DEFAULT_SCALE_MS);

/// Current milliseconds per logical unit.
#[must_use]
pub fn scale() -> u64 {
    SCALE_MS.load(Ordering::Relaxed)
}

/// Reconfigures the scale factor. A zero scale is clamped to 1 ms per unit.
pub fn set_scale(ms_per_unit: u64) {
    let ms_per_unit = ms_per_unit.max(1);
    SCALE_MS.store(ms_per_unit, Ordering::Relaxed);
    tracing::debug!(ms_per_unit, "logical time scale changed");
}

/// Wall-clock duration of `units` at the current scale.
#[must_use]
pub fn to_duration(units: u64) -> Duration {
    scaled(units, scale())
}

/// Wall-clock duration of `units` at an explicit scale.
#[must_use]
pub fn scaled(units: u64, ms_per_unit: u64) -> Duration {
    Duration::from_millis(units.saturating_mul(ms_per_unit.max(1)))
}

/// Whole logical units contained in `elapsed` at the current scale.
#[must_use]
pub fn to_units(elapsed: Duration) -> u64 {
    let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    millis / scale()
}
