//! Fixed thresholds shared by every integration method.

/// Steps below this length mean the integration cannot make progress.
pub const SMALLEST_STEP: f64 = 1.0e-12;

/// Working step used when a run starts without an explicit seed.
pub const DEFAULT_STEP: f64 = 0.1;

/// Upper bound on any step chosen by an adaptive controller.
pub const LARGEST_STEP: f64 = 1.0;

/// Floor for scaled error norms.
pub const MIN_ACCURACY: f64 = 1.0e-16;

/// Flat buffers grow in multiples of this many values.
pub const MEM_BLOCK_SIZE: usize = 256;

/// Indicator value meaning "this event is not active".
pub const NO_EVENT: f64 = -1.0;

/// Retries allowed within a single step before the run is abandoned.
pub const MAX_RECURSIONS: usize = 25;

/// Absolute error floor for the Dormand-Prince and Radau error norms.
pub const ABS_ERR: f64 = 1.0e-13;

/// Capacity for a buffer holding `size` values: the next full block above it.
pub fn block_capacity(size: usize) -> usize {
    (size / MEM_BLOCK_SIZE + 1) * MEM_BLOCK_SIZE
}

/// Equality up to `identical_zero`, absolute or relative.
pub fn is_equal(a: f64, b: f64, identical_zero: f64) -> bool {
    let diff = (a - b).abs();
    diff < identical_zero || diff < 0.5 * identical_zero * (a.abs() + b.abs())
}
