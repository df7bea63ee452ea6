use std::ops::Range;
use std::time::Duration;

use rand::Rng;

/// Uniform jitter, in milliseconds, multiplied by `2^attempt`.
pub const BACKOFF_JITTER_MS: Range<u64> = 100..1000;

/// Delay before reconnect attempt `attempt`: `2^attempt * uniform(100, 1000)` milliseconds.
///
/// Growth is uncapped; only the arithmetic saturates.
pub fn backoff_delay<R: Rng + ?Sized>(attempt: u32, rng: &mut R) -> Duration {
    let jitter = rng.random_range(BACKOFF_JITTER_MS);
    let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);

    Duration::from_millis(jitter.saturating_mul(factor))
}
