//! Exponential-backoff schedule for status checks.
//!
//! Waiting callers grow their delay with [`next_delay`] after every
//! check; the background sweep derives a job's due time from its
//! attempt count with [`delay_for_attempt`], so both follow the same
//! curve.

use std::time::Duration;

use rand::Rng;

use crate::config::PollOptions;

/// Calculate the next backoff delay from the current delay and options.
///
/// The result is clamped to `min_interval..=max_interval`.
pub fn next_delay(current: Duration, options: &PollOptions) -> Duration {
    let next_ms = (current.as_millis() as f64 * options.multiplier) as u64;
    Duration::from_millis(next_ms)
        .min(options.max_interval)
        .max(options.min_interval)
}

/// Delay that should follow the `attempts`-th status check.
///
/// `attempts <= 1` yields `min_interval`.
pub fn delay_for_attempt(attempts: u32, options: &PollOptions) -> Duration {
    let exponent = attempts.saturating_sub(1).min(64) as i32;
    let ms = options.min_interval.as_millis() as f64 * options.multiplier.powi(exponent);
    let capped = ms.min(options.max_interval.as_millis() as f64);
    Duration::from_millis(capped as u64).max(options.min_interval)
}

/// Spread a delay randomly by `±jitter` so concurrent waiters do not
/// hit the queue in lockstep.
pub fn with_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let spread = jitter.min(1.0);
    let factor = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}
