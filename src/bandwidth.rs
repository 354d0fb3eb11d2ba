//! Bandwidth limiting using a token bucket with error feedback.
//!
//! A [`RateLimiter`] holds a pool of byte tokens ("chunks"). Once per
//! scheduling tick the engine calls [`RateLimit::update_chunks`] with the
//! configured maximum rate and the rate actually observed during the last
//! interval; the limiter tops its pool up, correcting for over- or
//! under-shoot. I/O paths spend tokens with [`RateLimit::try_process`],
//! which never blocks: `false` means "try again later".
//!
//! Limiters compose through [`RateLimiterGroup`]; [`DiskWriterLimiter`] and
//! [`PauseLimiter`] are on/off gates sharing the same trait.
//!
//! # Example
//!
//! ```
//! use btengine::bandwidth::{RateLimit, RateLimiter};
//!
//! let limiter = RateLimiter::new();
//! assert!(limiter.unlimited());
//!
//! // 10 bytes per tick, nothing transferred yet.
//! limiter.update_chunks(10, 0);
//! assert!(limiter.try_process(11));
//! assert!(!limiter.try_process(2));
//! ```

mod gate;
mod group;
mod limiter;
mod monitor;

pub use gate::{DiskWriterLimiter, PauseLimiter};
pub use group::{GlobalLimiter, RateLimiterGroup};
pub use limiter::{RateLimit, RateLimiter};
pub use monitor::SpeedMonitor;

use crate::constants::ACQUIRE_RETRY_INTERVAL;

/// Waits until `limiter` admits `amount` bytes.
///
/// The amount is spent in pieces: when the pool cannot cover what is left,
/// the step is halved until it fits, and only a refused single byte sleeps.
/// Amounts above what one refill can hold are thereby admitted over several
/// ticks instead of never.
pub async fn acquire<L>(limiter: &L, amount: u64)
where
    L: RateLimit + ?Sized,
{
    let mut remaining = amount;
    let mut step = amount;
    while remaining > 0 {
        if limiter.try_process(step) {
            remaining -= step;
            step = remaining;
        } else if step > 1 {
            step = step.div_ceil(2);
        } else {
            tokio::time::sleep(ACQUIRE_RETRY_INTERVAL).await;
            step = remaining;
        }
    }
}

#[cfg(test)]
mod tests;
