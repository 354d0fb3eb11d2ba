use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Admission control for byte transfers.
///
/// Implementations use interior mutability so a single limiter can be shared
/// (usually behind an `Arc`) by every I/O path of a scope.
pub trait RateLimit: Send + Sync {
    /// True when this limiter currently admits any amount.
    fn unlimited(&self) -> bool;

    /// Spends `amount` tokens if enough are available.
    ///
    /// Returns `false` without side effects otherwise.
    fn try_process(&self, amount: u64) -> bool;

    /// Returns tokens previously taken by a successful [`try_process`].
    ///
    /// [`try_process`]: RateLimit::try_process
    fn refund(&self, amount: u64);

    /// Recomputes the token budget for the next interval.
    ///
    /// `max_rate` is the allowed bytes per interval (0 = unlimited) and
    /// `actual_rate` the bytes observed during the last one.
    fn update_chunks(&self, max_rate: u64, actual_rate: u64);
}

/// Headroom added on top of the configured rate.
const RATE_HEADROOM: f64 = 1.05;
/// Weight of the current interval's error.
const ERROR_WEIGHT: f64 = 0.4;
/// Weight of the previous interval's error.
const SAVED_ERROR_WEIGHT: f64 = 0.6;

/// A lock-free token bucket.
///
/// The pool is only ever modified through compare-and-swap, so concurrent
/// send and receive paths can spend tokens without taking a lock.
#[derive(Debug)]
pub struct RateLimiter {
    chunks: AtomicU64,
    saved_error: AtomicI64,
    unlimited: AtomicBool,
}

impl RateLimiter {
    /// Creates an unlimited limiter with an empty pool.
    pub fn new() -> Self {
        Self {
            chunks: AtomicU64::new(0),
            saved_error: AtomicI64::new(0),
            unlimited: AtomicBool::new(true),
        }
    }

    /// Tokens currently in the pool.
    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::Acquire)
    }

    /// Bounds the pool is clamped into after a refill at `max_rate`.
    ///
    /// The lower bound is rounded up and the upper bound down, so the pool
    /// always sits inside the real interval `[max_rate / 2, max_rate * 1.2]`.
    pub fn pool_bounds(max_rate: u64) -> (u64, u64) {
        let rate = max_rate as u128;
        let low = rate.div_ceil(2);
        let high = rate * 6 / 5;
        (low as u64, high as u64)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimit for RateLimiter {
    fn unlimited(&self) -> bool {
        self.unlimited.load(Ordering::Acquire)
    }

    fn try_process(&self, amount: u64) -> bool {
        if self.unlimited() {
            return true;
        }

        let mut current = self.chunks.load(Ordering::Relaxed);
        loop {
            if current < amount {
                return false;
            }
            match self.chunks.compare_exchange_weak(
                current,
                current - amount,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn refund(&self, amount: u64) {
        if self.unlimited() {
            return;
        }
        let mut current = self.chunks.load(Ordering::Relaxed);
        loop {
            match self.chunks.compare_exchange_weak(
                current,
                current.saturating_add(amount),
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    fn update_chunks(&self, max_rate: u64, actual_rate: u64) {
        if max_rate == 0 {
            self.unlimited.store(true, Ordering::Release);
            return;
        }

        let scaled = max_rate as f64 * RATE_HEADROOM;
        let error = scaled - actual_rate as f64;
        let previous = self.saved_error.swap(error.round() as i64, Ordering::AcqRel);
        let delta = ERROR_WEIGHT * error + SAVED_ERROR_WEIGHT * previous as f64;

        let (low, high) = Self::pool_bounds(max_rate);
        let mut current = self.chunks.load(Ordering::Relaxed);
        loop {
            let refilled = current as f64 + scaled + delta;
            let next = (refilled.round().max(0.0) as u128).clamp(low as u128, high as u128) as u64;
            match self.chunks.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.unlimited.store(false, Ordering::Release);
    }
}
