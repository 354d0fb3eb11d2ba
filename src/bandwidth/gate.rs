use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::limiter::RateLimit;

/// Stops network reads while too many bytes are waiting to be written to disk.
///
/// The disk writer owns the counter and adds to it when a block is queued,
/// subtracting once the block is flushed.
#[derive(Debug, Clone)]
pub struct DiskWriterLimiter {
    pending: Arc<AtomicU64>,
    threshold: u64,
}

impl DiskWriterLimiter {
    pub fn new(pending: Arc<AtomicU64>, threshold: u64) -> Self {
        Self { pending, threshold }
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

impl RateLimit for DiskWriterLimiter {
    fn unlimited(&self) -> bool {
        self.pending() < self.threshold
    }

    fn try_process(&self, _amount: u64) -> bool {
        self.unlimited()
    }

    fn refund(&self, _amount: u64) {}

    fn update_chunks(&self, _max_rate: u64, _actual_rate: u64) {}
}

/// Admits everything while running and nothing while paused.
#[derive(Debug, Clone, Default)]
pub struct PauseLimiter {
    paused: Arc<AtomicBool>,
}

impl PauseLimiter {
    pub fn new(paused: Arc<AtomicBool>) -> Self {
        Self { paused }
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

impl RateLimit for PauseLimiter {
    fn unlimited(&self) -> bool {
        !self.is_paused()
    }

    fn try_process(&self, _amount: u64) -> bool {
        !self.is_paused()
    }

    fn refund(&self, _amount: u64) {}

    fn update_chunks(&self, _max_rate: u64, _actual_rate: u64) {}
}
