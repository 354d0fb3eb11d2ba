use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::constants::SPEED_MONITOR_SAMPLES;

/// Measures the transfer rate fed into [`RateLimit::update_chunks`].
///
/// I/O paths call [`record`](Self::record) lock-free; the engine tick calls
/// [`tick`](Self::tick) once per interval to fold the interval's bytes into a
/// moving average.
///
/// [`RateLimit::update_chunks`]: super::RateLimit::update_chunks
#[derive(Debug)]
pub struct SpeedMonitor {
    total: AtomicU64,
    interval: AtomicU64,
    window: Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    samples: VecDeque<u64>,
    last_tick: Instant,
}

impl SpeedMonitor {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            interval: AtomicU64::new(0),
            window: Mutex::new(Window {
                samples: VecDeque::with_capacity(SPEED_MONITOR_SAMPLES),
                last_tick: Instant::now(),
            }),
        }
    }

    pub fn record(&self, bytes: u64) {
        self.total.fetch_add(bytes, Ordering::Relaxed);
        self.interval.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Bytes recorded since creation.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    /// Closes the current interval at `now`.
    pub fn tick_at(&self, now: Instant) {
        let bytes = self.interval.swap(0, Ordering::Relaxed);
        let mut window = self.window.lock();
        let elapsed = now.duration_since(window.last_tick).as_secs_f64();
        window.last_tick = now;

        let rate = if elapsed > 0.0 {
            (bytes as f64 / elapsed) as u64
        } else {
            bytes
        };

        if window.samples.len() == SPEED_MONITOR_SAMPLES {
            window.samples.pop_front();
        }
        window.samples.push_back(rate);
    }

    /// Average bytes per second over the recorded intervals.
    pub fn rate(&self) -> u64 {
        let window = self.window.lock();
        if window.samples.is_empty() {
            return 0;
        }
        window.samples.iter().sum::<u64>() / window.samples.len() as u64
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.interval.store(0, Ordering::Relaxed);
        let mut window = self.window.lock();
        window.samples.clear();
        window.last_tick = Instant::now();
    }
}

impl Default for SpeedMonitor {
    fn default() -> Self {
        Self::new()
    }
}
