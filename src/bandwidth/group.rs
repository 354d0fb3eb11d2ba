use std::sync::Arc;

use parking_lot::RwLock;

use super::limiter::RateLimit;

/// A set of limiters that must all agree before bytes may flow.
///
/// Typically holds the global limiter, a per-torrent limiter and the disk
/// and pause gates.
#[derive(Default)]
pub struct RateLimiterGroup {
    members: RwLock<Vec<Arc<dyn RateLimit>>>,
}

impl RateLimiterGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, limiter: Arc<dyn RateLimit>) {
        self.members.write().push(limiter);
    }

    /// Removes `limiter` (compared by pointer). Returns whether it was a member.
    pub fn remove(&self, limiter: &Arc<dyn RateLimit>) -> bool {
        let mut members = self.members.write();
        let before = members.len();
        members.retain(|m| !Arc::ptr_eq(m, limiter));
        members.len() != before
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

impl RateLimit for RateLimiterGroup {
    fn unlimited(&self) -> bool {
        self.members.read().iter().all(|m| m.unlimited())
    }

    fn try_process(&self, amount: u64) -> bool {
        let members = self.members.read();
        for (i, member) in members.iter().enumerate() {
            if !member.try_process(amount) {
                // Give back what the earlier members already handed out.
                for charged in &members[..i] {
                    charged.refund(amount);
                }
                return false;
            }
        }
        true
    }

    fn refund(&self, amount: u64) {
        for member in self.members.read().iter() {
            member.refund(amount);
        }
    }

    fn update_chunks(&self, max_rate: u64, actual_rate: u64) {
        for member in self.members.read().iter() {
            member.update_chunks(max_rate, actual_rate);
        }
    }
}

/// Shares a centrally refilled limiter without letting its owners refill it.
///
/// Each torrent's group holds one of these around the engine-wide limiter;
/// `update_chunks` calls arriving through the group are dropped so only the
/// engine's own tick sets the global budget.
#[derive(Clone)]
pub struct GlobalLimiter {
    inner: Arc<dyn RateLimit>,
}

impl GlobalLimiter {
    pub fn new(inner: Arc<dyn RateLimit>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<dyn RateLimit> {
        &self.inner
    }
}

impl RateLimit for GlobalLimiter {
    fn unlimited(&self) -> bool {
        self.inner.unlimited()
    }

    fn try_process(&self, amount: u64) -> bool {
        self.inner.try_process(amount)
    }

    fn refund(&self, amount: u64) {
        self.inner.refund(amount);
    }

    fn update_chunks(&self, _max_rate: u64, _actual_rate: u64) {}
}
