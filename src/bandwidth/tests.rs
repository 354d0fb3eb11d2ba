use super::*;
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn test_new_limiter_is_unlimited() {
    let limiter = RateLimiter::new();
    assert!(limiter.unlimited());
    assert!(limiter.try_process(u64::MAX));
}

#[test]
fn test_update_chunks_scenario() {
    let limiter = RateLimiter::new();
    limiter.update_chunks(10, 0);

    assert!(!limiter.unlimited());
    assert_eq!(limiter.chunks(), 12);
    assert!(limiter.try_process(11));
    assert!(!limiter.try_process(2));
    assert!(limiter.try_process(1));
    assert!(!limiter.try_process(1));
}

#[test]
fn test_failed_try_process_has_no_side_effects() {
    let limiter = RateLimiter::new();
    limiter.update_chunks(100, 100);
    let before = limiter.chunks();
    assert!(!limiter.try_process(before + 1));
    assert_eq!(limiter.chunks(), before);
}

#[test]
fn test_zero_rate_is_unlimited() {
    let limiter = RateLimiter::new();
    limiter.update_chunks(10, 0);
    assert!(!limiter.unlimited());

    limiter.update_chunks(0, 50);
    assert!(limiter.unlimited());
    for amount in [0, 1, 1_000_000, u64::MAX] {
        assert!(limiter.try_process(amount));
    }
}

#[test]
fn test_pool_clamped_low_when_overshooting() {
    let limiter = RateLimiter::new();
    // Far more traffic than allowed: the error term drives the refill negative.
    limiter.update_chunks(1000, 100_000);
    assert_eq!(limiter.chunks(), 500);
}

#[test]
fn test_pool_bounds_odd_rate() {
    assert_eq!(RateLimiter::pool_bounds(3), (2, 3));
    assert_eq!(RateLimiter::pool_bounds(10), (5, 12));
    assert_eq!(RateLimiter::pool_bounds(1), (1, 1));
}

#[test]
fn test_refund() {
    let limiter = RateLimiter::new();
    limiter.update_chunks(10, 0);
    assert!(limiter.try_process(12));
    limiter.refund(4);
    assert_eq!(limiter.chunks(), 4);
}

#[test]
fn test_concurrent_try_process_never_overspends() {
    let limiter = Arc::new(RateLimiter::new());
    limiter.update_chunks(1000, 0);
    let budget = limiter.chunks();
    let granted = AtomicU64::new(0);

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..500 {
                    if limiter.try_process(1) {
                        granted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(granted.load(Ordering::Relaxed), budget);
    assert_eq!(limiter.chunks(), 0);
}

#[test]
fn test_group_requires_every_member() {
    let a = Arc::new(RateLimiter::new());
    let b = Arc::new(RateLimiter::new());
    a.update_chunks(100, 0);
    b.update_chunks(10, 0);

    let group = RateLimiterGroup::new();
    group.add(a.clone());
    group.add(b.clone());

    assert!(!group.unlimited());
    assert!(group.try_process(12));
    let a_after = a.chunks();

    // `b` is empty now; `a` must get its tokens back.
    assert!(!group.try_process(5));
    assert_eq!(a.chunks(), a_after);
    assert_eq!(b.chunks(), 0);
}

#[test]
fn test_group_unlimited_only_if_all_are() {
    let group = RateLimiterGroup::new();
    assert!(group.unlimited());

    let a: Arc<dyn RateLimit> = Arc::new(RateLimiter::new());
    let b = Arc::new(RateLimiter::new());
    group.add(a.clone());
    group.add(b.clone());
    assert!(group.unlimited());

    b.update_chunks(10, 0);
    assert!(!group.unlimited());

    assert!(group.remove(&a));
    assert!(!group.remove(&a));
    assert_eq!(group.len(), 1);
}

#[test]
fn test_global_limiter_ignores_updates() {
    let shared = Arc::new(RateLimiter::new());
    shared.update_chunks(10, 0);

    let global = GlobalLimiter::new(shared.clone());
    global.update_chunks(0, 0);
    assert!(!shared.unlimited());
    assert_eq!(shared.chunks(), 12);

    assert!(global.try_process(2));
    assert_eq!(shared.chunks(), 10);
}

#[test]
fn test_group_update_skips_global() {
    let shared = Arc::new(RateLimiter::new());
    shared.update_chunks(10, 0);
    let local = Arc::new(RateLimiter::new());

    let group = RateLimiterGroup::new();
    group.add(Arc::new(GlobalLimiter::new(shared.clone())));
    group.add(local.clone());

    group.update_chunks(1000, 0);
    assert_eq!(shared.chunks(), 12);
    assert_eq!(local.chunks(), 1200);
}

#[test]
fn test_disk_writer_limiter() {
    let pending = Arc::new(AtomicU64::new(0));
    let limiter = DiskWriterLimiter::new(pending.clone(), 1024);

    assert!(limiter.unlimited());
    assert!(limiter.try_process(1 << 20));

    pending.store(1024, Ordering::Release);
    assert!(!limiter.unlimited());
    assert!(!limiter.try_process(1));
}

#[test]
fn test_pause_limiter_in_group() {
    let paused = Arc::new(AtomicBool::new(false));
    let pause = Arc::new(PauseLimiter::new(paused.clone()));
    let group = RateLimiterGroup::new();
    group.add(pause.clone());
    group.add(Arc::new(RateLimiter::new()));

    assert!(group.try_process(100));
    pause.set_paused(true);
    assert!(!group.unlimited());
    assert!(!group.try_process(1));
}

#[test]
fn test_speed_monitor() {
    let monitor = SpeedMonitor::new();
    let start = Instant::now();
    monitor.tick_at(start);

    monitor.record(1000);
    monitor.tick_at(start + Duration::from_secs(1));
    monitor.record(3000);
    monitor.tick_at(start + Duration::from_secs(2));

    assert_eq!(monitor.total(), 4000);
    // Samples: 0 (the first empty tick), 1000 and 3000.
    assert_eq!(monitor.rate(), 4000 / 3);

    monitor.reset();
    assert_eq!(monitor.total(), 0);
    assert_eq!(monitor.rate(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_waits_for_refill() {
    let limiter = Arc::new(RateLimiter::new());
    limiter.update_chunks(10, 0);
    assert!(limiter.try_process(12));

    let waiter = {
        let limiter = limiter.clone();
        tokio::spawn(async move { acquire(limiter.as_ref(), 5).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiter.is_finished());

    limiter.update_chunks(10, 12);
    waiter.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_acquire_frame_larger_than_pool() {
    let limiter = Arc::new(RateLimiter::new());
    limiter.update_chunks(10_000, 0);
    // A full piece frame is more than a refilled pool can ever hold.
    assert!(!limiter.try_process(16_397));

    let refill = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(100));
            loop {
                tick.tick().await;
                limiter.update_chunks(10_000, 0);
            }
        })
    };

    tokio::time::timeout(Duration::from_secs(60), acquire(limiter.as_ref(), 16_397))
        .await
        .unwrap();
    refill.abort();
}

#[test]
fn test_headroom_kept_for_small_rates() {
    let limiter = RateLimiter::new();
    // 10 * 1.05 = 10.5 plus 0.4 * 0.5 of error feedback.
    limiter.update_chunks(10, 10);
    assert_eq!(limiter.chunks(), 11);
}

proptest! {
    #[test]
    fn prop_pool_within_clamp(
        ticks in prop::collection::vec((1u64..1_000_000, 0u64..2_000_000), 1..32),
    ) {
        let limiter = RateLimiter::new();
        for (max_rate, actual) in ticks {
            limiter.update_chunks(max_rate, actual);
            let chunks = limiter.chunks() as u128;
            let rate = max_rate as u128;
            prop_assert!(chunks * 2 >= rate);
            prop_assert!(chunks * 5 <= rate * 6);
        }
    }
}
