//! Async behavior of the concurrency limiter on the compio runtime

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{init_tracing, test_timeout_guard, ConcurrencyGauge};
use compio::time::{sleep, timeout};
use futures::channel::oneshot;
use inflight::{ConcurrencyLimiter, LimiterConfig, LimiterError, UNBOUNDED};
use rstest::rstest;

// ============================================================================
// Construction
// ============================================================================

#[rstest]
#[case(1, 1)]
#[case(8, 8)]
#[case(0, UNBOUNDED)]
#[case(-1, UNBOUNDED)]
#[case(i32::MIN, UNBOUNDED)]
fn test_effective_capacity(#[case] requested: i32, #[case] expected: usize) {
    let limiter = ConcurrencyLimiter::new(requested);
    assert_eq!(limiter.capacity(), expected);
    assert_eq!(limiter.available(), expected);
    assert_eq!(limiter.occupied(), 0);
    assert_eq!(limiter.outstanding(), 0);
}

#[test]
fn test_named_limiter() {
    let limiter =
        ConcurrencyLimiter::with_config(LimiterConfig::new().with_capacity(4).with_name("io"));
    assert_eq!(limiter.name(), Some("io"));
    assert_eq!(limiter.capacity(), 4);
}

// ============================================================================
// Admission
// ============================================================================

#[compio::test]
async fn test_unbounded_admits_one_hundred_thousand() {
    let _guard = test_timeout_guard(Duration::from_secs(30));
    let limiter = ConcurrencyLimiter::new(0);

    for _ in 0..100_000 {
        limiter.acquire().await;
    }
    assert_eq!(limiter.occupied(), 100_000);
    assert_eq!(limiter.outstanding(), 100_000);

    for _ in 0..100_000 {
        limiter.release();
    }
    limiter.wait_all().await;
    assert_eq!(limiter.occupied(), 0);
}

#[compio::test]
async fn test_capacity_n_admits_exactly_n() {
    init_tracing();
    let _guard = test_timeout_guard(Duration::from_secs(10));
    let limiter = ConcurrencyLimiter::new(3);

    for _ in 0..3 {
        limiter.acquire().await;
    }
    assert_eq!(limiter.occupied(), 3);
    assert!(!limiter.try_acquire());

    let admitted = Arc::new(AtomicBool::new(false));
    let handle = {
        let limiter = limiter.clone();
        let admitted = admitted.clone();
        compio::runtime::spawn(async move {
            limiter.acquire().await;
            admitted.store(true, Ordering::SeqCst);
        })
    };

    sleep(Duration::from_millis(30)).await;
    assert!(!admitted.load(Ordering::SeqCst), "fourth acquirer must wait");

    limiter.release();
    handle.await.unwrap();

    assert!(admitted.load(Ordering::SeqCst));
    assert_eq!(limiter.occupied(), 3);
    assert_eq!(limiter.outstanding(), 3);
}

#[compio::test]
async fn test_occupancy_never_exceeds_capacity() {
    let _guard = test_timeout_guard(Duration::from_secs(30));
    let limiter = ConcurrencyLimiter::new(5);
    let gauge = ConcurrencyGauge::default();

    let mut handles = Vec::new();
    for _ in 0..200 {
        let limiter = limiter.clone();
        let gauge = gauge.clone();
        handles.push(compio::runtime::spawn(async move {
            limiter.acquire().await;
            assert!(limiter.occupied() <= limiter.capacity());
            gauge.enter();
            sleep(Duration::from_millis(1)).await;
            gauge.exit();
            limiter.release();
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert!(gauge.peak() <= 5, "peak {} exceeded capacity", gauge.peak());
    assert!(gauge.peak() >= 1);
    assert_eq!(limiter.occupied(), 0);
    assert_eq!(limiter.outstanding(), 0);
}

#[compio::test]
async fn test_admission_guard() {
    let limiter = ConcurrencyLimiter::new(2);

    {
        let _first = limiter.admit().await;
        let _second = limiter
            .admit_with_cancellation(sleep(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(limiter.occupied(), 2);
    }

    assert_eq!(limiter.occupied(), 0);
    limiter.wait_all().await;
}

// ============================================================================
// Cancellation
// ============================================================================

#[compio::test]
async fn test_already_triggered_signal_cancels() {
    let limiter = ConcurrencyLimiter::new(4);

    let result = limiter
        .acquire_with_cancellation(std::future::ready(()))
        .await;

    assert_eq!(result, Err(LimiterError::Cancelled));
    assert_eq!(limiter.occupied(), 0);
    assert_eq!(limiter.outstanding(), 0);

    // Nothing to release: the limiter is still fully available.
    limiter.wait_all().await;
    assert_eq!(limiter.available(), 4);
}

#[compio::test]
async fn test_slot_freed_before_deadline_admits() {
    let _guard = test_timeout_guard(Duration::from_secs(10));
    let limiter = ConcurrencyLimiter::new(1);
    limiter.acquire().await;

    let releaser = {
        let limiter = limiter.clone();
        compio::runtime::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            limiter.release();
        })
    };

    let start = Instant::now();
    let result = limiter
        .acquire_with_cancellation(sleep(Duration::from_millis(500)))
        .await;

    assert_eq!(result, Ok(()));
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(limiter.occupied(), 1);
    releaser.await.unwrap();
}

#[compio::test]
async fn test_free_slot_admits_despite_pending_signal() {
    let limiter = ConcurrencyLimiter::new(1);
    let (_tx, rx) = oneshot::channel::<()>();

    let result = limiter.acquire_with_cancellation(rx).await;

    assert_eq!(result, Ok(()));
    assert_eq!(limiter.occupied(), 1);
}

#[compio::test]
async fn test_deadline_scenario() {
    init_tracing();
    let _guard = test_timeout_guard(Duration::from_secs(10));
    let limiter = ConcurrencyLimiter::new(2);

    // A and B
    limiter.acquire().await;
    limiter.acquire().await;
    assert_eq!(limiter.occupied(), 2);

    // C gives up after 50ms
    let start = Instant::now();
    let result = limiter
        .acquire_with_cancellation(sleep(Duration::from_millis(50)))
        .await;
    let waited = start.elapsed();

    assert_eq!(result, Err(LimiterError::Cancelled));
    assert!(waited >= Duration::from_millis(40), "cancelled after {waited:?}");
    assert_eq!(limiter.occupied(), 2);

    // Release A
    limiter.release();
    assert_eq!(limiter.occupied(), 1);

    // D goes straight in through the waiting path
    let start = Instant::now();
    timeout(Duration::from_millis(50), limiter.acquire())
        .await
        .expect("D should be admitted without waiting");
    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(limiter.occupied(), 2);
    assert_eq!(limiter.outstanding(), 2);
}

#[compio::test]
async fn test_cancelled_waiter_hands_slot_to_next() {
    let _guard = test_timeout_guard(Duration::from_secs(10));
    let limiter = ConcurrencyLimiter::new(1);
    limiter.acquire().await;

    let (tx, rx) = oneshot::channel::<()>();
    let cancellable = {
        let limiter = limiter.clone();
        compio::runtime::spawn(async move { limiter.acquire_with_cancellation(rx).await })
    };
    let plain = {
        let limiter = limiter.clone();
        compio::runtime::spawn(async move { limiter.acquire().await })
    };

    sleep(Duration::from_millis(20)).await;

    // The release may pick the cancellable waiter, which then backs out.
    limiter.release();
    tx.send(()).unwrap();

    assert_eq!(cancellable.await.unwrap(), Err(LimiterError::Cancelled));
    plain.await.unwrap();

    assert_eq!(limiter.occupied(), 1);
    assert_eq!(limiter.outstanding(), 1);
}

// ============================================================================
// Wait for all
// ============================================================================

#[compio::test]
async fn test_wait_all_immediate_when_idle() {
    let limiter = ConcurrencyLimiter::new(3);
    limiter.wait_all().await;

    limiter.acquire().await;
    limiter.release();
    limiter.wait_all().await;
}

#[compio::test]
async fn test_wait_all_blocks_until_every_release() {
    let _guard = test_timeout_guard(Duration::from_secs(10));
    let limiter = ConcurrencyLimiter::new(8);

    for _ in 0..4 {
        limiter.acquire().await;
    }

    let finished = Arc::new(AtomicBool::new(false));
    let waiter = {
        let limiter = limiter.clone();
        let finished = finished.clone();
        compio::runtime::spawn(async move {
            limiter.wait_all().await;
            finished.store(true, Ordering::SeqCst);
        })
    };

    sleep(Duration::from_millis(20)).await;
    assert!(!finished.load(Ordering::SeqCst));

    for remaining in (0..4).rev() {
        limiter.release();
        sleep(Duration::from_millis(5)).await;
        assert_eq!(finished.load(Ordering::SeqCst), remaining == 0);
    }

    waiter.await.unwrap();
    assert!(finished.load(Ordering::SeqCst));
}

#[compio::test]
async fn test_wait_all_includes_later_admissions() {
    let _guard = test_timeout_guard(Duration::from_secs(10));
    let limiter = ConcurrencyLimiter::new(4);
    limiter.acquire().await;

    let finished = Arc::new(AtomicBool::new(false));
    let waiter = {
        let limiter = limiter.clone();
        let finished = finished.clone();
        compio::runtime::spawn(async move {
            limiter.wait_all().await;
            finished.store(true, Ordering::SeqCst);
        })
    };

    sleep(Duration::from_millis(10)).await;

    // Admitted after the waiter started: still counted.
    limiter.acquire().await;
    limiter.release();
    sleep(Duration::from_millis(10)).await;
    assert!(!finished.load(Ordering::SeqCst));

    limiter.release();
    waiter.await.unwrap();
    assert!(finished.load(Ordering::SeqCst));
}

#[compio::test]
async fn test_concurrent_wait_all_callers_wake_together() {
    let _guard = test_timeout_guard(Duration::from_secs(10));
    let limiter = ConcurrencyLimiter::new(2);
    limiter.acquire().await;

    let woken = Arc::new(AtomicUsize::new(0));
    let mut waiters = Vec::new();
    for _ in 0..3 {
        let limiter = limiter.clone();
        let woken = woken.clone();
        waiters.push(compio::runtime::spawn(async move {
            limiter.wait_all().await;
            woken.fetch_add(1, Ordering::SeqCst);
        }));
    }

    sleep(Duration::from_millis(20)).await;
    assert_eq!(woken.load(Ordering::SeqCst), 0);

    limiter.release();
    for waiter in waiters {
        waiter.await.unwrap();
    }
    assert_eq!(woken.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Misuse
// ============================================================================

#[compio::test]
async fn test_excess_release_is_ignored() {
    init_tracing();
    let limiter = ConcurrencyLimiter::new(2);

    limiter.acquire().await;
    limiter.release();
    limiter.release();

    assert_eq!(limiter.available(), 2);
    assert_eq!(limiter.outstanding(), 0);

    // Capacity is unchanged by the extra release.
    assert!(limiter.try_acquire());
    assert!(limiter.try_acquire());
    assert!(!limiter.try_acquire());
}
