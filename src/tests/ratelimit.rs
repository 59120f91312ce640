use crate::ratelimit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;

// Rate limiter tests run under tokio's paused clock: sleeps auto-advance
// virtual time, so a 60-second window costs no wall time.

#[tokio::test(start_paused = true)]
async fn admits_up_to_rpm_without_waiting() {
    let limiter = RateLimiter::new(6);
    let started = tokio::time::Instant::now();
    for _ in 0..6 {
        limiter.acquire("stub").await;
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(limiter.in_window("stub").await, 6);
}

#[tokio::test(start_paused = true)]
async fn twelve_calls_at_rpm_six_span_the_window() {
    let limiter = RateLimiter::new(6);
    let started = tokio::time::Instant::now();
    for _ in 0..12 {
        limiter.acquire("stub").await;
    }
    // The 7th call must wait for the first window to age out.
    assert!(
        started.elapsed() >= Duration::from_secs(60),
        "12 calls at rpm=6 finished in {:?}",
        started.elapsed()
    );
}

#[tokio::test(start_paused = true)]
async fn windows_are_per_provider() {
    let limiter = RateLimiter::new(2);
    limiter.acquire("alpha").await;
    limiter.acquire("alpha").await;

    // A different provider has its own window and admits immediately.
    let started = tokio::time::Instant::now();
    limiter.acquire("beta").await;
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn rpm_zero_parks_until_reconfigured() {
    let limiter = Arc::new(RateLimiter::new(0));

    let waiter = {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move {
            limiter.acquire("stub").await;
        })
    };

    // Parked, not crashed: the acquire stays pending.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!waiter.is_finished());

    // Raising the limit releases the waiter.
    limiter.set_rpm(1);
    tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter should complete after reconfiguration")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn window_drains_as_time_passes() {
    let limiter = RateLimiter::new(3);
    for _ in 0..3 {
        limiter.acquire("stub").await;
    }
    assert_eq!(limiter.in_window("stub").await, 3);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(limiter.in_window("stub").await, 0);
}
