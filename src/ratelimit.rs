//! Sliding-window request rate limiting, per provider.
//!
//! Each provider gets a 60-second window modeled as an ordered queue of
//! admission timestamps. `acquire()` prunes the window, admits if under the
//! cap, and otherwise sleeps until the oldest stamp ages out. Waiters queue
//! FIFO on the window mutex. An RPM of zero parks every caller until the
//! limit is reconfigured; it is a valid (if drastic) configuration, not a
//! crash.

use crate::logging::{log_debug, log_trace};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);
/// Poll interval while parked on an RPM of zero.
const PARKED_POLL: Duration = Duration::from_millis(250);

/// Process-scoped sliding-window rate limiter.
///
/// Constructed once at startup from
/// [`RateLimitConfig`](crate::config::RateLimitConfig) and shared by
/// reference. The RPM cell is atomic so configuration changes take effect
/// without tearing down waiters.
#[derive(Debug)]
pub struct RateLimiter {
    rpm: AtomicU32,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            rpm: AtomicU32::new(requests_per_minute),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Current requests-per-minute cap.
    pub fn rpm(&self) -> u32 {
        self.rpm.load(Ordering::Relaxed)
    }

    /// Reconfigure the cap. Takes effect on the next admission check of
    /// every waiter, including callers parked on an RPM of zero.
    pub fn set_rpm(&self, requests_per_minute: u32) {
        log_debug!(rpm = requests_per_minute, "Rate limit reconfigured");
        self.rpm.store(requests_per_minute, Ordering::Relaxed);
    }

    /// Block until this provider's window has room, then consume one slot.
    ///
    /// Guarantees: no more than RPM successful acquisitions complete in any
    /// 60-second span per provider; waiters are served FIFO by the window
    /// mutex queue.
    pub async fn acquire(&self, provider: &str) {
        loop {
            let rpm = self.rpm();
            if rpm == 0 {
                log_trace!(provider = %provider, "Rate limiter parked on rpm=0");
                tokio::time::sleep(PARKED_POLL).await;
                continue;
            }

            let wait = {
                let mut windows = self.windows.lock().await;
                let window = windows.entry(provider.to_string()).or_default();
                let now = Instant::now();
                while let Some(front) = window.front() {
                    if now.duration_since(*front) >= WINDOW {
                        window.pop_front();
                    } else {
                        break;
                    }
                }
                if window.len() < rpm as usize {
                    window.push_back(now);
                    None
                } else {
                    // Sleep until the oldest admission leaves the window.
                    window
                        .front()
                        .map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest)))
                }
            };

            match wait {
                None => return,
                Some(delay) => {
                    log_trace!(
                        provider = %provider,
                        delay_ms = delay.as_millis(),
                        "Rate limit window full, waiting"
                    );
                    tokio::time::sleep(delay.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Admissions currently inside this provider's window.
    pub async fn in_window(&self, provider: &str) -> usize {
        let mut windows = self.windows.lock().await;
        let Some(window) = windows.get_mut(provider) else {
            return 0;
        };
        let now = Instant::now();
        while let Some(front) = window.front() {
            if now.duration_since(*front) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        window.len()
    }
}
