//! Sliding-window request pacing.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

use stacksift_shared::RateLimitSettings;

/// Allows at most `max_requests` acquisitions in any rolling `window`.
///
/// [`RateLimiter::acquire`] waits for a slot instead of failing. Waiters
/// queue on `waiters`, so they are served in arrival order; the window
/// itself is only locked for bookkeeping and never across a sleep.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    requests: Mutex<VecDeque<Instant>>,
    waiters: Mutex<()>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(VecDeque::with_capacity(max_requests)),
            waiters: Mutex::new(()),
        }
    }

    fn evict_expired(&self, requests: &mut VecDeque<Instant>, now: Instant) {
        while requests
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            requests.pop_front();
        }
    }

    /// Wait until a request is allowed, then record it.
    pub async fn acquire(&self) {
        let _turn = self.waiters.lock().await;
        loop {
            let wait = {
                let mut requests = self.requests.lock().await;
                let now = Instant::now();
                self.evict_expired(&mut requests, now);
                match requests.front().copied() {
                    Some(oldest) if requests.len() >= self.max_requests => {
                        (oldest + self.window).saturating_duration_since(now)
                    }
                    _ => {
                        requests.push_back(now);
                        return;
                    }
                }
            };
            info!(wait_secs = wait.as_secs_f64(), "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Record a request only if a slot is free right now.
    pub async fn try_acquire(&self) -> bool {
        let mut requests = self.requests.lock().await;
        let now = Instant::now();
        self.evict_expired(&mut requests, now);
        if requests.len() < self.max_requests {
            requests.push_back(now);
            true
        } else {
            false
        }
    }

    /// Slots free right now. Does not record anything.
    pub async fn remaining(&self) -> usize {
        let requests = self.requests.lock().await;
        let now = Instant::now();
        let active = requests
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count();
        self.max_requests.saturating_sub(active)
    }

    /// Forget every recorded request.
    pub async fn reset(&self) {
        self.requests.lock().await.clear();
    }
}

impl From<&RateLimitSettings> for RateLimiter {
    fn from(settings: &RateLimitSettings) -> Self {
        Self::new(settings.max_requests, settings.window)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from(&RateLimitSettings::default())
    }
}
