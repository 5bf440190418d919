use std::{collections::VecDeque, time::Duration};

use tokio::{
    sync::Mutex,
    time::{sleep, Instant},
};

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window throttle for the feed's requests-per-minute cap.
pub struct RateLimiter {
    // Invariant: the instants in the log are sorted from oldest to newest
    request_log: Mutex<VecDeque<Instant>>,
    requests_per_minute: usize,
}

impl RateLimiter {
    pub fn new(requests_per_minute: usize) -> Self {
        let requests_per_minute = requests_per_minute.max(1);

        Self {
            request_log: Mutex::new(VecDeque::with_capacity(requests_per_minute)),
            requests_per_minute,
        }
    }

    /// Waits until sending one more request keeps us within the cap, then
    /// records the request. Holding the lock across the sleep serializes
    /// callers, which is what we want while throttled.
    pub async fn throttle_request(&self) {
        let mut log = self.request_log.lock().await;

        while matches!(log.front(), Some(instant) if instant.elapsed() >= WINDOW) {
            log.pop_front();
        }

        if log.len() >= self.requests_per_minute {
            if let Some(&oldest) = log.front() {
                let elapsed = oldest.elapsed();
                if elapsed < WINDOW {
                    sleep(WINDOW - elapsed).await;
                }
            }
            log.pop_front();
        }

        log.push_back(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn requests_within_cap_pass_immediately() {
        let limiter = RateLimiter::new(3);

        let before = Instant::now();
        for _ in 0..3 {
            limiter.throttle_request().await;
        }
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn request_over_cap_waits_for_window() {
        let limiter = RateLimiter::new(2);

        let before = Instant::now();
        limiter.throttle_request().await;
        limiter.throttle_request().await;
        limiter.throttle_request().await;

        assert!(Instant::now() - before >= WINDOW);
    }
}
