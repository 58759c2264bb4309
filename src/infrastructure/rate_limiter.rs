//! Per-service rate limiter for outbound API requests.
//!
//! Sliding one-minute window: a request is admitted while fewer than
//! `limit` requests were recorded in the last 60 seconds.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Clone)]
pub struct RateLimiter {
    name: String,
    limit: u32,
    window: Duration,
    requests: Arc<Mutex<Vec<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter admitting `requests_per_minute` requests per window.
    pub fn new(name: impl Into<String>, requests_per_minute: u32) -> Self {
        Self::with_window(name, requests_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(name: impl Into<String>, limit: u32, window: Duration) -> Self {
        Self {
            name: name.into(),
            limit,
            window,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record a request if the window has room.
    ///
    /// Returns false when the limit is reached; nothing is recorded then.
    pub async fn check_and_record(&self) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.lock().await;
        requests.retain(|&time| now.duration_since(time) < self.window);

        if requests.len() < self.limit as usize {
            requests.push(now);
            true
        } else {
            false
        }
    }

    /// Wait until a slot frees up, then record the request.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let now = Instant::now();
                let mut requests = self.requests.lock().await;
                requests.retain(|&time| now.duration_since(time) < self.window);

                if requests.len() < self.limit as usize {
                    requests.push(now);
                    return;
                }
                // Oldest entry leaves the window first.
                requests
                    .first()
                    .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
                    .unwrap_or(self.window)
            };
            debug!("{} rate limit reached, waiting {:?}", self.name, wait);
            tokio::time::sleep(wait + Duration::from_millis(5)).await;
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub async fn get_stats(&self) -> RateLimitStats {
        let now = Instant::now();
        let requests = self.requests.lock().await;
        let used = requests
            .iter()
            .filter(|&&time| now.duration_since(time) < self.window)
            .count() as u32;

        let reset_in_secs = requests
            .iter()
            .find(|&&time| now.duration_since(time) < self.window)
            .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)).as_secs())
            .unwrap_or(0);

        RateLimitStats {
            limit: self.limit,
            remaining: self.limit.saturating_sub(used),
            used,
            reset_in_secs,
        }
    }
}

/// Rate limit statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct RateLimitStats {
    pub limit: u32,
    pub remaining: u32,
    pub used: u32,
    /// Seconds until the oldest request leaves the window
    pub reset_in_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_allows_requests_within_limit() {
        let limiter = RateLimiter::new("test", 5);

        for _ in 0..5 {
            assert!(limiter.check_and_record().await);
        }

        assert!(!limiter.check_and_record().await);
    }

    #[test]
    fn test_new_limiter_is_empty() {
        let limiter = RateLimiter::new("test", 3);
        let stats = tokio_test::block_on(limiter.get_stats());
        assert_eq!(stats.used, 0);
        assert_eq!(stats.remaining, 3);
        assert_eq!(limiter.limit(), 3);
    }

    #[tokio::test]
    async fn test_rate_limiter_stats() {
        let limiter = RateLimiter::new("test", 10);

        for _ in 0..3 {
            limiter.check_and_record().await;
        }

        let stats = limiter.get_stats().await;
        assert_eq!(stats.limit, 10);
        assert_eq!(stats.used, 3);
        assert_eq!(stats.remaining, 7);
        assert!(stats.reset_in_secs <= 60);
    }

    #[tokio::test]
    async fn test_window_expiry_frees_slots() {
        let limiter = RateLimiter::with_window("test", 2, Duration::from_millis(50));

        assert!(limiter.check_and_record().await);
        assert!(limiter.check_and_record().await);
        assert!(!limiter.check_and_record().await);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check_and_record().await);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_window() {
        let limiter = RateLimiter::with_window("test", 1, Duration::from_millis(40));
        limiter.acquire().await;

        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(limiter.get_stats().await.used, 1);
    }
}
