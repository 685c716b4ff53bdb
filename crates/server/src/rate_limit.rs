//! Per-IP submission throttling.
//!
//! At most one *successful* POST per source IP per sliding window. Failed
//! submissions (validation, duplicates) never consume the slot, so a caller
//! can correct a bad brief immediately.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    window: Duration,
    last_success: Mutex<HashMap<IpAddr, Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_success: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a submission from `ip` may proceed right now.
    pub fn allow(&self, ip: IpAddr) -> bool {
        let last = self.last_success.lock().expect("rate limiter poisoned");
        match last.get(&ip) {
            Some(at) => at.elapsed() >= self.window,
            None => true,
        }
    }

    /// Record a successful submission from `ip`, starting its window.
    pub fn record(&self, ip: IpAddr) {
        let mut last = self.last_success.lock().expect("rate limiter poisoned");
        let now = Instant::now();
        // Expired entries are dead weight; drop them while we hold the lock
        let window = self.window;
        last.retain(|_, at| now.duration_since(*at) < window);
        last.insert(ip, now);
    }

    /// Value for the `Retry-After` response header.
    pub fn retry_after_secs(&self) -> u64 {
        self.window.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn test_first_post_is_allowed() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        assert!(limiter.allow(ip(1)));
    }

    #[test]
    fn test_second_post_within_window_is_blocked() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        limiter.record(ip(1));
        assert!(!limiter.allow(ip(1)));
        assert_eq!(limiter.retry_after_secs(), 60);
    }

    #[test]
    fn test_other_ips_are_unaffected() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        limiter.record(ip(1));
        assert!(limiter.allow(ip(2)));
    }

    #[test]
    fn test_window_expires() {
        let limiter = RateLimiter::new(Duration::from_millis(10));
        limiter.record(ip(1));
        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.allow(ip(1)));
    }

    #[test]
    fn test_unrecorded_attempts_do_not_consume_the_slot() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        assert!(limiter.allow(ip(1)));
        // A 400 never calls record(); the next attempt is still allowed
        assert!(limiter.allow(ip(1)));
    }
}
