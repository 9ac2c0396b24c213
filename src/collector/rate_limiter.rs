use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitPolicy {
    /// Minimum spacing between two consecutive requests
    pub min_delay: Duration,
    pub window: Duration,
    /// Requests allowed in any trailing `window`, at least 1
    pub max_per_window: usize,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        RateLimitPolicy {
            min_delay: Duration::from_secs(2),
            window: Duration::from_secs(60),
            max_per_window: 25,
        }
    }
}

/// Sliding-window limiter in front of the upstream providers.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    issued: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> RateLimiter {
        let capacity = policy.max_per_window.max(1);
        RateLimiter {
            policy: RateLimitPolicy { max_per_window: capacity, ..policy },
            issued: VecDeque::with_capacity(capacity),
        }
    }

    /// How long a request arriving at `now` has to wait. Zero means it may
    /// go right away.
    pub fn wait_time(&mut self, now: Instant) -> Duration {
        let window = self.policy.window;
        while let Some(oldest) = self.issued.front() {
            if *oldest + window <= now {
                self.issued.pop_front();
            } else {
                break;
            }
        }

        let spacing = self
            .issued
            .back()
            .map(|last| (*last + self.policy.min_delay).saturating_duration_since(now))
            .unwrap_or_default();

        let quota = if self.issued.len() >= self.policy.max_per_window {
            let oldest = self.issued[self.issued.len() - self.policy.max_per_window];
            (oldest + window).saturating_duration_since(now)
        } else {
            Duration::from_secs(0)
        };

        spacing.max(quota)
    }

    pub fn record(&mut self, at: Instant) {
        self.issued.push_back(at);
    }

    /// Waits until a request is allowed, then counts it.
    pub async fn acquire(&mut self) {
        loop {
            let now = Instant::now();
            let wait = self.wait_time(now);
            if wait == Duration::from_secs(0) {
                self.record(now);
                return;
            }
            debug!("Rate limit: waiting {:?}", wait);
            actix_rt::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(min_delay_ms: u64, max_per_window: usize) -> RateLimitPolicy {
        RateLimitPolicy {
            min_delay: Duration::from_millis(min_delay_ms),
            window: Duration::from_secs(60),
            max_per_window,
        }
    }

    /// Drives the limiter with a simulated clock, returning the grant times.
    fn simulate(limiter: &mut RateLimiter, requests: usize) -> Vec<Instant> {
        let mut now = Instant::now();
        let mut granted = Vec::with_capacity(requests);
        for _ in 0..requests {
            let wait = limiter.wait_time(now);
            now += wait;
            assert_eq!(limiter.wait_time(now), Duration::from_secs(0));
            limiter.record(now);
            granted.push(now);
        }
        granted
    }

    #[test]
    fn test_first_request_goes_immediately() {
        let mut limiter = RateLimiter::new(policy(1000, 10));
        assert_eq!(limiter.wait_time(Instant::now()), Duration::from_secs(0));
    }

    #[test]
    fn test_min_delay_between_requests() {
        let mut limiter = RateLimiter::new(policy(1000, 100));
        let start = Instant::now();
        limiter.record(start);
        assert_eq!(limiter.wait_time(start + Duration::from_millis(300)), Duration::from_millis(700));
        assert_eq!(limiter.wait_time(start + Duration::from_millis(1500)), Duration::from_secs(0));
    }

    #[test]
    fn test_cap_blocks_until_window_rolls_over() {
        let mut limiter = RateLimiter::new(policy(0, 3));
        let start = Instant::now();
        for i in 0..3 {
            limiter.record(start + Duration::from_secs(i));
        }
        let wait = limiter.wait_time(start + Duration::from_secs(10));
        assert_eq!(wait, Duration::from_secs(50));
        assert_eq!(limiter.wait_time(start + Duration::from_secs(60)), Duration::from_secs(0));
    }

    #[test]
    fn test_no_sliding_window_exceeds_cap() {
        let cap = 7;
        let mut limiter = RateLimiter::new(policy(250, cap));
        let granted = simulate(&mut limiter, 60);

        let window = Duration::from_secs(60);
        for (i, start) in granted.iter().enumerate() {
            let in_window = granted[i..]
                .iter()
                .take_while(|t| **t < *start + window)
                .count();
            assert!(in_window <= cap, "{} requests in one window", in_window);
        }
    }

    #[test]
    fn test_zero_cap_is_treated_as_one() {
        let mut limiter = RateLimiter::new(policy(0, 0));
        let granted = simulate(&mut limiter, 3);
        assert_eq!(granted[1] - granted[0], Duration::from_secs(60));
    }

    #[actix_rt::test]
    async fn test_acquire_without_limits_does_not_block() {
        let mut limiter = RateLimiter::new(policy(0, 1000));
        for _ in 0..5 {
            limiter.acquire().await;
        }
    }
}
