//! Rate limiter (C10): a token bucket per client identity (IP or
//! authenticated user UUID), continuously refilled, with a background sweep
//! of idle buckets so memory doesn't grow unboundedly for ephemeral clients.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::error::Result;

struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self, required: f64) -> bool {
        self.refill();
        if self.tokens >= required {
            self.tokens -= required;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub active_clients: usize,
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

/// Per-client token-bucket throttle. Cloning shares the underlying map.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: std::sync::Arc<DashMap<String, Bucket>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: std::sync::Arc::new(DashMap::new()),
            config,
        }
    }

    /// Checks out `tokens` (default 1) for `client_id`, creating the bucket
    /// on first use. Fails open on any internal error — callers should log a
    /// WARNING and proceed rather than reject the request.
    pub fn check(&self, client_id: &str, tokens: f64) -> Result<bool> {
        let mut bucket = self.buckets.entry(client_id.to_string()).or_insert_with(|| {
            Bucket::new(self.config.burst_size as f64, self.config.refill_rate_per_sec())
        });
        Ok(bucket.try_take(tokens))
    }

    pub fn get_client_status(&self, client_id: &str) -> Option<ClientStatus> {
        self.buckets.get(client_id).map(|bucket| ClientStatus {
            tokens: bucket.tokens,
            capacity: bucket.capacity,
            refill_rate: bucket.refill_rate,
        })
    }

    pub fn get_stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            active_clients: self.buckets.len(),
            requests_per_minute: self.config.requests_per_minute,
            burst_size: self.config.burst_size,
        }
    }

    /// Drops buckets whose `last_refill` is older than `2 * cleanup_interval`.
    /// Run periodically by a background task.
    pub fn sweep_idle(&self) {
        let threshold = self.config.cleanup_interval() * 2;
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < threshold);
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.config.cleanup_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 10,
            cleanup_interval_minutes: 5,
        }
    }

    #[test]
    fn admits_up_to_burst_size_then_rejects() {
        let limiter = RateLimiter::new(config());
        for _ in 0..10 {
            assert!(limiter.check("client-1", 1.0).unwrap());
        }
        assert!(!limiter.check("client-1", 1.0).unwrap());
    }

    #[test]
    fn zero_burst_admits_nothing() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 0,
            cleanup_interval_minutes: 5,
        });
        assert!(!limiter.check("client-1", 1.0).unwrap());
    }

    #[test]
    fn distinct_clients_have_independent_buckets() {
        let limiter = RateLimiter::new(config());
        for _ in 0..10 {
            assert!(limiter.check("client-1", 1.0).unwrap());
        }
        assert!(limiter.check("client-2", 1.0).unwrap());
    }

    #[test]
    fn status_reports_capacity_and_rate() {
        let limiter = RateLimiter::new(config());
        limiter.check("client-1", 3.0).unwrap();
        let status = limiter.get_client_status("client-1").unwrap();
        assert_eq!(status.capacity, 10.0);
        assert_eq!(status.refill_rate, 1.0);
    }

    #[test]
    fn sweep_removes_idle_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 10,
            cleanup_interval_minutes: 0,
        });
        limiter.check("client-1", 1.0).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        limiter.sweep_idle();
        assert!(limiter.get_client_status("client-1").is_none());
    }
}
