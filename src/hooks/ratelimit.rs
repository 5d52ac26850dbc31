//! Per-source token bucket rate limiter (§4.4).
//!
//! Three fields and a `now - last_refill` computation — pulling in a
//! governor-style crate for something this small is the over-engineered
//! choice the corpus doesn't take for primitives this size anywhere in the
//! pack.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket per source (e.g. remote IP or instance key), capacity and
/// refill rate configured once at startup.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec as f64,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Attempt to consume one token for `source`. Returns `Ok(())` if
    /// allowed, or `Err(retry_after)` with the wait before the next token
    /// will be available.
    pub fn check(&self, source: &str) -> std::result::Result<(), Duration> {
        let mut guard = self.buckets.lock().expect("rate limiter lock poisoned");
        let now = Instant::now();
        let bucket = guard.entry(source.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait_secs = deficit / self.refill_per_sec;
            Err(Duration::from_secs_f64(wait_secs.max(0.0)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_burst_up_to_capacity_then_rejects() {
        let limiter = RateLimiter::new(3, 1);
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_err());
    }

    #[test]
    fn sources_are_isolated() {
        let limiter = RateLimiter::new(1, 1);
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_err());
        assert!(limiter.check("b").is_ok());
    }

    #[test]
    fn sixty_first_request_in_one_second_bursts_429() {
        let limiter = RateLimiter::new(60, 60);
        for _ in 0..60 {
            assert!(limiter.check("source").is_ok());
        }
        assert!(limiter.check("source").is_err());
    }
}
