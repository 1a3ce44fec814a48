//! Gateway-wide admission control: up to two independent token buckets (QPS,
//! TPM). Grounded in the original token-bucket refill formula and the host
//! repo's `Bucket` struct / per-resource-lock convention in its ingress
//! rate-limit middleware.

use std::sync::Mutex;
use std::time::Instant;

use crate::error::RateLimitReason;

/// A single token bucket: `capacity` max tokens, refilled continuously at
/// `refill_per_sec` tokens/sec, lazily caught up on each admission check.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// True if `cost` tokens are available right now (after refill), without consuming them.
    fn can_afford(&mut self, now: Instant, cost: f64) -> bool {
        self.refill(now);
        self.tokens >= cost
    }

    fn consume(&mut self, cost: f64) {
        self.tokens = (self.tokens - cost).max(0.0);
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub allowed: bool,
    pub reason: Option<RateLimitReason>,
}

impl Admission {
    fn allow() -> Self {
        Self { allowed: true, reason: None }
    }
    fn deny(reason: RateLimitReason) -> Self {
        Self { allowed: false, reason: Some(reason) }
    }
}

/// Combined QPS + TPM admission layer. Either bucket may be absent (config
/// did not set a limit), in which case it never declines.
///
/// Both present buckets must allow for a request to be admitted; if only one
/// would decline, no tokens are consumed from the other at all (neither
/// bucket is touched on an overall decline). If both would decline, QPS is
/// reported first.
pub struct RateLimiter {
    qps: Option<Mutex<TokenBucket>>,
    tpm: Option<Mutex<TokenBucket>>,
}

impl RateLimiter {
    pub fn new(max_qps: Option<f64>, max_tpm: Option<f64>) -> Self {
        Self {
            qps: max_qps.map(|q| Mutex::new(TokenBucket::new(q, q))),
            tpm: max_tpm.map(|t| Mutex::new(TokenBucket::new(t, t / 60.0))),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Check admission for a request estimated to cost `estimated_tokens`.
    /// QPS always costs 1 token; TPM costs `estimated_tokens`.
    pub fn check(&self, estimated_tokens: u64) -> Admission {
        let now = Instant::now();

        let qps_ok = match &self.qps {
            Some(bucket) => bucket.lock().unwrap().can_afford(now, 1.0),
            None => true,
        };
        if !qps_ok {
            return Admission::deny(RateLimitReason::QpsLimit);
        }

        let tpm_ok = match &self.tpm {
            Some(bucket) => bucket.lock().unwrap().can_afford(now, estimated_tokens as f64),
            None => true,
        };
        if !tpm_ok {
            return Admission::deny(RateLimitReason::TpmLimit);
        }

        // Both checks passed; now actually consume. A cancelled/timed-out
        // attempt must never reach this point having already decremented —
        // callers only call `check` once per admitted request, at admission
        // time, before the Provider call begins.
        if let Some(bucket) = &self.qps {
            bucket.lock().unwrap().consume(1.0);
        }
        if let Some(bucket) = &self.tpm {
            bucket.lock().unwrap().consume(estimated_tokens as f64);
        }
        Admission::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_buckets_configured_never_declines() {
        let limiter = RateLimiter::disabled();
        for _ in 0..1000 {
            assert!(limiter.check(100_000).allowed);
        }
    }

    #[test]
    fn qps_bucket_declines_once_capacity_exhausted() {
        let limiter = RateLimiter::new(Some(2.0), None);
        assert!(limiter.check(1).allowed);
        assert!(limiter.check(1).allowed);
        let third = limiter.check(1);
        assert!(!third.allowed);
        assert_eq!(third.reason, Some(RateLimitReason::QpsLimit));
    }

    #[test]
    fn tpm_bucket_declines_on_large_request() {
        let limiter = RateLimiter::new(None, Some(100.0));
        let first = limiter.check(50);
        assert!(first.allowed);
        let second = limiter.check(80);
        assert!(!second.allowed);
        assert_eq!(second.reason, Some(RateLimitReason::TpmLimit));
    }

    #[test]
    fn qps_is_reported_first_when_both_would_decline() {
        let limiter = RateLimiter::new(Some(1.0), Some(1.0));
        assert!(limiter.check(1).allowed);
        let decline = limiter.check(1000);
        assert!(!decline.allowed);
        assert_eq!(decline.reason, Some(RateLimitReason::QpsLimit));
    }

    #[test]
    fn declined_bucket_leaves_the_other_bucket_untouched() {
        let limiter = RateLimiter::new(Some(1.0), Some(1000.0));
        assert!(limiter.check(10).allowed);
        // QPS is now exhausted; TPM still has ~990 tokens available.
        let decline = limiter.check(10);
        assert!(!decline.allowed);
        assert_eq!(decline.reason, Some(RateLimitReason::QpsLimit));
    }

    #[test]
    fn tokens_never_exceed_capacity_or_drop_below_zero() {
        let mut bucket = TokenBucket::new(5.0, 5.0);
        bucket.consume(100.0);
        assert!(bucket.tokens >= 0.0);
        bucket.refill(Instant::now() + std::time::Duration::from_secs(10));
        assert!(bucket.tokens <= bucket.capacity);
    }
}
