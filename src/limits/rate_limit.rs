//! Per-subscription token-bucket rate limiting.
//!
//! Each subscription gets a bucket holding up to `qps` tokens that refills
//! continuously at `qps` tokens per second. A request takes exactly one
//! token; an empty bucket rejects with the time until a full token is back.
//! Buckets live in a [`DashMap`] and all mutation happens under the map's
//! entry guard, so refill-and-take is atomic per subscription.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::types::SubscriptionId;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    /// A token was taken; proceed.
    Allowed,
    /// Bucket empty. Retry after the given interval.
    Limited {
        /// Time until the bucket holds one full token.
        retry_after: Duration,
    },
}

/// Token-bucket limiter keyed by subscription.
#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<SubscriptionId, Bucket>,
}

impl RateLimiter {
    /// Create a limiter with no buckets yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take one token for `sub` at `qps` tokens per second.
    ///
    /// A `qps` of 0 means the subscription has no rate limit and always
    /// passes. New buckets start full, so a subscription's first burst can
    /// use its whole capacity.
    pub fn check(&self, sub: &SubscriptionId, qps: u32) -> RateDecision {
        if qps == 0 {
            return RateDecision::Allowed;
        }
        let capacity = f64::from(qps);

        let mut bucket = self.buckets.entry(sub.clone()).or_insert_with(|| Bucket {
            tokens: capacity,
            last_refill: Instant::now(),
        });

        // Continuous refill since last touch, capped at capacity.
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * capacity).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision::Allowed
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_after = Duration::from_secs_f64(deficit / capacity);
            debug!(subscription = %sub, ?retry_after, "rate limited");
            RateDecision::Limited { retry_after }
        }
    }

    /// Drop a subscription's bucket (e.g. after its limit changed).
    pub fn reset(&self, sub: &SubscriptionId) {
        self.buckets.remove(sub);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_qps_never_limits() {
        let limiter = RateLimiter::new();
        let sub = SubscriptionId::new("s");
        for _ in 0..1000 {
            assert_eq!(limiter.check(&sub, 0), RateDecision::Allowed);
        }
    }

    #[test]
    fn test_burst_up_to_capacity_then_limited() {
        let limiter = RateLimiter::new();
        let sub = SubscriptionId::new("s");

        for i in 0..5 {
            assert_eq!(limiter.check(&sub, 5), RateDecision::Allowed, "burst {i}");
        }
        match limiter.check(&sub, 5) {
            RateDecision::Limited { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_millis(210));
            }
            RateDecision::Allowed => panic!("sixth request must be limited"),
        }
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let limiter = RateLimiter::new();
        let sub = SubscriptionId::new("s");

        // Drain a 100-qps bucket, then wait long enough for one token back.
        for _ in 0..100 {
            assert_eq!(limiter.check(&sub, 100), RateDecision::Allowed);
        }
        assert!(matches!(
            limiter.check(&sub, 100),
            RateDecision::Limited { .. }
        ));

        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(limiter.check(&sub, 100), RateDecision::Allowed);
    }

    #[test]
    fn test_subscriptions_have_independent_buckets() {
        let limiter = RateLimiter::new();
        let a = SubscriptionId::new("a");
        let b = SubscriptionId::new("b");

        assert_eq!(limiter.check(&a, 1), RateDecision::Allowed);
        assert!(matches!(limiter.check(&a, 1), RateDecision::Limited { .. }));
        // `b` still has a full bucket.
        assert_eq!(limiter.check(&b, 1), RateDecision::Allowed);
    }

    #[test]
    fn test_reset_restores_full_bucket() {
        let limiter = RateLimiter::new();
        let sub = SubscriptionId::new("s");

        assert_eq!(limiter.check(&sub, 1), RateDecision::Allowed);
        assert!(matches!(
            limiter.check(&sub, 1),
            RateDecision::Limited { .. }
        ));
        limiter.reset(&sub);
        assert_eq!(limiter.check(&sub, 1), RateDecision::Allowed);
    }
}
