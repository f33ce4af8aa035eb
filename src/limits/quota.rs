//! Daily request quota.
//!
//! Quota is a per-subscription counter keyed by UTC calendar day:
//! `quota:{subscription}:{YYYY-MM-DD}`. The counter is initialised lazily
//! from the subscription's limit the first time a day is touched (a
//! first-write-wins insert, so racing requests agree on one counter) and
//! decremented with a conditional consume that can never go negative.
//! Rollover needs no scheduled job — a new day simply means a new key, and
//! the old one ages out on its TTL.

use std::sync::Arc;

use tracing::debug;

use crate::clock::{day_key, Clock};
use crate::store::{ConsumeOutcome, CounterStore};
use crate::types::{SubscriptionId, UNLIMITED_QUOTA};
use crate::GatewayError;

/// Keep dead day-counters around long enough for late readers, then drop.
const DAY_KEY_TTL_SECS: u64 = 48 * 3600;

/// Retries when initialisation races with expiry.
const INIT_RETRIES: usize = 3;

/// What a successful quota consume looked like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOutcome {
    /// Subscription has no daily limit; nothing was counted.
    Unlimited,
    /// One unit was consumed.
    Consumed {
        /// Requests still available today.
        remaining: i64,
    },
}

/// The QUOTA gate.
pub struct QuotaGate {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaGate {
    /// Create the gate over a counter store and clock.
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn key(&self, sub: &SubscriptionId) -> String {
        format!("quota:{}:{}", sub, day_key(self.clock.now_utc()))
    }

    /// Consume one quota unit for `sub` whose daily limit is `limit`.
    ///
    /// [`UNLIMITED_QUOTA`] short-circuits without touching the store. A
    /// limit of 0 rejects every request.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::QuotaExceeded`] when today's counter is at 0
    /// - [`GatewayError::Store`] when the store fails (fail closed)
    pub async fn consume(
        &self,
        sub: &SubscriptionId,
        limit: i64,
    ) -> Result<QuotaOutcome, GatewayError> {
        if limit == UNLIMITED_QUOTA {
            return Ok(QuotaOutcome::Unlimited);
        }
        if limit <= 0 {
            return Err(GatewayError::QuotaExceeded { remaining: 0 });
        }

        let key = self.key(sub);
        for _ in 0..INIT_RETRIES {
            match self.store.consume_if_at_least(&key, 1).await? {
                ConsumeOutcome::Consumed { remaining } => {
                    debug!(subscription = %sub, remaining, "quota consumed");
                    return Ok(QuotaOutcome::Consumed { remaining });
                }
                ConsumeOutcome::Insufficient { remaining } => {
                    return Err(GatewayError::QuotaExceeded { remaining });
                }
                ConsumeOutcome::Missing => {
                    // First touch of this day: seed the counter and try
                    // again. If we lose the insert race, another request
                    // seeded it and the retry consumes normally.
                    self.store
                        .set_if_absent(
                            &key,
                            limit,
                            Some(std::time::Duration::from_secs(DAY_KEY_TTL_SECS)),
                        )
                        .await?;
                }
            }
        }

        Err(GatewayError::Store(format!(
            "quota counter for {key} kept disappearing"
        )))
    }

    /// Peek at today's remaining quota without consuming. `None` when the
    /// day has not been touched yet (full quota remains).
    pub async fn remaining(&self, sub: &SubscriptionId) -> Result<Option<i64>, GatewayError> {
        Ok(self.store.get(&self.key(sub)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryCounterStore;

    fn gate_with_clock(clock: Arc<ManualClock>) -> QuotaGate {
        QuotaGate::new(Arc::new(MemoryCounterStore::new()), clock)
    }

    #[tokio::test]
    async fn test_unlimited_quota_never_counts() {
        let gate = gate_with_clock(Arc::new(ManualClock::at_date(2026, 3, 1)));
        let sub = SubscriptionId::new("s");
        for _ in 0..100 {
            assert_eq!(
                gate.consume(&sub, UNLIMITED_QUOTA).await.unwrap(),
                QuotaOutcome::Unlimited
            );
        }
        assert_eq!(gate.remaining(&sub).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quota_counts_down_then_rejects() {
        let gate = gate_with_clock(Arc::new(ManualClock::at_date(2026, 3, 1)));
        let sub = SubscriptionId::new("s");

        assert_eq!(
            gate.consume(&sub, 2).await.unwrap(),
            QuotaOutcome::Consumed { remaining: 1 }
        );
        assert_eq!(
            gate.consume(&sub, 2).await.unwrap(),
            QuotaOutcome::Consumed { remaining: 0 }
        );

        let err = gate.consume(&sub, 2).await.unwrap_err();
        assert!(matches!(err, GatewayError::QuotaExceeded { remaining: 0 }));
    }

    #[tokio::test]
    async fn test_zero_limit_rejects_immediately() {
        let gate = gate_with_clock(Arc::new(ManualClock::at_date(2026, 3, 1)));
        let err = gate
            .consume(&SubscriptionId::new("s"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::QuotaExceeded { remaining: 0 }));
    }

    #[tokio::test]
    async fn test_new_day_restores_full_quota() {
        let clock = Arc::new(ManualClock::at_date(2026, 3, 1));
        let gate = gate_with_clock(Arc::clone(&clock));
        let sub = SubscriptionId::new("s");

        gate.consume(&sub, 1).await.unwrap();
        assert!(gate.consume(&sub, 1).await.is_err());

        clock.set_date(2026, 3, 2);
        assert_eq!(
            gate.consume(&sub, 1).await.unwrap(),
            QuotaOutcome::Consumed { remaining: 0 }
        );
    }

    #[tokio::test]
    async fn test_concurrent_consumes_admit_exactly_limit() {
        let store = Arc::new(MemoryCounterStore::new());
        let clock: Arc<ManualClock> = Arc::new(ManualClock::at_date(2026, 3, 1));
        let gate = Arc::new(QuotaGate::new(
            Arc::clone(&store) as Arc<dyn CounterStore>,
            clock,
        ));
        let sub = SubscriptionId::new("s");

        let mut handles = Vec::new();
        for _ in 0..50 {
            let g = Arc::clone(&gate);
            let s = sub.clone();
            handles.push(tokio::spawn(async move { g.consume(&s, 10).await.is_ok() }));
        }

        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap_or(false) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }
}
