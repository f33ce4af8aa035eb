//! Monthly budget ledger.
//!
//! Spend is tracked per subscription in integer micro-dollars (1 USD =
//! 1,000,000 micro-dollars) so arithmetic is exact. Three keys per
//! subscription:
//!
//! - `budget:{sub}` — micro-dollars spent this period
//! - `budget_period:{sub}` — `year*100 + month` marker of the period the
//!   spend counter belongs to
//! - `budget_alert:{sub}` — same marker, written once when the threshold
//!   alert for that period has fired
//!
//! Rollover is lazy: before any read or write, the stored period marker is
//! compared against the clock and a stale counter is zeroed. Budget is a
//! ceiling on confirmed spend — the pre-check rejects when an estimate
//! would cross the limit, but only actual cost after a successful dispatch
//! is added to the ledger. There is deliberately no refund path.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::clock::{period_marker, Clock};
use crate::store::CounterStore;
use crate::types::{Subscription, SubscriptionId};
use crate::GatewayError;

/// Receives budget threshold alerts. One alert per subscription per period.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Called when `spent_micro` first crosses `threshold` × limit.
    async fn budget_threshold_crossed(
        &self,
        sub: &SubscriptionId,
        spent_micro: i64,
        limit_micro: i64,
        threshold: f64,
    );
}

/// Default sink: a structured warn-level log line.
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn budget_threshold_crossed(
        &self,
        sub: &SubscriptionId,
        spent_micro: i64,
        limit_micro: i64,
        threshold: f64,
    ) {
        warn!(
            subscription = %sub,
            spent_micro,
            limit_micro,
            threshold,
            "budget threshold crossed"
        );
    }
}

/// The BUDGET gate: pre-check before dispatch, consume after success.
pub struct BudgetGate {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    alerts: Arc<dyn AlertSink>,
}

impl BudgetGate {
    /// Create the gate.
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            store,
            clock,
            alerts,
        }
    }

    fn spend_key(sub: &SubscriptionId) -> String {
        format!("budget:{sub}")
    }

    fn period_key(sub: &SubscriptionId) -> String {
        format!("budget_period:{sub}")
    }

    fn alert_key(sub: &SubscriptionId) -> String {
        format!("budget_alert:{sub}")
    }

    /// Zero the spend counter if the stored period marker is not the
    /// current month. Safe to call on every operation.
    async fn reset_if_new_period(&self, sub: &SubscriptionId) -> Result<i64, GatewayError> {
        let current = period_marker(self.clock.now_utc());
        let stored = self.store.get(&Self::period_key(sub)).await?;

        if stored != Some(current) {
            info!(subscription = %sub, period = current, "budget period rollover");
            self.store.set(&Self::spend_key(sub), 0, None).await?;
            self.store.set(&Self::period_key(sub), current, None).await?;
        }
        Ok(current)
    }

    /// Pre-dispatch check: would `estimated_cost_micro` fit under the
    /// subscription's ceiling? Consumes nothing.
    ///
    /// A limit of 0 means no ceiling.
    ///
    /// # Errors
    ///
    /// [`GatewayError::BudgetExceeded`] with the remaining headroom
    /// (floored at 0) when the estimate would cross the limit.
    pub async fn check(
        &self,
        sub: &Subscription,
        estimated_cost_micro: i64,
    ) -> Result<(), GatewayError> {
        if sub.monthly_budget_limit_micro == 0 {
            return Ok(());
        }
        self.reset_if_new_period(&sub.id).await?;

        let spent = self
            .store
            .get(&Self::spend_key(&sub.id))
            .await?
            .unwrap_or(0);

        if spent + estimated_cost_micro > sub.monthly_budget_limit_micro {
            let remaining = (sub.monthly_budget_limit_micro - spent).max(0);
            debug!(subscription = %sub.id, spent, remaining, "budget pre-check rejected");
            return Err(GatewayError::BudgetExceeded {
                remaining_micro: remaining,
            });
        }
        Ok(())
    }

    /// Record `actual_cost_micro` of a confirmed successful dispatch and
    /// fire the threshold alert if this spend first crosses it.
    ///
    /// The ledger may overshoot the limit slightly when the actual cost
    /// exceeds the pre-check estimate; the overshoot is bounded by one
    /// request and the next pre-check rejects.
    pub async fn consume(
        &self,
        sub: &Subscription,
        actual_cost_micro: i64,
    ) -> Result<(), GatewayError> {
        if sub.monthly_budget_limit_micro == 0 {
            return Ok(());
        }
        let period = self.reset_if_new_period(&sub.id).await?;

        let spent = self
            .store
            .incr(&Self::spend_key(&sub.id), actual_cost_micro)
            .await?;

        self.maybe_alert(sub, spent, period).await?;
        Ok(())
    }

    /// Remaining headroom this period, floored at 0. `None` when the
    /// subscription has no ceiling.
    pub async fn remaining(&self, sub: &Subscription) -> Result<Option<i64>, GatewayError> {
        if sub.monthly_budget_limit_micro == 0 {
            return Ok(None);
        }
        self.reset_if_new_period(&sub.id).await?;
        let spent = self
            .store
            .get(&Self::spend_key(&sub.id))
            .await?
            .unwrap_or(0);
        Ok(Some((sub.monthly_budget_limit_micro - spent).max(0)))
    }

    async fn maybe_alert(
        &self,
        sub: &Subscription,
        spent: i64,
        period: i64,
    ) -> Result<(), GatewayError> {
        let threshold = sub.alert_threshold;
        if !(0.0..=1.0).contains(&threshold) || threshold == 0.0 {
            return Ok(());
        }
        let trip_point = (sub.monthly_budget_limit_micro as f64 * threshold) as i64;
        if spent < trip_point {
            return Ok(());
        }

        // CAS on the alert marker dedupes across racing settlements: only
        // the request that installs this period's marker fires the alert.
        let key = Self::alert_key(&sub.id);
        let fired = match self.store.get(&key).await? {
            Some(mark) if mark == period => false,
            Some(stale) => self.store.compare_and_swap(&key, Some(stale), period).await?,
            None => self.store.compare_and_swap(&key, None, period).await?,
        };

        if fired {
            self.alerts
                .budget_threshold_crossed(
                    &sub.id,
                    spent,
                    sub.monthly_budget_limit_micro,
                    threshold,
                )
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryCounterStore;
    use crate::types::SubscriptionStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        fired: AtomicUsize,
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn budget_threshold_crossed(
            &self,
            _sub: &SubscriptionId,
            _spent: i64,
            _limit: i64,
            _threshold: f64,
        ) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn subscription(limit_micro: i64, threshold: f64) -> Subscription {
        Subscription {
            id: SubscriptionId::new("sub-1"),
            user: "ada".to_string(),
            plan_id: "pro".to_string(),
            status: SubscriptionStatus::Active,
            daily_quota_limit: -1,
            monthly_budget_limit_micro: limit_micro,
            rate_limit_qps: 0,
            priority_score: 10,
            alert_threshold: threshold,
        }
    }

    fn gate(
        clock: Arc<ManualClock>,
        sink: Arc<CountingSink>,
    ) -> BudgetGate {
        BudgetGate::new(Arc::new(MemoryCounterStore::new()), clock, sink)
    }

    fn sink() -> Arc<CountingSink> {
        Arc::new(CountingSink {
            fired: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_zero_limit_is_unlimited() {
        let gate = gate(Arc::new(ManualClock::at_date(2026, 3, 1)), sink());
        let sub = subscription(0, 0.8);

        gate.check(&sub, i64::MAX / 2).await.unwrap();
        gate.consume(&sub, 1_000_000).await.unwrap();
        assert_eq!(gate.remaining(&sub).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_check_rejects_when_estimate_crosses_limit() {
        let gate = gate(Arc::new(ManualClock::at_date(2026, 3, 1)), sink());
        let sub = subscription(1_000_000, 0.8);

        gate.consume(&sub, 900_000).await.unwrap();
        let err = gate.check(&sub, 200_000).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::BudgetExceeded {
                remaining_micro: 100_000
            }
        ));
        // A smaller estimate still fits.
        gate.check(&sub, 100_000).await.unwrap();
    }

    #[tokio::test]
    async fn test_month_rollover_resets_spend() {
        let clock = Arc::new(ManualClock::at_date(2026, 3, 15));
        let gate = gate(Arc::clone(&clock), sink());
        let sub = subscription(1_000_000, 0.8);

        gate.consume(&sub, 1_000_000).await.unwrap();
        assert!(gate.check(&sub, 1).await.is_err());

        clock.set_date(2026, 4, 1);
        gate.check(&sub, 1_000_000).await.unwrap();
        assert_eq!(gate.remaining(&sub).await.unwrap(), Some(1_000_000));
    }

    #[tokio::test]
    async fn test_alert_fires_once_per_period() {
        let s = sink();
        let clock = Arc::new(ManualClock::at_date(2026, 3, 1));
        let gate = gate(Arc::clone(&clock), Arc::clone(&s));
        let sub = subscription(1_000_000, 0.5);

        gate.consume(&sub, 600_000).await.unwrap(); // crosses 50%
        gate.consume(&sub, 100_000).await.unwrap(); // still over, no re-fire
        assert_eq!(s.fired.load(Ordering::SeqCst), 1);

        // New period re-arms the alert.
        clock.set_date(2026, 4, 1);
        gate.consume(&sub, 600_000).await.unwrap();
        assert_eq!(s.fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_alert_does_not_fire_below_threshold() {
        let s = sink();
        let gate = gate(Arc::new(ManualClock::at_date(2026, 3, 1)), Arc::clone(&s));
        let sub = subscription(1_000_000, 0.9);

        gate.consume(&sub, 500_000).await.unwrap();
        assert_eq!(s.fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remaining_floors_at_zero_on_overshoot() {
        let gate = gate(Arc::new(ManualClock::at_date(2026, 3, 1)), sink());
        let sub = subscription(1_000_000, 0.0);

        // Actual cost may exceed the pre-check estimate.
        gate.consume(&sub, 1_200_000).await.unwrap();
        assert_eq!(gate.remaining(&sub).await.unwrap(), Some(0));
    }
}
