//! Atomic counter store.
//!
//! All global mutable counters — daily quota, monthly budget ledger, period
//! and alert markers — live behind the [`CounterStore`] trait so that the
//! in-memory implementation used here and in tests can be swapped for a
//! distributed store (Redis, etc.) without touching gateway logic. Every
//! operation is a single atomic step from the caller's point of view.
//!
//! [`MemoryCounterStore`] keeps entries in a [`DashMap`]; per-key mutations
//! run under the map's entry guard, which serializes concurrent writers on
//! the same key. Expiry is lazy: an expired entry is treated as missing and
//! removed on next access.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// Faults from the underlying store. The admission pipeline treats these as
/// fatal and fails closed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or returned garbage.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Result of a conditional decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The counter held at least `units`; it was decremented.
    Consumed {
        /// Value after the decrement.
        remaining: i64,
    },
    /// The counter held fewer than `units`; nothing was consumed.
    Insufficient {
        /// Current value, unchanged.
        remaining: i64,
    },
    /// No live entry for this key (never set, or expired).
    Missing,
}

/// An injectable key-value store with atomic numeric operations and TTLs.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the current value, or `None` if the key has no live entry.
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Unconditionally write a value, replacing any TTL.
    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Write only if the key has no live entry. Returns whether the write
    /// happened.
    async fn set_if_absent(
        &self,
        key: &str,
        value: i64,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Add `delta` (which may be negative), creating the key at `delta` if
    /// absent. Returns the new value.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Atomically decrement by `units` only if the current value is at
    /// least `units`. Never drives the counter negative and never partially
    /// consumes.
    async fn consume_if_at_least(&self, key: &str, units: i64)
        -> Result<ConsumeOutcome, StoreError>;

    /// Replace the value with `new` only if the current state matches
    /// `expected` (`None` = key absent). Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<i64>,
        new: i64,
    ) -> Result<bool, StoreError>;

    /// Drop the key.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ── In-memory implementation ───────────────────────────────────────────────

struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |t| t > Instant::now())
    }
}

/// Process-local [`CounterStore`] backed by a [`DashMap`].
///
/// Suitable for a single-instance gateway and for tests. Per-key atomicity
/// comes from the map's entry guard.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.live() {
                return Ok(Some(entry.value));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: i64,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut wrote = false;
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| {
                wrote = true;
                Entry {
                    value,
                    expires_at: ttl.map(|d| Instant::now() + d),
                }
            });
        if !wrote && !entry.live() {
            // Expired entry: replace in place under the same guard.
            entry.value = value;
            entry.expires_at = ttl.map(|d| Instant::now() + d);
            wrote = true;
        }
        Ok(wrote)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: 0,
            expires_at: None,
        });
        if !entry.live() {
            entry.value = 0;
            entry.expires_at = None;
        }
        entry.value += delta;
        Ok(entry.value)
    }

    async fn consume_if_at_least(
        &self,
        key: &str,
        units: i64,
    ) -> Result<ConsumeOutcome, StoreError> {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(ConsumeOutcome::Missing);
        };
        if !entry.live() {
            drop(entry);
            self.entries.remove(key);
            return Ok(ConsumeOutcome::Missing);
        }
        if entry.value >= units {
            entry.value -= units;
            Ok(ConsumeOutcome::Consumed {
                remaining: entry.value,
            })
        } else {
            Ok(ConsumeOutcome::Insufficient {
                remaining: entry.value,
            })
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<i64>,
        new: i64,
    ) -> Result<bool, StoreError> {
        match expected {
            None => self.set_if_absent(key, new, None).await,
            Some(want) => {
                let Some(mut entry) = self.entries.get_mut(key) else {
                    return Ok(false);
                };
                if entry.live() && entry.value == want {
                    entry.value = new;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_missing_key_returns_none() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let store = MemoryCounterStore::new();
        store.set("k", 42, None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_missing() {
        let store = MemoryCounterStore::new();
        store
            .set("k", 1, Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent_first_write_wins() {
        let store = MemoryCounterStore::new();
        assert!(store.set_if_absent("k", 10, None).await.unwrap());
        assert!(!store.set_if_absent("k", 99, None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_set_if_absent_replaces_expired_entry() {
        let store = MemoryCounterStore::new();
        store
            .set("k", 1, Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.set_if_absent("k", 7, None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_incr_creates_and_accumulates() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.incr("k", 5).await.unwrap(), 5);
        assert_eq!(store.incr("k", 3).await.unwrap(), 8);
        assert_eq!(store.incr("k", -2).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_consume_if_at_least_consumes_exactly_once() {
        let store = MemoryCounterStore::new();
        store.set("k", 2, None).await.unwrap();

        let first = store.consume_if_at_least("k", 1).await.unwrap();
        assert_eq!(first, ConsumeOutcome::Consumed { remaining: 1 });

        let second = store.consume_if_at_least("k", 1).await.unwrap();
        assert_eq!(second, ConsumeOutcome::Consumed { remaining: 0 });

        let third = store.consume_if_at_least("k", 1).await.unwrap();
        assert_eq!(third, ConsumeOutcome::Insufficient { remaining: 0 });
    }

    #[tokio::test]
    async fn test_consume_if_at_least_missing_key() {
        let store = MemoryCounterStore::new();
        assert_eq!(
            store.consume_if_at_least("ghost", 1).await.unwrap(),
            ConsumeOutcome::Missing
        );
    }

    #[tokio::test]
    async fn test_consume_rejects_without_partial_consumption() {
        let store = MemoryCounterStore::new();
        store.set("k", 3, None).await.unwrap();
        let outcome = store.consume_if_at_least("k", 5).await.unwrap();
        assert_eq!(outcome, ConsumeOutcome::Insufficient { remaining: 3 });
        // Value untouched.
        assert_eq!(store.get("k").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_compare_and_swap_matches_expected() {
        let store = MemoryCounterStore::new();
        store.set("k", 1, None).await.unwrap();
        assert!(store.compare_and_swap("k", Some(1), 2).await.unwrap());
        assert!(!store.compare_and_swap("k", Some(1), 3).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_compare_and_swap_none_expects_absent() {
        let store = MemoryCounterStore::new();
        assert!(store.compare_and_swap("k", None, 5).await.unwrap());
        assert!(!store.compare_and_swap("k", None, 9).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_remove_drops_key() {
        let store = MemoryCounterStore::new();
        store.set("k", 1, None).await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_consume_never_oversubscribes() {
        let store = Arc::new(MemoryCounterStore::new());
        store.set("quota", 50, None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..200 {
            let s = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                matches!(
                    s.consume_if_at_least("quota", 1).await,
                    Ok(ConsumeOutcome::Consumed { .. })
                )
            }));
        }

        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap_or(false) {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 50, "exactly the quota must be admitted");
        assert_eq!(store.get("quota").await.unwrap(), Some(0));
    }
}
