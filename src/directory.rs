//! Subscription directory.
//!
//! The directory is the system of record for API keys, subscriptions, and
//! plans. The gateway only ever reads it, so the seam is a lookup trait;
//! production can back it with a database while tests and the bundled
//! single-node deployment use [`MemoryDirectory`].

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Plan, Subscription, SubscriptionId};

/// Lifecycle state of an API key, independent of its subscription's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// Key may authenticate.
    Active,
    /// Key has been revoked and must never authenticate again.
    Revoked,
}

/// A stored API key. Only the SHA-256 digest of the raw credential is kept;
/// the raw key never touches the directory.
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    /// Hex SHA-256 of the raw credential.
    pub key_hash: String,
    /// First characters of the raw key, for log correlation only.
    pub key_prefix: String,
    /// Current lifecycle state.
    pub status: KeyStatus,
    /// Owning subscription.
    pub subscription_id: SubscriptionId,
}

/// Directory lookup failures.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The backing store could not answer.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Read-only lookup surface over keys, subscriptions, and plans.
#[async_trait]
pub trait SubscriptionDirectory: Send + Sync {
    /// Look up a key record by credential hash.
    async fn find_key(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, DirectoryError>;

    /// Look up a subscription by id.
    async fn subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, DirectoryError>;

    /// Look up a plan by id.
    async fn plan(&self, id: &str) -> Result<Option<Plan>, DirectoryError>;
}

// ── In-memory implementation ───────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    keys: HashMap<String, ApiKeyRecord>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    plans: HashMap<String, Plan>,
}

/// Process-local directory, populated from config at startup and mutable at
/// runtime for key revocation and subscription updates.
#[derive(Default)]
pub struct MemoryDirectory {
    inner: RwLock<Inner>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key record, keyed by its credential hash.
    pub fn upsert_key(&self, record: ApiKeyRecord) {
        if let Ok(mut inner) = self.inner.write() {
            inner.keys.insert(record.key_hash.clone(), record);
        }
    }

    /// Insert or replace a subscription.
    pub fn upsert_subscription(&self, sub: Subscription) {
        if let Ok(mut inner) = self.inner.write() {
            inner.subscriptions.insert(sub.id.clone(), sub);
        }
    }

    /// Insert or replace a plan.
    pub fn upsert_plan(&self, plan: Plan) {
        if let Ok(mut inner) = self.inner.write() {
            inner.plans.insert(plan.id.clone(), plan);
        }
    }

    /// Mark a key revoked. Returns whether the key existed.
    pub fn revoke_key(&self, key_hash: &str) -> bool {
        if let Ok(mut inner) = self.inner.write() {
            if let Some(record) = inner.keys.get_mut(key_hash) {
                record.status = KeyStatus::Revoked;
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl SubscriptionDirectory for MemoryDirectory {
    async fn find_key(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, DirectoryError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(inner.keys.get(key_hash).cloned())
    }

    async fn subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, DirectoryError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(inner.subscriptions.get(id).cloned())
    }

    async fn plan(&self, id: &str) -> Result<Option<Plan>, DirectoryError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(inner.plans.get(id).cloned())
    }
}
