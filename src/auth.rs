//! API key authentication.
//!
//! Credentials are never stored or compared in the clear: the resolver
//! hashes the raw key with SHA-256 and looks the digest up in the
//! [`SubscriptionDirectory`]. Successful resolutions are cached for a short
//! window keyed by the digest, so a hot key costs one hash per request
//! rather than a directory round-trip. Revocation invalidates the cache
//! entry immediately via [`KeyResolver::invalidate`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::directory::{KeyStatus, SubscriptionDirectory};
use crate::types::{Plan, Subscription};
use crate::GatewayError;

/// How long a successful resolution stays cached.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Everything the pipeline needs to know about an authenticated caller.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    /// Short prefix of the raw key, safe to log.
    pub key_prefix: String,
    /// The owning subscription.
    pub subscription: Subscription,
    /// The subscription's plan.
    pub plan: Plan,
}

struct CachedEntry {
    resolved: ResolvedKey,
    cached_at: Instant,
}

/// Resolves raw API credentials into subscription context.
pub struct KeyResolver {
    directory: Arc<dyn SubscriptionDirectory>,
    cache: DashMap<String, CachedEntry>,
}

impl KeyResolver {
    /// Create a resolver over the given directory.
    pub fn new(directory: Arc<dyn SubscriptionDirectory>) -> Self {
        Self {
            directory,
            cache: DashMap::new(),
        }
    }

    /// Hex SHA-256 digest of a raw credential.
    pub fn hash_key(raw: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Resolve a raw credential into its subscription and plan.
    ///
    /// Checks the cache first; on a miss, looks the digest up in the
    /// directory and verifies key status and subscription status before
    /// caching. Failures are never cached.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidKey`] — digest matches no stored key
    /// - [`GatewayError::RevokedKey`] — key exists but is revoked
    /// - [`GatewayError::InactiveSubscription`] — subscription is suspended
    ///   or expired
    /// - [`GatewayError::Store`] — the directory could not answer; the
    ///   request is denied rather than allowed through unauthenticated
    pub async fn resolve(&self, raw_key: &str) -> Result<ResolvedKey, GatewayError> {
        let hash = Self::hash_key(raw_key);

        if let Some(entry) = self.cache.get(&hash) {
            if entry.cached_at.elapsed() < CACHE_TTL {
                debug!(key_prefix = %entry.resolved.key_prefix, "auth cache hit");
                return Ok(entry.resolved.clone());
            }
            drop(entry);
            self.cache.remove(&hash);
        }

        let record = self
            .directory
            .find_key(&hash)
            .await
            .map_err(|e| GatewayError::Store(e.to_string()))?
            .ok_or(GatewayError::InvalidKey)?;

        if record.status == KeyStatus::Revoked {
            warn!(key_prefix = %record.key_prefix, "revoked key presented");
            return Err(GatewayError::RevokedKey);
        }

        let subscription = self
            .directory
            .subscription(&record.subscription_id)
            .await
            .map_err(|e| GatewayError::Store(e.to_string()))?
            .ok_or(GatewayError::InvalidKey)?;

        if !subscription.status.is_active() {
            return Err(GatewayError::InactiveSubscription);
        }

        let plan = self
            .directory
            .plan(&subscription.plan_id)
            .await
            .map_err(|e| GatewayError::Store(e.to_string()))?
            .ok_or_else(|| {
                GatewayError::Config(format!("plan not found: {}", subscription.plan_id))
            })?;

        let resolved = ResolvedKey {
            key_prefix: record.key_prefix.clone(),
            subscription,
            plan,
        };

        self.cache.insert(
            hash,
            CachedEntry {
                resolved: resolved.clone(),
                cached_at: Instant::now(),
            },
        );

        Ok(resolved)
    }

    /// Drop a cached resolution by credential hash. Call this when a key is
    /// revoked so the revocation takes effect immediately.
    pub fn invalidate(&self, key_hash: &str) {
        self.cache.remove(key_hash);
    }
}
