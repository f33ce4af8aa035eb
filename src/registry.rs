//! Model registry.
//!
//! The registry owns the live view of every backend model: its profile
//! (pricing, capacity, health, latency statistics) plus an in-flight
//! counter bounding per-model concurrency. Slots are taken with a
//! compare-and-swap so the `in_flight <= max_concurrent` ceiling holds
//! under any interleaving, and released through an RAII permit so a
//! cancelled or panicked dispatch can never leak a slot.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::{info, warn};

use crate::types::{ModelHealth, ModelId, ModelProfile};

/// Smoothing factor for the rolling latency average: each observation
/// contributes 1/8 of the new mean.
const LATENCY_SMOOTHING: u64 = 8;

struct ModelEntry {
    profile: RwLock<ModelProfile>,
    in_flight: AtomicU32,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
}

/// A point-in-time view of one model, for eligibility and scoring.
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    /// The profile at snapshot time.
    pub profile: ModelProfile,
    /// Requests currently dispatched to this model.
    pub in_flight: u32,
}

/// RAII guard for one unit of a model's concurrency budget.
///
/// The slot is returned when the permit drops, whatever path execution
/// takes out of the dispatch — success, failure, timeout, or task
/// cancellation.
pub struct ConcurrencyPermit {
    entry: Arc<ModelEntry>,
    model_id: ModelId,
}

impl ConcurrencyPermit {
    /// The model this permit is held against.
    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.entry.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Registry of all known backend models.
#[derive(Default)]
pub struct ModelRegistry {
    models: DashMap<ModelId, Arc<ModelEntry>>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model, replacing any existing entry with the same id.
    pub fn register(&self, profile: ModelProfile) {
        info!(model = %profile.id, provider = %profile.provider, "model registered");
        self.models.insert(
            profile.id.clone(),
            Arc::new(ModelEntry {
                profile: RwLock::new(profile),
                in_flight: AtomicU32::new(0),
                total_requests: AtomicU64::new(0),
                failed_requests: AtomicU64::new(0),
            }),
        );
    }

    /// Remove a model from the registry. In-flight dispatches keep their
    /// permits; the entry lives until the last permit drops.
    pub fn deregister(&self, id: &ModelId) {
        self.models.remove(id);
    }

    /// Snapshot one model, or `None` if unknown.
    pub fn snapshot(&self, id: &ModelId) -> Option<ModelSnapshot> {
        let entry = self.models.get(id)?;
        let profile = entry.profile.read().ok()?.clone();
        Some(ModelSnapshot {
            profile,
            in_flight: entry.in_flight.load(Ordering::Acquire),
        })
    }

    /// Snapshot every model, sorted by id for deterministic iteration.
    pub fn snapshot_all(&self) -> Vec<ModelSnapshot> {
        let mut out: Vec<ModelSnapshot> = self
            .models
            .iter()
            .filter_map(|entry| {
                let profile = entry.profile.read().ok()?.clone();
                Some(ModelSnapshot {
                    profile,
                    in_flight: entry.in_flight.load(Ordering::Acquire),
                })
            })
            .collect();
        out.sort_by(|a, b| a.profile.id.cmp(&b.profile.id));
        out
    }

    /// Try to take one concurrency slot on `id`.
    ///
    /// Returns `None` if the model is unknown or already at its
    /// `max_concurrent` ceiling. The check-and-increment is a single CAS,
    /// so concurrent acquirers can never push the count past the ceiling.
    pub fn acquire_slot(&self, id: &ModelId) -> Option<ConcurrencyPermit> {
        let entry = Arc::clone(self.models.get(id)?.value());
        let ceiling = entry.profile.read().ok()?.max_concurrent;

        entry
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < ceiling {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .ok()?;

        Some(ConcurrencyPermit {
            entry,
            model_id: id.clone(),
        })
    }

    /// Record the outcome of one dispatch: success/failure tallies, the
    /// rolling latency average, and the derived success rate.
    pub fn record_outcome(&self, id: &ModelId, success: bool, latency_ms: u64) {
        let Some(entry) = self.models.get(id) else {
            return;
        };
        let total = entry.total_requests.fetch_add(1, Ordering::AcqRel) + 1;
        let failed = if success {
            entry.failed_requests.load(Ordering::Acquire)
        } else {
            entry.failed_requests.fetch_add(1, Ordering::AcqRel) + 1
        };

        if let Ok(mut profile) = entry.profile.write() {
            profile.avg_latency_ms = if profile.avg_latency_ms == 0 {
                latency_ms
            } else {
                (profile.avg_latency_ms * (LATENCY_SMOOTHING - 1) + latency_ms)
                    / LATENCY_SMOOTHING
            };
            profile.success_rate = 100.0 * (total - failed) as f64 / total as f64;
        };
    }

    /// Apply an external health report for a model.
    pub fn set_health(&self, id: &ModelId, health: ModelHealth) {
        let Some(entry) = self.models.get(id) else {
            warn!(model = %id, "health report for unknown model");
            return;
        };
        if let Ok(mut profile) = entry.profile.write() {
            if profile.health != health {
                info!(model = %id, from = ?profile.health, to = ?health, "model health changed");
            }
            profile.health = health;
        };
    }

    /// Replace a model's profile fields from a telemetry update, keeping
    /// the live counters.
    pub fn apply_telemetry(&self, profile: ModelProfile) {
        match self.models.get(&profile.id) {
            Some(entry) => {
                if let Ok(mut stored) = entry.profile.write() {
                    *stored = profile;
                }
            }
            None => self.register(profile),
        }
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the registry holds no models.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
