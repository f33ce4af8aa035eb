//! Domain records shared across the gateway.
//!
//! These are the read-side inputs supplied by the provisioning collaborator
//! ([`crate::directory`]) plus the usage record the gateway writes back.
//! Live counters — quota remaining, budget used, in-flight concurrency —
//! deliberately do NOT live on these records; they are owned by the
//! [`CounterStore`](crate::store::CounterStore) and the
//! [`ModelRegistry`](crate::registry::ModelRegistry) during processing.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::routing::{RoutingMode, TaskComplexity};

/// Sentinel meaning "no daily quota limit".
pub const UNLIMITED_QUOTA: i64 = -1;

// ── Identifiers ────────────────────────────────────────────────────────────

/// Unique identifier of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(
    /// The raw string ID.
    pub String,
);

impl SubscriptionId {
    /// Create a new [`SubscriptionId`] from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier of a backend model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(
    /// The raw string ID.
    pub String,
);

impl ModelId {
    /// Create a new [`ModelId`] from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Subscription ───────────────────────────────────────────────────────────

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid and current.
    Active,
    /// Trial period; treated as active for admission.
    Trial,
    /// Administratively suspended.
    Suspended,
    /// Past its end date.
    Expired,
}

impl SubscriptionStatus {
    /// Whether requests under this subscription may be admitted.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active | Self::Trial)
    }
}

/// A caller's plan enrollment, as read from the provisioning collaborator.
///
/// Static limits only: the gateway's stores hold the live counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription identifier.
    pub id: SubscriptionId,
    /// Owning user identifier (opaque to the gateway).
    pub user: String,
    /// The plan this subscription is enrolled in.
    pub plan_id: String,
    /// Lifecycle state.
    pub status: SubscriptionStatus,
    /// Requests permitted per UTC day; [`UNLIMITED_QUOTA`] for no limit.
    pub daily_quota_limit: i64,
    /// Monthly spend ceiling in micro-dollars; 0 means no ceiling.
    pub monthly_budget_limit_micro: i64,
    /// Token-bucket capacity and refill rate; 0 means no rate limit.
    pub rate_limit_qps: u32,
    /// Routing priority, 0–100. Feeds the scorer's priority term.
    pub priority_score: u32,
    /// Fraction of budget (0.0–1.0) at which a threshold alert fires.
    pub alert_threshold: f64,
}

// ── Plan ───────────────────────────────────────────────────────────────────

/// Default routing weight for an allowed model with no explicit weight.
const DEFAULT_MODEL_WEIGHT: f64 = 10.0;

/// Configuration template defining model access, weights, and routing mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier.
    pub id: String,
    /// Routing mode applied when the request does not override it.
    pub default_mode: RoutingMode,
    /// Models this plan may route to.
    pub allowed_models: HashSet<ModelId>,
    /// Base routing weights per model (0–100). Missing entries default to 10.
    pub model_weights: HashMap<String, f64>,
    /// Weight tables replacing the base weights when a fixed mode is active.
    #[serde(default)]
    pub mode_overlays: HashMap<RoutingMode, HashMap<String, f64>>,
    /// Weight tables replacing the base weights per detected complexity
    /// (used by [`RoutingMode::Auto`] when complexity detection is on).
    #[serde(default)]
    pub complexity_overlays: HashMap<TaskComplexity, HashMap<String, f64>>,
    /// Minimum prompt similarity for session continuity to reuse a model.
    pub correlation_threshold: f64,
    /// How long an affinity entry stays valid after each write.
    pub session_ttl: Duration,
    /// Whether session continuity is active for this plan.
    pub continuity_enabled: bool,
    /// Whether prompt complexity detection is active for this plan.
    pub complexity_detection_enabled: bool,
}

impl Plan {
    /// A plan with default routing behaviour and no allowed models yet.
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            default_mode: RoutingMode::Auto,
            allowed_models: HashSet::new(),
            model_weights: HashMap::new(),
            mode_overlays: HashMap::new(),
            complexity_overlays: HashMap::new(),
            correlation_threshold: 0.5,
            session_ttl: Duration::from_secs(1800),
            continuity_enabled: true,
            complexity_detection_enabled: true,
        }
    }

    /// Whether the plan allows routing to `model`.
    pub fn allows(&self, model: &ModelId) -> bool {
        self.allowed_models.contains(model)
    }

    /// Base weight for `model` (default 10 when unset, per the provisioning
    /// system's convention).
    pub fn weight_for(&self, model: &ModelId) -> f64 {
        self.model_weights
            .get(model.as_str())
            .copied()
            .unwrap_or(DEFAULT_MODEL_WEIGHT)
    }

    /// Resolve the effective weight table for a request.
    ///
    /// Fixed modes (`performance`, `efficient`, `lite`) use their overlay
    /// when configured. `auto` with complexity detection uses the overlay
    /// for the detected complexity. Everything else falls back to the base
    /// weights. Overlays replace the table wholesale — weights stay plan
    /// data, never code.
    pub fn effective_weights(
        &self,
        mode: RoutingMode,
        complexity: Option<TaskComplexity>,
    ) -> &HashMap<String, f64> {
        if mode != RoutingMode::Auto {
            if let Some(table) = self.mode_overlays.get(&mode) {
                return table;
            }
        } else if let Some(c) = complexity {
            if let Some(table) = self.complexity_overlays.get(&c) {
                return table;
            }
        }
        &self.model_weights
    }

    /// Effective weight for one model under a resolved table.
    pub fn effective_weight_for(table: &HashMap<String, f64>, model: &ModelId) -> f64 {
        table
            .get(model.as_str())
            .copied()
            .unwrap_or(DEFAULT_MODEL_WEIGHT)
    }
}

// ── Model profile ──────────────────────────────────────────────────────────

/// Health state reported by the model-health collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelHealth {
    /// Fully serving.
    Up,
    /// Serving but impaired; scored with a fixed penalty.
    Degraded,
    /// Not serving; structurally ineligible.
    Down,
}

/// A backend model's capability / health / cost descriptor.
///
/// The in-flight concurrency count is NOT a field here — it lives in the
/// registry as an atomic counter so profile snapshots stay copyable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Model identifier.
    pub id: ModelId,
    /// Provider label (informational).
    pub provider: String,
    /// HTTP endpoint the dispatcher posts to.
    pub endpoint_url: String,
    /// Cost per 1 000 tokens, in micro-dollars.
    pub cost_per_1k_micro: i64,
    /// Relative serving capacity, 0–100.
    pub capacity_score: u32,
    /// Largest context window this model accepts, in tokens.
    pub max_context_tokens: u64,
    /// Rolling average end-to-end latency in milliseconds.
    pub avg_latency_ms: u64,
    /// Rolling success rate, 0–100.
    pub success_rate: f64,
    /// Current health state.
    pub health: ModelHealth,
    /// Concurrency ceiling; in-flight requests never exceed this.
    pub max_concurrent: u32,
    /// Mandatory dispatch timeout.
    pub timeout: Duration,
}

impl ModelProfile {
    /// Cost in micro-dollars for a given total token count.
    pub fn cost_micro_for(&self, tokens: u64) -> i64 {
        ((tokens as i128 * self.cost_per_1k_micro as i128) / 1000) as i64
    }
}

// ── Usage ──────────────────────────────────────────────────────────────────

/// A settled request, written fire-and-forget after successful dispatch.
///
/// Carries the subscription id as a plain back-reference; subscriptions
/// never own a live collection of usage records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Back-reference to the subscription that was charged.
    pub subscription_id: SubscriptionId,
    /// Model that served the request.
    pub model_id: ModelId,
    /// Prompt-side tokens.
    pub tokens_in: u64,
    /// Completion-side tokens.
    pub tokens_out: u64,
    /// Actual cost in micro-dollars.
    pub cost_micro: i64,
    /// Settlement time (UTC).
    pub timestamp: DateTime<Utc>,
}
