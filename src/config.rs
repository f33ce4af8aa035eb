//! Gateway configuration.
//!
//! ## Responsibility
//! Define the TOML schema for server settings, models, plans,
//! subscriptions, and API keys; load and parse a file; validate semantic
//! constraints the type system cannot express.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//! - Raw API keys in config are hashed at load and never kept in memory

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::auth::KeyResolver;
use crate::directory::{ApiKeyRecord, KeyStatus};
use crate::routing::{RoutingMode, TaskComplexity};
use crate::types::{
    ModelHealth, ModelId, ModelProfile, Plan, Subscription, SubscriptionId, SubscriptionStatus,
};

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "models[0].timeout_secs").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

// ── Schema ─────────────────────────────────────────────────────────────────

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Scoring term multipliers; defaults apply when the table is absent.
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Backend model fleet.
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    /// Plan catalogue.
    #[serde(default)]
    pub plans: Vec<PlanConfig>,
    /// Subscription roster.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
    /// API key material.
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Scoring term multipliers (see the scorer for term semantics).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Multiplier on inverse latency.
    pub latency: f64,
    /// Multiplier on capacity headroom.
    pub capacity: f64,
    /// Multiplier on negated dollar cost.
    pub cost: f64,
    /// Multiplier on subscription priority.
    pub priority: f64,
    /// Multiplier on success rate.
    pub success: f64,
    /// Multiplier on the plan's per-model weight.
    pub plan_weight: f64,
    /// Flat penalty for degraded models.
    pub degraded_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let w = crate::routing::ScoringWeights::default();
        Self {
            latency: w.latency,
            capacity: w.capacity,
            cost: w.cost,
            priority: w.priority,
            success: w.success,
            plan_weight: w.plan_weight,
            degraded_penalty: w.degraded_penalty,
        }
    }
}

impl From<ScoringConfig> for crate::routing::ScoringWeights {
    fn from(c: ScoringConfig) -> Self {
        Self {
            latency: c.latency,
            capacity: c.capacity,
            cost: c.cost,
            priority: c.priority,
            success: c.success,
            plan_weight: c.plan_weight,
            degraded_penalty: c.degraded_penalty,
        }
    }
}

/// One backend model.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Model identifier, unique across the fleet.
    pub id: String,
    /// Provider name, for logs.
    pub provider: String,
    /// Chat-completions endpoint URL.
    pub endpoint_url: String,
    /// Price per 1000 tokens in micro-dollars.
    pub cost_per_1k_micro: i64,
    /// Relative serving capacity, 0–100.
    #[serde(default = "default_capacity")]
    pub capacity_score: u32,
    /// Context window in tokens.
    pub max_context_tokens: u64,
    /// Concurrency ceiling.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    /// Per-attempt dispatch timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_capacity() -> u32 {
    50
}

fn default_max_concurrent() -> u32 {
    8
}

fn default_timeout_secs() -> u64 {
    30
}

/// One plan.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanConfig {
    /// Plan identifier.
    pub id: String,
    /// Default routing mode.
    #[serde(default)]
    pub default_mode: RoutingMode,
    /// Models this plan may route to.
    pub allowed_models: Vec<String>,
    /// Base per-model weights, 0–100. Missing entries default to 10.
    #[serde(default)]
    pub model_weights: HashMap<String, f64>,
    /// Weight overlays for fixed modes.
    #[serde(default)]
    pub mode_overlays: HashMap<RoutingMode, HashMap<String, f64>>,
    /// Weight overlays per detected complexity (auto mode).
    #[serde(default)]
    pub complexity_overlays: HashMap<TaskComplexity, HashMap<String, f64>>,
    /// Minimum prompt similarity for session continuity.
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,
    /// Session affinity TTL in seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Whether session continuity is active.
    #[serde(default = "default_true")]
    pub continuity_enabled: bool,
    /// Whether complexity detection is active.
    #[serde(default = "default_true")]
    pub complexity_detection_enabled: bool,
}

fn default_correlation_threshold() -> f64 {
    0.5
}

fn default_session_ttl_secs() -> u64 {
    1800
}

fn default_true() -> bool {
    true
}

/// One subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    /// Subscription identifier.
    pub id: String,
    /// Owning user.
    pub user: String,
    /// Enrolled plan id.
    pub plan: String,
    /// Requests per UTC day; -1 for unlimited.
    pub daily_quota_limit: i64,
    /// Monthly spend ceiling in micro-dollars; 0 for no ceiling.
    #[serde(default)]
    pub monthly_budget_limit_micro: i64,
    /// Token-bucket rate, requests per second; 0 for no limit.
    #[serde(default)]
    pub rate_limit_qps: u32,
    /// Routing priority, 0–100.
    #[serde(default)]
    pub priority_score: u32,
    /// Budget alert threshold, 0.0–1.0; 0 disables the alert.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
}

fn default_alert_threshold() -> f64 {
    0.8
}

/// One API key. Either `key` (raw, hashed at load — development only) or
/// `key_hash` + `key_prefix` (production) must be present.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyConfig {
    /// Raw key material. Hashed immediately at load.
    #[serde(default)]
    pub key: Option<String>,
    /// Pre-hashed key (hex SHA-256).
    #[serde(default)]
    pub key_hash: Option<String>,
    /// Log-safe key prefix, required alongside `key_hash`.
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// Owning subscription id.
    pub subscription: String,
}

// ── Loading ────────────────────────────────────────────────────────────────

/// Load a [`GatewayConfig`] from a TOML file.
///
/// Reads the file, parses it as TOML, and validates all semantic
/// constraints.
///
/// # Errors
///
/// - [`ConfigError::Io`] if the file cannot be read.
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - The first of the collected validation errors; all of them are logged.
pub fn load_from_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        file: path.display().to_string(),
        source,
    })?;
    load_from_str(&raw, &path.display().to_string())
}

/// Parse and validate a TOML document. `file` only labels errors.
pub fn load_from_str(raw: &str, file: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(raw).map_err(|source| ConfigError::Parse {
        file: file.to_string(),
        source,
    })?;

    match validate(&config) {
        Ok(()) => Ok(config),
        Err(mut errors) => {
            for e in &errors {
                tracing::error!(error = %e, "config validation failure");
            }
            // Surfacing the first error keeps the return type simple; the
            // log above carries the complete list.
            Err(errors.remove(0))
        }
    }
}

// ── Validation ─────────────────────────────────────────────────────────────

/// Validate all semantic constraints on a [`GatewayConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
pub fn validate(config: &GatewayConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let model_ids: HashSet<&str> = config.models.iter().map(|m| m.id.as_str()).collect();
    let plan_ids: HashSet<&str> = config.plans.iter().map(|p| p.id.as_str()).collect();
    let sub_ids: HashSet<&str> = config.subscriptions.iter().map(|s| s.id.as_str()).collect();

    // ── Models ───────────────────────────────────────────────────────
    if model_ids.len() != config.models.len() {
        errors.push(ConfigError::InvalidField {
            field: "models".into(),
            value: format!("{} entries", config.models.len()),
            reason: "model ids must be unique".into(),
        });
    }
    for (i, m) in config.models.iter().enumerate() {
        if m.id.trim().is_empty() {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].id"),
                value: m.id.clone(),
                reason: "must be non-empty".into(),
            });
        }
        if m.cost_per_1k_micro < 0 {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].cost_per_1k_micro"),
                value: m.cost_per_1k_micro.to_string(),
                reason: "must be \u{2265} 0".into(),
            });
        }
        if m.capacity_score > 100 {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].capacity_score"),
                value: m.capacity_score.to_string(),
                reason: "must be between 0 and 100".into(),
            });
        }
        if m.max_concurrent == 0 {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].max_concurrent"),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if m.timeout_secs == 0 {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].timeout_secs"),
                value: "0".into(),
                reason: "must be at least 1 second".into(),
            });
        }
    }

    // ── Plans ────────────────────────────────────────────────────────
    for (i, p) in config.plans.iter().enumerate() {
        for model in &p.allowed_models {
            if !model_ids.contains(model.as_str()) {
                errors.push(ConfigError::InvalidField {
                    field: format!("plans[{i}].allowed_models"),
                    value: model.clone(),
                    reason: "references an undefined model".into(),
                });
            }
        }
        // Weight tables silently default unknown models to weight 10, so a
        // typo'd id would go unnoticed without this check.
        for model in p.model_weights.keys() {
            if !model_ids.contains(model.as_str()) {
                errors.push(ConfigError::InvalidField {
                    field: format!("plans[{i}].model_weights"),
                    value: model.clone(),
                    reason: "references an undefined model".into(),
                });
            }
        }
        for (mode, table) in &p.mode_overlays {
            for model in table.keys() {
                if !model_ids.contains(model.as_str()) {
                    errors.push(ConfigError::InvalidField {
                        field: format!("plans[{i}].mode_overlays.{mode:?}"),
                        value: model.clone(),
                        reason: "references an undefined model".into(),
                    });
                }
            }
        }
        for (complexity, table) in &p.complexity_overlays {
            for model in table.keys() {
                if !model_ids.contains(model.as_str()) {
                    errors.push(ConfigError::InvalidField {
                        field: format!("plans[{i}].complexity_overlays.{complexity:?}"),
                        value: model.clone(),
                        reason: "references an undefined model".into(),
                    });
                }
            }
        }
        if !(0.0..=1.0).contains(&p.correlation_threshold) {
            errors.push(ConfigError::InvalidField {
                field: format!("plans[{i}].correlation_threshold"),
                value: p.correlation_threshold.to_string(),
                reason: "must be between 0.0 and 1.0".into(),
            });
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────
    for (i, s) in config.subscriptions.iter().enumerate() {
        if !plan_ids.contains(s.plan.as_str()) {
            errors.push(ConfigError::InvalidField {
                field: format!("subscriptions[{i}].plan"),
                value: s.plan.clone(),
                reason: "references an undefined plan".into(),
            });
        }
        if s.daily_quota_limit < -1 {
            errors.push(ConfigError::InvalidField {
                field: format!("subscriptions[{i}].daily_quota_limit"),
                value: s.daily_quota_limit.to_string(),
                reason: "must be -1 (unlimited) or \u{2265} 0".into(),
            });
        }
        if !(0.0..=1.0).contains(&s.alert_threshold) {
            errors.push(ConfigError::InvalidField {
                field: format!("subscriptions[{i}].alert_threshold"),
                value: s.alert_threshold.to_string(),
                reason: "must be between 0.0 and 1.0".into(),
            });
        }
    }

    // ── API keys ─────────────────────────────────────────────────────
    for (i, k) in config.api_keys.iter().enumerate() {
        if !sub_ids.contains(k.subscription.as_str()) {
            errors.push(ConfigError::InvalidField {
                field: format!("api_keys[{i}].subscription"),
                value: k.subscription.clone(),
                reason: "references an undefined subscription".into(),
            });
        }
        match (&k.key, &k.key_hash) {
            (None, None) => errors.push(ConfigError::InvalidField {
                field: format!("api_keys[{i}]"),
                value: "<empty>".into(),
                reason: "either 'key' or 'key_hash' is required".into(),
            }),
            (None, Some(_)) if k.key_prefix.is_none() => {
                errors.push(ConfigError::InvalidField {
                    field: format!("api_keys[{i}].key_prefix"),
                    value: "<missing>".into(),
                    reason: "required alongside 'key_hash'".into(),
                });
            }
            _ => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// ── Conversion into domain types ───────────────────────────────────────────

impl GatewayConfig {
    /// Build registry profiles from the fleet section. Models start `Up`
    /// with neutral telemetry until outcomes arrive.
    pub fn model_profiles(&self) -> Vec<ModelProfile> {
        self.models
            .iter()
            .map(|m| ModelProfile {
                id: ModelId::new(m.id.clone()),
                provider: m.provider.clone(),
                endpoint_url: m.endpoint_url.clone(),
                cost_per_1k_micro: m.cost_per_1k_micro,
                capacity_score: m.capacity_score,
                max_context_tokens: m.max_context_tokens,
                avg_latency_ms: 0,
                success_rate: 100.0,
                health: ModelHealth::Up,
                max_concurrent: m.max_concurrent,
                timeout: Duration::from_secs(m.timeout_secs),
            })
            .collect()
    }

    /// Build plan records.
    pub fn plan_records(&self) -> Vec<Plan> {
        self.plans
            .iter()
            .map(|p| Plan {
                id: p.id.clone(),
                default_mode: p.default_mode,
                allowed_models: p.allowed_models.iter().map(ModelId::new).collect(),
                model_weights: p.model_weights.clone(),
                mode_overlays: p.mode_overlays.clone(),
                complexity_overlays: p.complexity_overlays.clone(),
                correlation_threshold: p.correlation_threshold,
                session_ttl: Duration::from_secs(p.session_ttl_secs),
                continuity_enabled: p.continuity_enabled,
                complexity_detection_enabled: p.complexity_detection_enabled,
            })
            .collect()
    }

    /// Build subscription records.
    pub fn subscription_records(&self) -> Vec<Subscription> {
        self.subscriptions
            .iter()
            .map(|s| Subscription {
                id: SubscriptionId::new(s.id.clone()),
                user: s.user.clone(),
                plan_id: s.plan.clone(),
                status: SubscriptionStatus::Active,
                daily_quota_limit: s.daily_quota_limit,
                monthly_budget_limit_micro: s.monthly_budget_limit_micro,
                rate_limit_qps: s.rate_limit_qps,
                priority_score: s.priority_score,
                alert_threshold: s.alert_threshold,
            })
            .collect()
    }

    /// Build key records. Raw keys are hashed here and not retained.
    pub fn api_key_records(&self) -> Vec<ApiKeyRecord> {
        self.api_keys
            .iter()
            .filter_map(|k| {
                let (hash, prefix) = match (&k.key, &k.key_hash) {
                    (Some(raw), _) => (
                        KeyResolver::hash_key(raw),
                        raw.chars().take(8).collect::<String>(),
                    ),
                    (None, Some(hash)) => (
                        hash.clone(),
                        k.key_prefix.clone().unwrap_or_default(),
                    ),
                    (None, None) => return None,
                };
                Some(ApiKeyRecord {
                    key_hash: hash,
                    key_prefix: prefix,
                    status: KeyStatus::Active,
                    subscription_id: SubscriptionId::new(k.subscription.clone()),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
        [server]
        host = "127.0.0.1"
        port = 9000

        [[models]]
        id = "lite-1"
        provider = "openai"
        endpoint_url = "http://localhost:9100/v1/chat/completions"
        cost_per_1k_micro = 500
        max_context_tokens = 16000

        [[models]]
        id = "heavy-1"
        provider = "anthropic"
        endpoint_url = "http://localhost:9101/v1/chat/completions"
        cost_per_1k_micro = 15000
        capacity_score = 90
        max_context_tokens = 200000
        max_concurrent = 4
        timeout_secs = 60

        [[plans]]
        id = "pro"
        allowed_models = ["lite-1", "heavy-1"]
        [plans.model_weights]
        "heavy-1" = 60.0

        [[subscriptions]]
        id = "sub-1"
        user = "ada"
        plan = "pro"
        daily_quota_limit = 1000
        monthly_budget_limit_micro = 50000000
        rate_limit_qps = 10
        priority_score = 20

        [[api_keys]]
        key = "gk_dev_abc123"
        subscription = "sub-1"
    "#;

    #[test]
    fn test_valid_config_loads() {
        let config = load_from_str(VALID, "test.toml").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[0].max_concurrent, 8, "default applies");
        assert_eq!(config.plans[0].correlation_threshold, 0.5);
    }

    #[test]
    fn test_conversions_produce_domain_types() {
        let config = load_from_str(VALID, "test.toml").unwrap();

        let profiles = config.model_profiles();
        assert_eq!(profiles[1].timeout, Duration::from_secs(60));

        let plans = config.plan_records();
        assert!(plans[0].allows(&ModelId::new("lite-1")));
        assert_eq!(plans[0].weight_for(&ModelId::new("heavy-1")), 60.0);
        assert_eq!(plans[0].weight_for(&ModelId::new("lite-1")), 10.0);

        let keys = config.api_key_records();
        assert_eq!(keys[0].key_prefix, "gk_dev_a");
        assert_eq!(keys[0].key_hash, KeyResolver::hash_key("gk_dev_abc123"));
    }

    #[test]
    fn test_plan_referencing_unknown_model_fails() {
        let raw = VALID.replace("\"lite-1\", \"heavy-1\"", "\"lite-1\", \"ghost\"");
        let err = load_from_str(&raw, "test.toml").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { .. }));
    }

    #[test]
    fn test_weight_table_referencing_unknown_model_fails() {
        let raw = VALID.replace("[plans.model_weights]\n        \"heavy-1\" = 60.0", "[plans.model_weights]\n        \"heavy-2\" = 60.0");
        let err = load_from_str(&raw, "test.toml").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { .. }));
    }

    #[test]
    fn test_overlay_referencing_unknown_model_fails() {
        let spliced = VALID.replace(
            "[[subscriptions]]",
            "[plans.mode_overlays.lite]\n\"ghost\" = 95.0\n\n[[subscriptions]]",
        );
        assert!(load_from_str(&spliced, "test.toml").is_err());
    }

    #[test]
    fn test_subscription_referencing_unknown_plan_fails() {
        let raw = VALID.replace("plan = \"pro\"", "plan = \"ghost\"");
        assert!(load_from_str(&raw, "test.toml").is_err());
    }

    #[test]
    fn test_api_key_without_material_fails() {
        let raw = VALID.replace("key = \"gk_dev_abc123\"", "");
        assert!(load_from_str(&raw, "test.toml").is_err());
    }

    #[test]
    fn test_validation_collects_multiple_errors() {
        let raw = VALID
            .replace("cost_per_1k_micro = 500", "cost_per_1k_micro = -1")
            .replace("timeout_secs = 60", "timeout_secs = 0");
        let config: GatewayConfig = toml::from_str(&raw).unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.len() >= 2);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = load_from_str("not [ valid ( toml", "bad.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_mode_overlay_parses() {
        // The overlay table must sit inside the [[plans]] entry it extends.
        let spliced = VALID.replace(
            "[[subscriptions]]",
            "[plans.mode_overlays.performance]\n\"heavy-1\" = 95.0\n\n[[subscriptions]]",
        );
        let config = load_from_str(&spliced, "test.toml").unwrap();
        let plan = &config.plan_records()[0];
        let table = plan.effective_weights(RoutingMode::Performance, None);
        assert_eq!(table.get("heavy-1"), Some(&95.0));
    }
}
