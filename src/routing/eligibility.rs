//! Eligibility filtering.
//!
//! A model must clear every check to be a candidate: plan access, health,
//! context window, and concurrency headroom. The filter is a hard wall —
//! nothing downstream (affinity, requested model, scoring) can resurrect
//! an excluded model.

use tracing::debug;

use crate::registry::ModelSnapshot;
use crate::types::{ModelHealth, Plan};

/// Why a model was excluded, for logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    /// The plan does not allow this model.
    NotInPlan,
    /// Health collaborator reports the model down.
    Down,
    /// The request's estimated tokens exceed the model's context window.
    ContextTooSmall,
    /// The model is at its concurrency ceiling.
    AtCapacity,
}

fn exclusion(snapshot: &ModelSnapshot, plan: &Plan, estimated_tokens: u64) -> Option<ExclusionReason> {
    if !plan.allows(&snapshot.profile.id) {
        return Some(ExclusionReason::NotInPlan);
    }
    if snapshot.profile.health == ModelHealth::Down {
        return Some(ExclusionReason::Down);
    }
    if estimated_tokens > snapshot.profile.max_context_tokens {
        return Some(ExclusionReason::ContextTooSmall);
    }
    if snapshot.in_flight >= snapshot.profile.max_concurrent {
        return Some(ExclusionReason::AtCapacity);
    }
    None
}

/// Partition `snapshots` into eligible candidates for this request.
///
/// Exclusions are logged at debug level with their reason; the caller maps
/// an empty result to a no-eligible-model rejection.
pub fn eligible_candidates(
    snapshots: Vec<ModelSnapshot>,
    plan: &Plan,
    estimated_tokens: u64,
) -> Vec<ModelSnapshot> {
    snapshots
        .into_iter()
        .filter(|snap| match exclusion(snap, plan, estimated_tokens) {
            None => true,
            Some(reason) => {
                debug!(model = %snap.profile.id, ?reason, "model excluded");
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModelId, ModelProfile};
    use std::time::Duration;

    fn snapshot(id: &str, health: ModelHealth, context: u64, in_flight: u32) -> ModelSnapshot {
        ModelSnapshot {
            profile: ModelProfile {
                id: ModelId::new(id),
                provider: "test".to_string(),
                endpoint_url: "http://localhost/v1".to_string(),
                cost_per_1k_micro: 2_000,
                capacity_score: 80,
                max_context_tokens: context,
                avg_latency_ms: 100,
                success_rate: 99.0,
                health,
                max_concurrent: 4,
                timeout: Duration::from_secs(30),
            },
            in_flight,
        }
    }

    fn plan_allowing(models: &[&str]) -> Plan {
        let mut plan = Plan::named("pro");
        plan.allowed_models = models.iter().map(|m| ModelId::new(*m)).collect();
        plan
    }

    #[test]
    fn test_all_checks_pass() {
        let out = eligible_candidates(
            vec![snapshot("a", ModelHealth::Up, 100_000, 0)],
            &plan_allowing(&["a"]),
            500,
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_model_outside_plan_excluded() {
        let out = eligible_candidates(
            vec![snapshot("a", ModelHealth::Up, 100_000, 0)],
            &plan_allowing(&["b"]),
            500,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_down_model_excluded_degraded_kept() {
        let out = eligible_candidates(
            vec![
                snapshot("down", ModelHealth::Down, 100_000, 0),
                snapshot("degraded", ModelHealth::Degraded, 100_000, 0),
            ],
            &plan_allowing(&["down", "degraded"]),
            500,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].profile.id.as_str(), "degraded");
    }

    #[test]
    fn test_context_window_too_small_excluded() {
        let out = eligible_candidates(
            vec![snapshot("a", ModelHealth::Up, 4_000, 0)],
            &plan_allowing(&["a"]),
            5_000,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_estimate_equal_to_window_is_eligible() {
        let out = eligible_candidates(
            vec![snapshot("a", ModelHealth::Up, 4_000, 0)],
            &plan_allowing(&["a"]),
            4_000,
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_model_at_capacity_excluded() {
        let out = eligible_candidates(
            vec![snapshot("a", ModelHealth::Up, 100_000, 4)],
            &plan_allowing(&["a"]),
            500,
        );
        assert!(out.is_empty());
    }
}
