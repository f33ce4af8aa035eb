//! Weighted model scoring.
//!
//! Every eligible candidate gets a composite score built from six live
//! terms plus the plan's per-model weight; the argmax wins. Selection is
//! pure arithmetic over the snapshot — no randomness — so equal inputs
//! always pick the same model, with a lexical model-id tiebreak for exact
//! score ties.

use tracing::debug;

use crate::registry::ModelSnapshot;
use crate::types::{ModelHealth, ModelId, Plan};

const MICRO_PER_DOLLAR: f64 = 1_000_000.0;

/// Multipliers over the scoring terms. Plan weight dominates deliberately:
/// operators steer routing through plan data, telemetry only refines it.
#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    /// Multiplier on inverse latency.
    pub latency: f64,
    /// Multiplier on normalised capacity headroom.
    pub capacity: f64,
    /// Multiplier on (negated) dollar cost per 1k tokens.
    pub cost: f64,
    /// Multiplier on subscription priority.
    pub priority: f64,
    /// Multiplier on the model's success rate.
    pub success: f64,
    /// Multiplier on the plan's per-model weight.
    pub plan_weight: f64,
    /// Flat penalty applied to degraded models.
    pub degraded_penalty: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            latency: 1.0,
            capacity: 0.5,
            cost: 1.5,
            priority: 2.0,
            success: 0.3,
            plan_weight: 5.0,
            degraded_penalty: -10.0,
        }
    }
}

/// One candidate's score with its contributing terms, for explainability.
#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    /// The scored model.
    pub model_id: ModelId,
    /// Weighted inverse of average latency.
    pub latency_term: f64,
    /// Weighted capacity headroom.
    pub capacity_term: f64,
    /// Weighted negative cost.
    pub cost_term: f64,
    /// Weighted subscription priority.
    pub priority_term: f64,
    /// Weighted success rate.
    pub success_term: f64,
    /// Weighted plan model weight.
    pub plan_term: f64,
    /// Degraded-health penalty (0 when healthy).
    pub health_penalty: f64,
    /// Sum of all terms.
    pub total: f64,
}

/// Scores candidates and picks the winner.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelScorer {
    weights: ScoringWeights,
}

impl ModelScorer {
    /// Scorer with the given term multipliers.
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// Score one candidate against the resolved weight table.
    pub fn score(
        &self,
        snapshot: &ModelSnapshot,
        weight_table: &std::collections::HashMap<String, f64>,
        priority_score: u32,
    ) -> ScoreBreakdown {
        let w = &self.weights;
        let p = &snapshot.profile;

        let latency_term = w.latency * (1.0 / (p.avg_latency_ms as f64 + 1.0));
        let capacity_term = w.capacity * (f64::from(p.capacity_score) / 100.0);
        let cost_term = -w.cost * (p.cost_per_1k_micro as f64 / MICRO_PER_DOLLAR);
        let priority_term = w.priority * f64::from(priority_score);
        let success_term = w.success * (p.success_rate / 100.0);
        let plan_term = w.plan_weight * Plan::effective_weight_for(weight_table, &p.id);
        let health_penalty = if p.health == ModelHealth::Degraded {
            w.degraded_penalty
        } else {
            0.0
        };

        let total = latency_term
            + capacity_term
            + cost_term
            + priority_term
            + success_term
            + plan_term
            + health_penalty;

        ScoreBreakdown {
            model_id: p.id.clone(),
            latency_term,
            capacity_term,
            cost_term,
            priority_term,
            success_term,
            plan_term,
            health_penalty,
            total,
        }
    }

    /// Score every candidate and return the winner's breakdown.
    ///
    /// Exact score ties break on the lexically smaller model id, keeping
    /// selection deterministic. Returns `None` on an empty candidate list.
    pub fn select(
        &self,
        candidates: &[ModelSnapshot],
        weight_table: &std::collections::HashMap<String, f64>,
        priority_score: u32,
    ) -> Option<ScoreBreakdown> {
        let mut best: Option<ScoreBreakdown> = None;
        for snapshot in candidates {
            let breakdown = self.score(snapshot, weight_table, priority_score);
            debug!(
                model = %breakdown.model_id,
                score = breakdown.total,
                "candidate scored"
            );
            best = match best {
                None => Some(breakdown),
                Some(current) => {
                    let replace = breakdown.total > current.total
                        || (breakdown.total == current.total
                            && breakdown.model_id < current.model_id);
                    if replace {
                        Some(breakdown)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelProfile;
    use std::collections::HashMap;
    use std::time::Duration;

    fn snapshot(id: &str, latency_ms: u64, cost_per_1k_micro: i64, health: ModelHealth) -> ModelSnapshot {
        ModelSnapshot {
            profile: ModelProfile {
                id: ModelId::new(id),
                provider: "test".to_string(),
                endpoint_url: "http://localhost/v1".to_string(),
                cost_per_1k_micro,
                capacity_score: 80,
                max_context_tokens: 100_000,
                avg_latency_ms: latency_ms,
                success_rate: 99.0,
                health,
                max_concurrent: 4,
                timeout: Duration::from_secs(30),
            },
            in_flight: 0,
        }
    }

    #[test]
    fn test_select_empty_candidates_is_none() {
        let scorer = ModelScorer::default();
        assert!(scorer
            .select(&[], &HashMap::new(), 10)
            .is_none());
    }

    #[test]
    fn test_plan_weight_dominates_selection() {
        let scorer = ModelScorer::default();
        let candidates = vec![
            snapshot("cheap-fast", 10, 500, ModelHealth::Up),
            snapshot("preferred", 400, 15_000, ModelHealth::Up),
        ];
        let mut weights = HashMap::new();
        weights.insert("preferred".to_string(), 60.0);
        weights.insert("cheap-fast".to_string(), 10.0);

        let winner = scorer.select(&candidates, &weights, 10).unwrap();
        assert_eq!(winner.model_id.as_str(), "preferred");
    }

    #[test]
    fn test_equal_weights_prefer_cheap_fast_model() {
        let scorer = ModelScorer::default();
        let candidates = vec![
            snapshot("slow-costly", 900, 30_000, ModelHealth::Up),
            snapshot("quick-cheap", 40, 400, ModelHealth::Up),
        ];
        let winner = scorer
            .select(&candidates, &HashMap::new(), 10)
            .unwrap();
        assert_eq!(winner.model_id.as_str(), "quick-cheap");
    }

    #[test]
    fn test_degraded_penalty_flips_close_race() {
        let scorer = ModelScorer::default();
        let candidates = vec![
            snapshot("a", 100, 2_000, ModelHealth::Degraded),
            snapshot("b", 100, 2_000, ModelHealth::Up),
        ];
        let winner = scorer
            .select(&candidates, &HashMap::new(), 10)
            .unwrap();
        assert_eq!(winner.model_id.as_str(), "b");
    }

    #[test]
    fn test_exact_tie_breaks_lexically() {
        let scorer = ModelScorer::default();
        let candidates = vec![
            snapshot("zeta", 100, 2_000, ModelHealth::Up),
            snapshot("alpha", 100, 2_000, ModelHealth::Up),
        ];
        let winner = scorer
            .select(&candidates, &HashMap::new(), 10)
            .unwrap();
        assert_eq!(winner.model_id.as_str(), "alpha");
    }

    #[test]
    fn test_breakdown_terms_sum_to_total() {
        let scorer = ModelScorer::default();
        let snap = snapshot("a", 120, 3_000, ModelHealth::Degraded);
        let b = scorer.score(&snap, &HashMap::new(), 25);
        let sum = b.latency_term
            + b.capacity_term
            + b.cost_term
            + b.priority_term
            + b.success_term
            + b.plan_term
            + b.health_penalty;
        assert!((b.total - sum).abs() < 1e-12);
    }
}
