//! The admission pipeline.
//!
//! [`Selector::route`] runs every gate in its fixed order and either
//! returns a completed [`RouteOutcome`] or the typed error of the first
//! gate that refused. The ordering is load-bearing: each gate is cheaper
//! than the next, so exhausted callers are turned away before any
//! expensive work, and nothing consumed by an early gate is refunded when
//! a later one rejects.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::auth::{KeyResolver, ResolvedKey};
use crate::clock::Clock;
use crate::dispatch::{DispatchOutcome, ModelBackend};
use crate::limits::{BudgetGate, QuotaGate, QuotaOutcome, RateDecision, RateLimiter};
use crate::metrics;
use crate::registry::{ModelRegistry, ModelSnapshot};
use crate::routing::{
    eligible_candidates, ComplexityDetector, Fingerprint, ModelScorer, RoutingMode,
    SessionAffinity, TaskComplexity,
};
use crate::types::{ModelId, UsageRecord};
use crate::usage::UsageSink;
use crate::{GatewayError, RouteRequest};

/// Everything the selector needs, injected at construction. All handles
/// are shared so the selector itself stays cheap to clone behind an `Arc`.
pub struct SelectorDeps {
    /// Credential resolution.
    pub resolver: Arc<KeyResolver>,
    /// RATE_LIMIT gate.
    pub rate_limiter: Arc<RateLimiter>,
    /// QUOTA gate.
    pub quota: Arc<QuotaGate>,
    /// BUDGET gate.
    pub budget: Arc<BudgetGate>,
    /// Live model registry.
    pub registry: Arc<ModelRegistry>,
    /// Session continuity table.
    pub affinity: Arc<SessionAffinity>,
    /// Candidate scorer.
    pub scorer: ModelScorer,
    /// Prompt complexity classifier.
    pub detector: ComplexityDetector,
    /// Backend transport.
    pub backend: Arc<dyn ModelBackend>,
    /// Post-settlement usage sink.
    pub usage: Arc<dyn UsageSink>,
    /// Time source for quota days and budget periods.
    pub clock: Arc<dyn Clock>,
}

/// A fully settled, successful routing decision.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    /// Model output text.
    pub content: String,
    /// The model that served the request.
    pub selected_model: ModelId,
    /// Winning composite score (0.0 when pinned by request or affinity).
    pub score: f64,
    /// Detected complexity, when auto mode classified the prompt.
    pub complexity: Option<TaskComplexity>,
    /// Whether the response came from the failover model.
    pub failover: bool,
    /// Wall-clock dispatch latency.
    pub dispatch_latency_ms: u64,
    /// Prompt tokens.
    pub tokens_in: u64,
    /// Completion tokens.
    pub tokens_out: u64,
    /// Settled cost in micro-dollars.
    pub cost_micro: i64,
    /// Daily quota remaining, when the subscription has a limit.
    pub quota_remaining: Option<i64>,
    /// Budget headroom remaining, when the subscription has a ceiling.
    pub budget_remaining_micro: Option<i64>,
}

/// How a primary model was chosen, for the decision log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectionPath {
    Requested,
    Affinity,
    Scored,
}

/// The request-admission pipeline.
pub struct Selector {
    deps: SelectorDeps,
}

impl Selector {
    /// Build a selector over its injected collaborators.
    pub fn new(deps: SelectorDeps) -> Self {
        Self { deps }
    }

    /// The live registry, for health and telemetry endpoints.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.deps.registry
    }

    /// Run the full pipeline for one request.
    ///
    /// # Errors
    ///
    /// Returns the typed error of the first gate that refused; see
    /// [`GatewayError`] for the full taxonomy. Metrics record the terminal
    /// outcome either way.
    pub async fn route(&self, request: &RouteRequest) -> Result<RouteOutcome, GatewayError> {
        let result = self.route_inner(request).await;
        match &result {
            Ok(outcome) => {
                metrics::inc_request("admitted");
                info!(
                    model = %outcome.selected_model,
                    failover = outcome.failover,
                    latency_ms = outcome.dispatch_latency_ms,
                    cost_micro = outcome.cost_micro,
                    "request admitted"
                );
            }
            Err(e) => {
                metrics::inc_request(e.kind());
                metrics::inc_rejection(e.kind());
            }
        }
        result
    }

    async fn route_inner(&self, request: &RouteRequest) -> Result<RouteOutcome, GatewayError> {
        // Structural validation before anything costs the caller.
        let prompt = request
            .latest_user_prompt()
            .ok_or_else(|| GatewayError::MalformedRequest("no user message".to_string()))?
            .to_string();
        if request.credential.is_empty() {
            return Err(GatewayError::MalformedRequest("empty credential".to_string()));
        }

        // AUTH
        let resolved = self.deps.resolver.resolve(&request.credential).await?;
        let sub = &resolved.subscription;
        let plan = &resolved.plan;

        // RATE_LIMIT
        match self.deps.rate_limiter.check(&sub.id, sub.rate_limit_qps) {
            RateDecision::Allowed => {}
            RateDecision::Limited { retry_after } => {
                return Err(GatewayError::RateLimited { retry_after });
            }
        }

        // QUOTA — consumed now and not refunded if a later gate rejects.
        let quota_remaining = match self
            .deps
            .quota
            .consume(&sub.id, sub.daily_quota_limit)
            .await?
        {
            QuotaOutcome::Unlimited => None,
            QuotaOutcome::Consumed { remaining } => Some(remaining),
        };

        let estimated_tokens = request.token_estimate();

        // BUDGET_PRECHECK — worst-case estimate: the most expensive model
        // the plan could route to. Pessimistic by construction, so a pass
        // here can only overshoot by the estimate-vs-actual gap.
        let estimate_micro = self.worst_case_cost(plan, estimated_tokens);
        self.deps.budget.check(sub, estimate_micro).await?;

        // ELIGIBILITY
        let candidates =
            eligible_candidates(self.deps.registry.snapshot_all(), plan, estimated_tokens);
        if candidates.is_empty() {
            return Err(GatewayError::NoEligibleModel);
        }

        // AFFINITY_OR_SCORE
        let mode = request.mode.unwrap_or(plan.default_mode);
        let complexity = if mode == RoutingMode::Auto && plan.complexity_detection_enabled {
            Some(self.deps.detector.detect(&prompt, estimated_tokens))
        } else {
            None
        };
        let fingerprint = Fingerprint::of(&prompt);
        let (primary, score, path) =
            self.choose_primary(request, &resolved, &candidates, mode, complexity, &fingerprint);
        debug!(model = %primary, ?path, ?complexity, "primary selected");

        // DISPATCH — primary plus at most one failover.
        let (outcome, served_by, failover, latency_ms) = self
            .dispatch_with_failover(request, &primary, &candidates, &resolved, mode, complexity)
            .await?;

        // SETTLE
        let cost_micro = self.settle(&resolved, &served_by, &outcome, request, &fingerprint).await?;
        let budget_remaining_micro = self.deps.budget.remaining(sub).await?;

        Ok(RouteOutcome {
            content: outcome.content,
            selected_model: served_by,
            score,
            complexity,
            failover,
            dispatch_latency_ms: latency_ms,
            tokens_in: outcome.tokens_in,
            tokens_out: outcome.tokens_out,
            cost_micro,
            quota_remaining,
            budget_remaining_micro,
        })
    }

    /// Highest per-request cost any plan-allowed model could charge for
    /// this estimate. Falls back to 0 when the plan matches no registered
    /// model (eligibility will reject just after).
    fn worst_case_cost(&self, plan: &crate::types::Plan, estimated_tokens: u64) -> i64 {
        self.deps
            .registry
            .snapshot_all()
            .iter()
            .filter(|s| plan.allows(&s.profile.id))
            .map(|s| s.profile.cost_micro_for(estimated_tokens))
            .max()
            .unwrap_or(0)
    }

    fn choose_primary(
        &self,
        request: &RouteRequest,
        resolved: &ResolvedKey,
        candidates: &[ModelSnapshot],
        mode: RoutingMode,
        complexity: Option<TaskComplexity>,
        fingerprint: &Fingerprint,
    ) -> (ModelId, f64, SelectionPath) {
        let plan = &resolved.plan;

        // An explicitly requested model wins, but only if it survived
        // eligibility. It never bypasses a gate.
        if let Some(wanted) = &request.requested_model {
            let wanted_id = ModelId::new(wanted.clone());
            if candidates.iter().any(|c| c.profile.id == wanted_id) {
                return (wanted_id, 0.0, SelectionPath::Requested);
            }
            debug!(model = %wanted_id, "requested model not eligible, falling through");
        }

        // Session continuity: reuse the conversation's previous model when
        // the topic holds and the model is still eligible.
        if plan.continuity_enabled {
            if let Some(conv) = &request.conversation_id {
                if let Some(pinned) = self.deps.affinity.lookup(
                    conv,
                    fingerprint,
                    plan.correlation_threshold,
                    plan.session_ttl,
                ) {
                    if candidates.iter().any(|c| c.profile.id == pinned) {
                        return (pinned, 0.0, SelectionPath::Affinity);
                    }
                    debug!(model = %pinned, "affinity model no longer eligible");
                }
            }
        }

        // Weighted scoring over the survivors. `candidates` is non-empty
        // here, so select() always yields a winner.
        let table = plan.effective_weights(mode, complexity);
        match self
            .deps
            .scorer
            .select(candidates, table, resolved.subscription.priority_score)
        {
            Some(winner) => (winner.model_id, winner.total, SelectionPath::Scored),
            None => (
                candidates[0].profile.id.clone(),
                0.0,
                SelectionPath::Scored,
            ),
        }
    }

    /// Pick the failover: the best-scored eligible model other than the
    /// primary, or `None` when the primary was the only candidate.
    fn failover_for(
        &self,
        primary: &ModelId,
        candidates: &[ModelSnapshot],
        resolved: &ResolvedKey,
        mode: RoutingMode,
        complexity: Option<TaskComplexity>,
    ) -> Option<ModelId> {
        let plan = &resolved.plan;
        let others: Vec<ModelSnapshot> = candidates
            .iter()
            .filter(|c| &c.profile.id != primary)
            .cloned()
            .collect();
        let table = plan.effective_weights(mode, complexity);
        self.deps
            .scorer
            .select(&others, table, resolved.subscription.priority_score)
            .map(|w| w.model_id)
    }

    async fn dispatch_with_failover(
        &self,
        request: &RouteRequest,
        primary: &ModelId,
        candidates: &[ModelSnapshot],
        resolved: &ResolvedKey,
        mode: RoutingMode,
        complexity: Option<TaskComplexity>,
    ) -> Result<(DispatchOutcome, ModelId, bool, u64), GatewayError> {
        match self.attempt(primary, request).await {
            Ok((outcome, latency_ms)) => return Ok((outcome, primary.clone(), false, latency_ms)),
            Err(primary_err) => {
                warn!(model = %primary, error = %primary_err, "primary dispatch failed");
                metrics::inc_failover(primary.as_str());

                let Some(fallback) =
                    self.failover_for(primary, candidates, resolved, mode, complexity)
                else {
                    return Err(GatewayError::DispatchFailed(format!(
                        "{primary}: {primary_err} (no failover available)"
                    )));
                };

                match self.attempt(&fallback, request).await {
                    Ok((outcome, latency_ms)) => Ok((outcome, fallback, true, latency_ms)),
                    Err(fallback_err) => Err(GatewayError::DispatchFailed(format!(
                        "{primary}: {primary_err}; {fallback}: {fallback_err}"
                    ))),
                }
            }
        }
    }

    /// One bounded dispatch attempt: take a concurrency slot, call the
    /// backend under the model's timeout, record the outcome. The permit
    /// is RAII, so the slot frees on every exit path including caller
    /// cancellation.
    async fn attempt(
        &self,
        model_id: &ModelId,
        request: &RouteRequest,
    ) -> Result<(DispatchOutcome, u64), GatewayError> {
        let snapshot = self
            .deps
            .registry
            .snapshot(model_id)
            .ok_or_else(|| GatewayError::DispatchFailed(format!("unknown model {model_id}")))?;

        let permit = self
            .deps
            .registry
            .acquire_slot(model_id)
            .ok_or_else(|| GatewayError::DispatchFailed(format!("{model_id} at capacity")))?;
        self.refresh_in_flight_gauge(model_id);

        let started = Instant::now();
        let result = tokio::time::timeout(
            snapshot.profile.timeout,
            self.deps.backend.dispatch(&snapshot.profile, request),
        )
        .await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        metrics::observe_dispatch(model_id.as_str(), started.elapsed());
        drop(permit);
        self.refresh_in_flight_gauge(model_id);

        match result {
            Ok(Ok(outcome)) => {
                self.deps.registry.record_outcome(model_id, true, latency_ms);
                Ok((outcome, latency_ms))
            }
            Ok(Err(e)) => {
                self.deps.registry.record_outcome(model_id, false, latency_ms);
                Err(GatewayError::DispatchFailed(e.to_string()))
            }
            Err(_) => {
                self.deps.registry.record_outcome(model_id, false, latency_ms);
                Err(GatewayError::DispatchFailed(format!(
                    "timeout after {:?}",
                    snapshot.profile.timeout
                )))
            }
        }
    }

    fn refresh_in_flight_gauge(&self, model_id: &ModelId) {
        if let Some(snap) = self.deps.registry.snapshot(model_id) {
            metrics::set_in_flight(model_id.as_str(), i64::from(snap.in_flight));
        }
    }

    /// Post-success settlement: budget consume, usage record, affinity pin.
    async fn settle(
        &self,
        resolved: &ResolvedKey,
        served_by: &ModelId,
        outcome: &DispatchOutcome,
        request: &RouteRequest,
        fingerprint: &Fingerprint,
    ) -> Result<i64, GatewayError> {
        let sub = &resolved.subscription;
        let cost_micro = self
            .deps
            .registry
            .snapshot(served_by)
            .map_or(0, |s| s.profile.cost_micro_for(outcome.tokens_in + outcome.tokens_out));

        self.deps.budget.consume(sub, cost_micro).await?;

        self.deps
            .usage
            .record(UsageRecord {
                subscription_id: sub.id.clone(),
                model_id: served_by.clone(),
                tokens_in: outcome.tokens_in,
                tokens_out: outcome.tokens_out,
                cost_micro,
                timestamp: self.deps.clock.now_utc(),
            })
            .await;

        if resolved.plan.continuity_enabled {
            if let Some(conv) = &request.conversation_id {
                self.deps
                    .affinity
                    .pin(conv, served_by.clone(), fingerprint.clone());
            }
        }

        Ok(cost_micro)
    }
}
