//! # tokio-model-gateway
//!
//! An admission-control and model-routing gateway for multi-backend AI
//! inference over Tokio.
//!
//! ## Pipeline
//!
//! Every request passes through an ordered chain of gates; the first failing
//! gate aborts with a typed error:
//!
//! ```text
//! AUTH → RATE_LIMIT → QUOTA → BUDGET_PRECHECK → ELIGIBILITY
//!      → AFFINITY_OR_SCORE → DISPATCH (≤1 failover) → SETTLE
//! ```
//!
//! Shared counters (rate buckets, daily quota, monthly budget, per-model
//! concurrency) use atomic check-and-update semantics so concurrent requests
//! can never drive them negative or past their ceilings. The only suspension
//! point on external I/O is the final dispatch to the chosen backend.

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod auth;
pub mod clock;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod limits;
pub mod metrics;
pub mod registry;
pub mod routing;
pub mod selector;
pub mod store;
pub mod types;
pub mod usage;
pub mod web_api;

// Re-exports for convenience
pub use auth::KeyResolver;
pub use registry::ModelRegistry;
pub use selector::{RouteOutcome, Selector, SelectorDeps};
pub use store::{CounterStore, MemoryCounterStore};
pub use types::{ModelProfile, Plan, Subscription};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
/// - anything else (including unset) — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`GatewayError::Other`] if the global subscriber has already been
/// set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), GatewayError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| GatewayError::Other(format!("tracing init failed: {e}")))
}

// ── Error taxonomy ─────────────────────────────────────────────────────────

/// Every failure surface in the admission pipeline, as a typed result.
///
/// Expected exhaustion outcomes (rate / quota / budget) are ordinary variants
/// here, not panics or retries: the caller decides what to do with them. Only
/// [`GatewayError::Store`] represents an unexpected fault, and it fails
/// closed — the request is denied rather than allowed past a gate.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The credential hash matched no stored API key.
    #[error("invalid API key")]
    InvalidKey,

    /// The API key exists but has been explicitly revoked.
    #[error("API key has been revoked")]
    RevokedKey,

    /// The key resolved, but its subscription is suspended or expired.
    #[error("subscription is not active")]
    InactiveSubscription,

    /// The subscription's token bucket is empty. Caller-retryable.
    #[error("rate limit exceeded, retry in {retry_after:?}")]
    RateLimited {
        /// How long until the bucket holds a full token again.
        retry_after: Duration,
    },

    /// The per-day request quota is exhausted; resolves at the next UTC day.
    #[error("daily quota exceeded ({remaining} remaining)")]
    QuotaExceeded {
        /// Requests still available today (always 0 ≤ n < requested units).
        remaining: i64,
    },

    /// The monthly spend ceiling would be crossed; resolves at the next
    /// billing period.
    #[error("monthly budget exceeded ({remaining_micro} micro-dollars remaining)")]
    BudgetExceeded {
        /// Micro-dollars still available this period, floored at 0.
        remaining_micro: i64,
    },

    /// No model survived the eligibility filter. The gateway never falls
    /// back to a disallowed, unhealthy, or overloaded model.
    #[error("no eligible model for this request")]
    NoEligibleModel,

    /// Dispatch failed on the primary model and on the single failover.
    #[error("dispatch failed: {0}")]
    DispatchFailed(String),

    /// The request body is structurally unusable (e.g. no user message).
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The counter store is unavailable or returned corrupt data. The
    /// pipeline fails closed on this variant.
    #[error("store error: {0}")]
    Store(String),

    /// A configuration value is missing or invalid, surfaced at build time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// Stable machine-readable kind, used for the wire `error_kind` field
    /// and as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidKey => "invalid_key",
            Self::RevokedKey => "revoked_key",
            Self::InactiveSubscription => "inactive_subscription",
            Self::RateLimited { .. } => "rate_limited",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::NoEligibleModel => "no_eligible_model",
            Self::DispatchFailed(_) => "dispatch_failed",
            Self::MalformedRequest(_) => "malformed_request",
            Self::Store(_) => "store_error",
            Self::Config(_) => "config_error",
            Self::Other(_) => "other",
        }
    }
}

impl From<store::StoreError> for GatewayError {
    fn from(e: store::StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

// ── Request / response contract ────────────────────────────────────────────

/// One turn of a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Speaker role (`"user"`, `"assistant"`, `"system"`).
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Convenience constructor for a `user` message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// An inbound routing request as received from a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Raw API credential. Never logged, never stored.
    pub credential: String,
    /// Conversation key for session affinity, if the caller has one.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Chat payload; the latest `user` message drives routing.
    pub messages: Vec<ChatMessage>,
    /// Model the caller would prefer. Honored only if it survives the
    /// eligibility filter; never bypasses a gate.
    #[serde(default)]
    pub requested_model: Option<String>,
    /// Caller-supplied token estimate. Derived from payload size if absent.
    #[serde(default)]
    pub estimated_tokens: Option<u64>,
    /// Routing mode override (`auto`, `performance`, `efficient`, `lite`).
    /// Falls back to the plan's default mode.
    #[serde(default)]
    pub mode: Option<routing::RoutingMode>,
}

impl RouteRequest {
    /// Return the content of the latest `user` message, if any.
    pub fn latest_user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }

    /// Token estimate for this payload: the caller's figure when supplied,
    /// otherwise total message characters / 4 (rough chars-per-token rule).
    pub fn token_estimate(&self) -> u64 {
        self.estimated_tokens.unwrap_or_else(|| {
            let chars: usize = self.messages.iter().map(|m| m.content.len()).sum();
            (chars / 4) as u64
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_user_prompt_picks_last_user_message() {
        let req = RouteRequest {
            credential: "k".into(),
            conversation_id: None,
            messages: vec![
                ChatMessage::user("first"),
                ChatMessage {
                    role: "assistant".into(),
                    content: "reply".into(),
                },
                ChatMessage::user("second"),
            ],
            requested_model: None,
            estimated_tokens: None,
            mode: None,
        };
        assert_eq!(req.latest_user_prompt(), Some("second"));
    }

    #[test]
    fn test_latest_user_prompt_none_without_user_messages() {
        let req = RouteRequest {
            credential: "k".into(),
            conversation_id: None,
            messages: vec![ChatMessage {
                role: "system".into(),
                content: "preamble".into(),
            }],
            requested_model: None,
            estimated_tokens: None,
            mode: None,
        };
        assert!(req.latest_user_prompt().is_none());
    }

    #[test]
    fn test_token_estimate_prefers_caller_figure() {
        let req = RouteRequest {
            credential: "k".into(),
            conversation_id: None,
            messages: vec![ChatMessage::user("a very long message indeed")],
            requested_model: None,
            estimated_tokens: Some(777),
            mode: None,
        };
        assert_eq!(req.token_estimate(), 777);
    }

    #[test]
    fn test_token_estimate_derives_from_chars_over_four() {
        let req = RouteRequest {
            credential: "k".into(),
            conversation_id: None,
            messages: vec![ChatMessage::user("abcdefgh")], // 8 chars
            requested_model: None,
            estimated_tokens: None,
            mode: None,
        };
        assert_eq!(req.token_estimate(), 2);
    }

    #[test]
    fn test_error_kind_is_stable_per_variant() {
        assert_eq!(GatewayError::InvalidKey.kind(), "invalid_key");
        assert_eq!(
            GatewayError::QuotaExceeded { remaining: 0 }.kind(),
            "quota_exceeded"
        );
        assert_eq!(GatewayError::NoEligibleModel.kind(), "no_eligible_model");
    }

    #[test]
    fn test_error_display_includes_remaining_quota() {
        let err = GatewayError::QuotaExceeded { remaining: 3 };
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_init_tracing_second_call_returns_err() {
        let _ = init_tracing();
        let result = init_tracing();
        assert!(result.is_err(), "double init must return Err, not panic");
    }
}
