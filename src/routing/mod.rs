//! Model selection: eligibility filtering, scoring, complexity detection,
//! and session affinity.
//!
//! The pipeline narrows candidates in stages. Eligibility is a hard filter
//! (plan access, health, context window, concurrency headroom); session
//! affinity may pin the conversation's previous model if it is still
//! eligible and the prompt is similar enough; otherwise the scorer ranks
//! the survivors and picks the argmax deterministically.

pub mod affinity;
pub mod complexity;
pub mod eligibility;
pub mod scorer;

pub use affinity::{Fingerprint, JaccardSimilarity, PromptSimilarity, SessionAffinity};
pub use complexity::{ComplexityDetector, TaskComplexity};
pub use eligibility::{eligible_candidates, ExclusionReason};
pub use scorer::{ModelScorer, ScoreBreakdown, ScoringWeights};

use serde::{Deserialize, Serialize};

/// How aggressively the plan trades cost against capability.
///
/// `Auto` consults complexity detection; the fixed modes apply a static
/// weight overlay from the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Pick per request based on detected task complexity.
    Auto,
    /// Favour the most capable models regardless of cost.
    Performance,
    /// Favour cheap models, accepting lower capability.
    Efficient,
    /// Cheapest viable model only.
    Lite,
}

impl Default for RoutingMode {
    fn default() -> Self {
        Self::Auto
    }
}
