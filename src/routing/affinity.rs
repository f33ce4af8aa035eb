//! Session continuity.
//!
//! A conversation that keeps talking about the same thing should keep
//! hitting the same model: cached context server-side, consistent tone,
//! no mid-thread style switch. The gateway remembers, per conversation,
//! which model served the last request and a fingerprint of that prompt.
//! The next request reuses the model iff the entry is fresh and the new
//! prompt is similar enough — and the pinned model is still eligible,
//! which the caller must verify. Affinity is a preference, never an
//! override.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::types::ModelId;

/// Order-insensitive word-set fingerprint of a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(BTreeSet<String>);

impl Fingerprint {
    /// Build a fingerprint: lowercase, split on whitespace, strip
    /// non-alphanumeric characters from token edges, drop empties.
    pub fn of(prompt: &str) -> Self {
        let words = prompt
            .to_lowercase()
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|w| !w.is_empty())
            .collect();
        Self(words)
    }

    /// Number of distinct words.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the fingerprint holds no words.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn intersection_size(&self, other: &Self) -> usize {
        self.0.intersection(&other.0).count()
    }
}

/// Pluggable prompt-similarity measure over fingerprints, in `[0, 1]`.
pub trait PromptSimilarity: Send + Sync {
    /// Similarity between two fingerprints; 1.0 means identical word sets.
    fn similarity(&self, a: &Fingerprint, b: &Fingerprint) -> f64;
}

/// Jaccard index over word sets: |A ∩ B| / |A ∪ B|.
#[derive(Debug, Default, Clone, Copy)]
pub struct JaccardSimilarity;

impl PromptSimilarity for JaccardSimilarity {
    fn similarity(&self, a: &Fingerprint, b: &Fingerprint) -> f64 {
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let intersection = a.intersection_size(b);
        let union = a.len() + b.len() - intersection;
        if union == 0 {
            0.0
        } else {
            intersection as f64 / union as f64
        }
    }
}

struct SessionEntry {
    model: ModelId,
    fingerprint: Fingerprint,
    touched_at: Instant,
}

/// Per-conversation model affinity table.
pub struct SessionAffinity {
    sessions: DashMap<String, SessionEntry>,
    similarity: Box<dyn PromptSimilarity>,
}

impl SessionAffinity {
    /// Affinity table over the given similarity measure.
    pub fn new(similarity: Box<dyn PromptSimilarity>) -> Self {
        Self {
            sessions: DashMap::new(),
            similarity,
        }
    }

    /// If the conversation has a fresh entry and the prompt is at least
    /// `threshold`-similar to the previous one, return the pinned model.
    /// Expired entries are removed on the way.
    pub fn lookup(
        &self,
        conversation_id: &str,
        prompt: &Fingerprint,
        threshold: f64,
        ttl: Duration,
    ) -> Option<ModelId> {
        let entry = self.sessions.get(conversation_id)?;
        if entry.touched_at.elapsed() > ttl {
            drop(entry);
            self.sessions.remove(conversation_id);
            return None;
        }
        let score = self.similarity.similarity(&entry.fingerprint, prompt);
        if score >= threshold {
            Some(entry.model.clone())
        } else {
            None
        }
    }

    /// Record the model that served this conversation's latest request,
    /// refreshing the TTL window.
    pub fn pin(&self, conversation_id: &str, model: ModelId, prompt: Fingerprint) {
        self.sessions.insert(
            conversation_id.to_string(),
            SessionEntry {
                model,
                fingerprint: prompt,
                touched_at: Instant::now(),
            },
        );
    }

    /// Drop a conversation's entry.
    pub fn forget(&self, conversation_id: &str) {
        self.sessions.remove(conversation_id);
    }

    /// Live entry count (expired entries may still be counted until their
    /// next lookup).
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are tracked.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SessionAffinity {
        SessionAffinity::new(Box::new(JaccardSimilarity))
    }

    #[test]
    fn test_fingerprint_normalizes_case_and_punctuation() {
        let a = Fingerprint::of("Explain the Borrow checker!");
        let b = Fingerprint::of("explain   the borrow CHECKER");
        assert_eq!(a, b);
    }

    #[test]
    fn test_jaccard_identical_sets_is_one() {
        let f = Fingerprint::of("rust ownership model");
        assert!((JaccardSimilarity.similarity(&f, &f) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_jaccard_disjoint_sets_is_zero() {
        let a = Fingerprint::of("rust ownership");
        let b = Fingerprint::of("python decorators");
        assert_eq!(JaccardSimilarity.similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_jaccard_partial_overlap() {
        // {a b c} vs {b c d}: intersection 2, union 4.
        let a = Fingerprint::of("a b c");
        let b = Fingerprint::of("b c d");
        assert!((JaccardSimilarity.similarity(&a, &b) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_lookup_hits_when_similar_and_fresh() {
        let table = table();
        table.pin(
            "conv-1",
            ModelId::new("m"),
            Fingerprint::of("explain rust lifetimes in detail"),
        );

        let hit = table.lookup(
            "conv-1",
            &Fingerprint::of("explain rust lifetimes more"),
            0.5,
            Duration::from_secs(60),
        );
        assert_eq!(hit, Some(ModelId::new("m")));
    }

    #[test]
    fn test_lookup_misses_on_topic_change() {
        let table = table();
        table.pin(
            "conv-1",
            ModelId::new("m"),
            Fingerprint::of("explain rust lifetimes"),
        );

        let hit = table.lookup(
            "conv-1",
            &Fingerprint::of("write a haiku about autumn leaves"),
            0.5,
            Duration::from_secs(60),
        );
        assert_eq!(hit, None);
    }

    #[test]
    fn test_lookup_misses_after_ttl() {
        let table = table();
        table.pin("conv-1", ModelId::new("m"), Fingerprint::of("same topic"));

        std::thread::sleep(Duration::from_millis(30));
        let hit = table.lookup(
            "conv-1",
            &Fingerprint::of("same topic"),
            0.5,
            Duration::from_millis(10),
        );
        assert_eq!(hit, None);
        // Expired entry was evicted.
        assert!(table.is_empty());
    }

    #[test]
    fn test_unknown_conversation_misses() {
        let table = table();
        let hit = table.lookup(
            "ghost",
            &Fingerprint::of("anything"),
            0.5,
            Duration::from_secs(60),
        );
        assert_eq!(hit, None);
    }

    #[test]
    fn test_pin_refreshes_model_and_fingerprint() {
        let table = table();
        table.pin("conv-1", ModelId::new("old"), Fingerprint::of("topic one"));
        table.pin("conv-1", ModelId::new("new"), Fingerprint::of("topic two"));

        let hit = table.lookup(
            "conv-1",
            &Fingerprint::of("topic two"),
            0.5,
            Duration::from_secs(60),
        );
        assert_eq!(hit, Some(ModelId::new("new")));
    }
}
