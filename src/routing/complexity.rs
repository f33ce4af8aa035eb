//! Prompt complexity detection.
//!
//! A cheap lexical classifier that buckets the latest user prompt so
//! `auto` mode can steer simple chat to cheap models and heavy reasoning
//! to capable ones. Signals, strongest first: multimodal markers, token
//! volume, reasoning keywords, raw prompt length. No model call, no
//! tokenizer — this runs on every request and must stay trivial.

use serde::{Deserialize, Serialize};

/// Detected task class for a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskComplexity {
    /// Short conversational request.
    Simple,
    /// Multi-step reasoning, code, or analysis.
    Reasoning,
    /// Very large context or explicitly deep work.
    Complex,
    /// References images, audio, or other non-text media.
    Multimodal,
}

/// Token volume beyond which a prompt is `Complex` regardless of wording.
const COMPLEX_TOKEN_FLOOR: u64 = 10_000;

/// Token volume beyond which a prompt is at least `Reasoning`.
const REASONING_TOKEN_FLOOR: u64 = 5_000;

/// Character length under which a keyword-free prompt is `Simple`.
const SIMPLE_CHAR_CEILING: usize = 100;

/// Character length under which a keyword-free prompt is `Reasoning` at
/// most; longer keyword-free prompts are treated as `Complex`.
const REASONING_CHAR_CEILING: usize = 500;

const MULTIMODAL_MARKERS: &[&str] = &[
    "image", "picture", "photo", "screenshot", "diagram", "audio", "video",
];

const COMPLEX_MARKERS: &[&str] = &[
    "architecture",
    "design a system",
    "prove",
    "formal",
    "optimize",
    "refactor",
    "migration",
];

const REASONING_MARKERS: &[&str] = &[
    "why",
    "how",
    "explain",
    "analyze",
    "compare",
    "debug",
    "code",
    "function",
    "algorithm",
    "step by step",
];

/// Stateless lexical classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct ComplexityDetector;

impl ComplexityDetector {
    /// Classify a prompt given its estimated token volume.
    pub fn detect(&self, prompt: &str, estimated_tokens: u64) -> TaskComplexity {
        let lowered = prompt.to_lowercase();

        if MULTIMODAL_MARKERS.iter().any(|m| lowered.contains(m)) {
            return TaskComplexity::Multimodal;
        }
        if estimated_tokens > COMPLEX_TOKEN_FLOOR {
            return TaskComplexity::Complex;
        }
        if COMPLEX_MARKERS.iter().any(|m| lowered.contains(m)) {
            return TaskComplexity::Complex;
        }
        if estimated_tokens > REASONING_TOKEN_FLOOR
            || REASONING_MARKERS.iter().any(|m| lowered.contains(m))
        {
            return TaskComplexity::Reasoning;
        }
        if lowered.len() < SIMPLE_CHAR_CEILING {
            TaskComplexity::Simple
        } else if lowered.len() < REASONING_CHAR_CEILING {
            TaskComplexity::Reasoning
        } else {
            TaskComplexity::Complex
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(prompt: &str) -> TaskComplexity {
        ComplexityDetector.detect(prompt, (prompt.len() / 4) as u64)
    }

    #[test]
    fn test_short_greeting_is_simple() {
        assert_eq!(detect("hi, what's the weather like?"), TaskComplexity::Simple);
    }

    #[test]
    fn test_reasoning_keyword_upgrades() {
        assert_eq!(
            detect("explain the borrow checker to me"),
            TaskComplexity::Reasoning
        );
    }

    #[test]
    fn test_complex_keyword_wins_over_reasoning() {
        assert_eq!(
            detect("design a system architecture and explain why"),
            TaskComplexity::Complex
        );
    }

    #[test]
    fn test_multimodal_marker_dominates_everything() {
        assert_eq!(
            detect("analyze this screenshot and design a system around it"),
            TaskComplexity::Multimodal
        );
    }

    #[test]
    fn test_huge_token_volume_is_complex() {
        assert_eq!(
            ComplexityDetector.detect("summarize", 20_000),
            TaskComplexity::Complex
        );
    }

    #[test]
    fn test_moderate_token_volume_is_reasoning() {
        assert_eq!(
            ComplexityDetector.detect("summarize", 6_000),
            TaskComplexity::Reasoning
        );
    }

    #[test]
    fn test_long_keyword_free_prompt_by_length() {
        let medium = "a".repeat(200);
        assert_eq!(
            ComplexityDetector.detect(&medium, 50),
            TaskComplexity::Reasoning
        );
        let long = "a".repeat(600);
        assert_eq!(
            ComplexityDetector.detect(&long, 150),
            TaskComplexity::Complex
        );
    }
}
