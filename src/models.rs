//! Core data models used throughout the answer pipeline.
//!
//! These types represent the corpus chunks, ranked search hits, and answer
//! records that flow from the corpus store through the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An immutable unit of jurisdiction rule text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub jurisdiction: String,
    /// Position within the jurisdiction's corpus; used as the ranking tie-break.
    pub index: usize,
    pub text: String,
    /// Lower-cased `text`, computed once at load time.
    pub normalized: String,
}

impl Chunk {
    pub fn new(jurisdiction: &str, index: usize, text: &str) -> Self {
        Self {
            jurisdiction: jurisdiction.to_string(),
            index,
            text: text.to_string(),
            normalized: text.to_lowercase(),
        }
    }
}

/// Per-signal contributions to a chunk's relevance score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub exact_phrase: f64,
    pub keyword: f64,
    pub numeric: f64,
    pub domain_term: f64,
    pub fuzzy: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.exact_phrase + self.keyword + self.numeric + self.domain_term + self.fuzzy
    }
}

/// A chunk paired with its score for one search call.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Which component produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Cache,
    Quick,
    Retrieval,
    Fallback,
    Error,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Cache => "cache",
            Tier::Quick => "quick",
            Tier::Retrieval => "retrieval",
            Tier::Fallback => "fallback",
            Tier::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cache" => Some(Tier::Cache),
            "quick" => Some(Tier::Quick),
            "retrieval" => Some(Tier::Retrieval),
            "fallback" => Some(Tier::Fallback),
            "error" => Some(Tier::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the orchestrator ended in the fallback tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Timeout,
    Error,
    NoContext,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::Timeout => "timeout",
            FallbackReason::Error => "error",
            FallbackReason::NoContext => "no_context",
        }
    }
}

/// How a retrieval-tier answer was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisKind {
    Generative,
    Extractive,
}

/// The record returned for every question. Never absent, never an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResult {
    #[serde(rename = "response")]
    pub text: String,
    pub tier: Tier,
    pub elapsed_ms: u64,
    pub jurisdiction: String,
    pub contexts_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisKind>,
}

/// Trim, lower-case, and collapse internal whitespace.
///
/// This is the canonical form used for cache keys and search input, so
/// `"  Speed   Limit?  "` and `"speed limit?"` are the same question.
pub fn normalize_query(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical jurisdiction identifier: lower-case alphanumerics only.
///
/// `"New Jersey"`, `"new_jersey"`, and the file stem `"NewJersey"` all map to
/// `"newjersey"`.
pub fn normalize_jurisdiction(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Human-readable form of a jurisdiction id, e.g. `"washington"` → `"Washington"`.
pub fn display_jurisdiction(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query_case_and_whitespace() {
        assert_eq!(normalize_query("  Speed Limit?  "), "speed limit?");
        assert_eq!(normalize_query("speed\t\tlimit?"), "speed limit?");
        assert_eq!(normalize_query("   "), "");
    }

    #[test]
    fn test_normalize_jurisdiction_variants() {
        assert_eq!(normalize_jurisdiction("Washington"), "washington");
        assert_eq!(normalize_jurisdiction("New Jersey"), "newjersey");
        assert_eq!(normalize_jurisdiction("new_jersey"), "newjersey");
    }

    #[test]
    fn test_display_jurisdiction() {
        assert_eq!(display_jurisdiction("florida"), "Florida");
        assert_eq!(display_jurisdiction(""), "");
    }

    #[test]
    fn test_tier_round_trips_through_str() {
        for tier in [
            Tier::Cache,
            Tier::Quick,
            Tier::Retrieval,
            Tier::Fallback,
            Tier::Error,
        ] {
            assert_eq!(Tier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(Tier::parse("rag"), None);
    }

    #[test]
    fn test_answer_result_wire_shape() {
        let result = AnswerResult {
            text: "Stop fully.".to_string(),
            tier: Tier::Fallback,
            elapsed_ms: 12,
            jurisdiction: "washington".to_string(),
            contexts_used: 0,
            fallback_reason: Some(FallbackReason::NoContext),
            synthesis: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["response"], "Stop fully.");
        assert_eq!(json["tier"], "fallback");
        assert_eq!(json["fallback_reason"], "no_context");
        assert!(json.get("synthesis").is_none());
    }
}
