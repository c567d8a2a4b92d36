//! Heuristic relevance ranking over a jurisdiction's chunks.
//!
//! Five signals are summed per chunk, each scaled by a configurable weight:
//!
//! | Signal | Fires when |
//! |--------|-----------|
//! | exact phrase | a domain phrase ("speed limit", "fire hydrant") is in both query and chunk, once per phrase |
//! | keyword | a query content word (len > 2, not a stop word) occurs in the chunk, once per word |
//! | numeric | both query and chunk contain a digit |
//! | domain term | a generic traffic term ("lane", "permit") is in both, once per term |
//! | fuzzy | [`partial_ratio`] of query vs. chunk exceeds the threshold |
//!
//! Zero-score chunks are dropped, the rest sorted descending (stable, so ties
//! keep corpus order), cut to `k`, and filtered by `min_score` so weakly
//! related text is never forced into synthesis.

use anyhow::Result;
use std::sync::Arc;

use crate::config::{Config, RetrievalConfig};
use crate::corpus::CorpusStore;
use crate::models::{normalize_jurisdiction, normalize_query, Chunk, ScoreBreakdown, ScoredChunk};
use crate::similarity::partial_ratio;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "what", "how", "can", "you", "your", "when", "where", "which",
    "who", "why", "does", "with", "this", "that", "there", "from", "into", "about", "have", "has",
    "should", "must", "will", "would", "could", "was", "were", "been", "being", "its", "any",
];

pub struct RelevanceSearch {
    corpus: Arc<CorpusStore>,
    config: RetrievalConfig,
}

/// A query pre-processed once per search call.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub normalized: String,
    pub words: Vec<String>,
    pub has_digit: bool,
    phrases: Vec<String>,
    terms: Vec<String>,
}

impl PreparedQuery {
    pub fn new(query: &str, config: &RetrievalConfig) -> Self {
        let normalized = normalize_query(query);
        let words = content_words(&normalized);
        let has_digit = normalized.chars().any(|c| c.is_ascii_digit());
        let phrases = config
            .exact_phrases
            .iter()
            .map(|p| p.to_lowercase())
            .filter(|p| !p.is_empty() && normalized.contains(p.as_str()))
            .collect();
        let terms = config
            .domain_terms
            .iter()
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty() && normalized.contains(t.as_str()))
            .collect();
        Self {
            normalized,
            words,
            has_digit,
            phrases,
            terms,
        }
    }
}

impl RelevanceSearch {
    pub fn new(corpus: Arc<CorpusStore>, config: &RetrievalConfig) -> Self {
        Self {
            corpus,
            config: config.clone(),
        }
    }

    /// Best-first chunks for `query` in `jurisdiction`, at most `k`.
    pub fn search(&self, query: &str, jurisdiction: &str, k: usize) -> Vec<Chunk> {
        self.search_scored(query, jurisdiction, k)
            .into_iter()
            .map(|sc| sc.chunk)
            .collect()
    }

    /// Like [`search`](Self::search) but keeps scores and per-signal breakdowns.
    pub fn search_scored(&self, query: &str, jurisdiction: &str, k: usize) -> Vec<ScoredChunk> {
        let prepared = PreparedQuery::new(query, &self.config);
        if prepared.normalized.is_empty() || k == 0 {
            return Vec::new();
        }

        let chunks = self.corpus.load(jurisdiction);
        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .filter_map(|chunk| {
                let breakdown = self.score_chunk(&prepared, chunk);
                let score = breakdown.total();
                (score > 0.0).then(|| ScoredChunk {
                    chunk: chunk.clone(),
                    score,
                    breakdown,
                })
            })
            .collect();
        let candidates = scored.len();

        // Stable: equal scores keep corpus order
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored.retain(|sc| sc.score >= self.config.min_score);

        tracing::debug!(
            jurisdiction = %normalize_jurisdiction(jurisdiction),
            candidates,
            returned = scored.len(),
            "relevance search"
        );
        scored
    }

    pub fn score_chunk(&self, query: &PreparedQuery, chunk: &Chunk) -> ScoreBreakdown {
        let w = &self.config.weights;
        let text = chunk.normalized.as_str();

        let phrase_hits = query
            .phrases
            .iter()
            .filter(|p| text.contains(p.as_str()))
            .count();
        let word_hits = query
            .words
            .iter()
            .filter(|word| text.contains(word.as_str()))
            .count();
        let numeric = query.has_digit && text.chars().any(|c| c.is_ascii_digit());
        let term_hits = query
            .terms
            .iter()
            .filter(|t| text.contains(t.as_str()))
            .count();
        let fuzzy = partial_ratio(&query.normalized, text) > self.config.fuzzy_threshold;

        ScoreBreakdown {
            exact_phrase: w.exact_phrase * phrase_hits as f64,
            keyword: w.keyword * word_hits as f64,
            numeric: if numeric { w.numeric } else { 0.0 },
            domain_term: w.domain_term * term_hits as f64,
            fuzzy: if fuzzy { w.fuzzy } else { 0.0 },
        }
    }
}

/// Distinct content words of a normalized query, in first-seen order.
pub fn content_words(normalized: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for raw in normalized.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        if word.chars().count() <= 2 || STOP_WORDS.contains(&word) {
            continue;
        }
        if !words.iter().any(|w| w == word) {
            words.push(word.to_string());
        }
    }
    words
}

// ============ CLI ============

pub fn run_search(
    config: &Config,
    query: &str,
    jurisdiction: Option<String>,
    limit: Option<usize>,
    explain: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let jurisdiction = jurisdiction
        .map(|j| normalize_jurisdiction(&j))
        .unwrap_or_else(|| normalize_jurisdiction(&config.pipeline.default_jurisdiction));
    let corpus = Arc::new(CorpusStore::new(&config.corpus)?);
    let search = RelevanceSearch::new(corpus, &config.retrieval);
    let results = search.search_scored(query, &jurisdiction, limit.unwrap_or(config.retrieval.top_k));

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} #{}",
            i + 1,
            result.score,
            result.chunk.jurisdiction,
            result.chunk.index
        );
        println!("    excerpt: \"{}\"", excerpt(&result.chunk.text, 240));
        if explain {
            let b = &result.breakdown;
            println!(
                "    signals: phrase={:.1} keyword={:.1} numeric={:.1} domain={:.1} fuzzy={:.1}",
                b.exact_phrase, b.keyword, b.numeric, b.domain_term, b.fuzzy
            );
        }
        println!();
    }

    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
