//! Answer synthesis from retrieved chunks.
//!
//! The synthesizer first asks the configured [`Generator`] for an answer
//! grounded in the top contexts. When the model is disabled, fails, or
//! returns nothing, it falls back to extractive synthesis: pick the
//! sentences that share the most words with the question, behind a short
//! topic intro, within a word budget.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::SynthesisConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::generator::{GenerationOptions, Generator};
use crate::models::{display_jurisdiction, Chunk, SynthesisKind};

const SECTION_SEPARATOR: &str = "\n\n---SECTION---\n\n";

const CLOSING: &str = "Always consult the complete traffic manual and current local regulations for comprehensive information.";

/// Contexts mined for sentences during extractive synthesis.
const EXTRACT_CONTEXTS: usize = 3;

/// Shortest clause worth answering with when a sentence must be shortened.
const MIN_CLAUSE_WORDS: usize = 4;

/// Sentences at or below this many characters are too short to stand alone.
const MIN_SENTENCE_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub text: String,
    pub kind: SynthesisKind,
}

pub struct AnswerSynthesizer {
    generator: Arc<dyn Generator>,
    config: SynthesisConfig,
    options: GenerationOptions,
}

impl AnswerSynthesizer {
    pub fn new(
        generator: Arc<dyn Generator>,
        config: &SynthesisConfig,
        options: GenerationOptions,
    ) -> Self {
        Self {
            generator,
            config: config.clone(),
            options,
        }
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Write an answer to `query` from `contexts` (best first).
    ///
    /// Fails only when there are no contexts, or the model is unusable and
    /// no context sentence shares a word with the question.
    pub async fn synthesize(
        &self,
        query: &str,
        contexts: &[Chunk],
        jurisdiction: &str,
    ) -> PipelineResult<Synthesis> {
        if contexts.is_empty() {
            return Err(PipelineError::SynthesisFailure(
                "no contexts to answer from".to_string(),
            ));
        }

        let prompt = build_prompt(
            query,
            contexts,
            self.config.max_prompt_contexts,
            self.config.max_context_chars,
        );

        match self.generator.generate(&prompt, &self.options).await {
            Ok(text) if !text.trim().is_empty() => {
                return Ok(Synthesis {
                    text: normalize_length(text.trim(), self.config.max_answer_words),
                    kind: SynthesisKind::Generative,
                });
            }
            Ok(_) => warn!(generator = self.generator.name(), "generator returned empty text"),
            Err(e) => debug!(generator = self.generator.name(), error = %e, "generator unavailable"),
        }

        extract_answer(
            query,
            contexts,
            jurisdiction,
            self.config.max_answer_words,
            self.config.target_answer_words,
        )
        .map(|text| Synthesis {
            text,
            kind: SynthesisKind::Extractive,
        })
        .ok_or_else(|| {
            PipelineError::SynthesisFailure(
                "no retrieved sentence matches the question".to_string(),
            )
        })
    }
}

/// Prompt sent to the generator: the question and the top contexts.
pub fn build_prompt(
    query: &str,
    contexts: &[Chunk],
    max_contexts: usize,
    max_context_chars: usize,
) -> String {
    let context_text = contexts
        .iter()
        .take(max_contexts)
        .map(|c| truncate_chars(&c.text, max_context_chars))
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR);

    format!(
        "Answer this driving question using the official manual text below.\n\n\
         Question: {query}\n\n\
         Official Text:\n{context_text}\n\n\
         Give a clear, practical answer in 100-150 words. Include specific details from the text."
    )
}

/// Cap `text` at `max_words`.
///
/// Over-long text is cut back to its last sentence terminator; when that
/// would keep less than half the budget an ellipsis marks the cut instead.
pub fn normalize_length(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }

    let truncated = words[..max_words].join(" ");
    if let Some(end) = truncated.rfind(['.', '!', '?']) {
        let kept = &truncated[..=end];
        if kept.split_whitespace().count() * 2 >= max_words {
            return kept.to_string();
        }
    }
    format!("{}...", truncated.trim_end_matches([',', ';', ':']))
}

/// Extractive answer from context sentences, or `None` when no sentence
/// shares a content word with the question.
pub fn extract_answer(
    query: &str,
    contexts: &[Chunk],
    jurisdiction: &str,
    max_words: usize,
    target_words: usize,
) -> Option<String> {
    let query_words: HashSet<String> = query
        .split_whitespace()
        .map(clean_word)
        .filter(|w| w.chars().count() > 3)
        .collect();
    if query_words.is_empty() {
        return None;
    }

    let mut seen = HashSet::new();
    let mut candidates: Vec<(String, usize)> = Vec::new();
    for context in contexts.iter().take(EXTRACT_CONTEXTS) {
        for sentence in split_sentences(&context.text) {
            let overlap = sentence
                .split_whitespace()
                .map(clean_word)
                .collect::<HashSet<_>>()
                .intersection(&query_words)
                .count();
            if overlap > 0 && seen.insert(sentence.clone()) {
                candidates.push((sentence, overlap));
            }
        }
    }
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| b.1.cmp(&a.1));

    let intro = topic_intro(query, jurisdiction);
    let mut total = intro.split_whitespace().count();
    let mut parts = vec![intro];

    for (sentence, _) in &candidates {
        if total >= target_words {
            break;
        }
        let n = sentence.split_whitespace().count();
        if total + n <= max_words {
            parts.push(sentence.clone());
            total += n;
        }
    }

    if parts.len() == 1 {
        // Every candidate was longer than the remaining budget: keep the
        // longest leading clause that fits, or give up.
        let budget = max_words.saturating_sub(total);
        let clause = candidates
            .iter()
            .find_map(|(sentence, _)| leading_clause(sentence, budget))?;
        total += clause.split_whitespace().count();
        parts.push(clause);
    }

    if total + CLOSING.split_whitespace().count() <= max_words {
        parts.push(CLOSING.to_string());
    }

    let mut answer = parts.join(" ");
    if !ends_with_terminal(&answer) {
        answer.push('.');
    }
    Some(answer)
}

/// The longest run of whole clauses (ending at `,` `;` or `:`) within
/// `budget` words, closed with a period.
fn leading_clause(sentence: &str, budget: usize) -> Option<String> {
    let words: Vec<&str> = sentence.split_whitespace().take(budget).collect();
    let end = words
        .iter()
        .rposition(|w| w.ends_with([',', ';', ':']))
        .filter(|&i| i >= MIN_CLAUSE_WORDS - 1)?;
    let clause = words[..=end].join(" ");
    Some(format!("{}.", clause.trim_end_matches([',', ';', ':'])))
}

fn topic_intro(query: &str, jurisdiction: &str) -> String {
    let q = query.to_lowercase();
    let place = display_jurisdiction(jurisdiction);
    if q.contains("speed limit") {
        format!(
            "According to the {} traffic manual, speed limits are established to ensure safe driving conditions.",
            place
        )
    } else if q.contains("park") {
        format!(
            "Based on {} parking regulations outlined in the traffic manual:",
            place
        )
    } else if q.contains("turn") {
        format!(
            "{} traffic laws regarding turning movements specify the following:",
            place
        )
    } else {
        format!("According to the official {} traffic manual:", place)
    }
}

/// Split on `.`, `!` or `?` followed by whitespace (or end of text), keeping
/// the terminator. Fragments of twenty characters or fewer are dropped.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        let at_boundary = matches!(c, '.' | '!' | '?')
            && iter.peek().map_or(true, |(_, next)| next.is_whitespace());
        if at_boundary {
            push_sentence(&mut sentences, &text[start..i + c.len_utf8()]);
            start = i + c.len_utf8();
        }
    }
    push_sentence(&mut sentences, &text[start..]);
    sentences
}

fn push_sentence(out: &mut Vec<String>, raw: &str) {
    let s = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if s.chars().count() <= MIN_SENTENCE_CHARS {
        return;
    }
    if ends_with_terminal(&s) {
        out.push(s);
    } else {
        out.push(format!("{}.", s));
    }
}

fn clean_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

fn ends_with_terminal(s: &str) -> bool {
    s.ends_with(['.', '!', '?'])
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed(&'static str);

    #[async_trait]
    impl Generator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn generate(&self, _: &str, _: &GenerationOptions) -> PipelineResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl Generator for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        async fn generate(&self, _: &str, _: &GenerationOptions) -> PipelineResult<String> {
            Err(PipelineError::SynthesisFailure("model offline".to_string()))
        }
    }

    fn chunks() -> Vec<Chunk> {
        vec![
            Chunk::new(
                "washington",
                0,
                "The speed limit in a school zone is 20 mph when children are present. \
                 Fines double in school zones.",
            ),
            Chunk::new(
                "washington",
                1,
                "Residential speed limit is 25 mph unless otherwise posted by signs.",
            ),
            Chunk::new(
                "washington",
                2,
                "Never park within fifteen feet of a fire hydrant on any street.",
            ),
        ]
    }

    fn synthesizer(generator: Arc<dyn Generator>) -> AnswerSynthesizer {
        AnswerSynthesizer::new(
            generator,
            &SynthesisConfig::default(),
            GenerationOptions::default(),
        )
    }

    #[test]
    fn test_prompt_uses_top_two_contexts() {
        let prompt = build_prompt("school zone speed?", &chunks(), 2, 600);
        assert!(prompt.contains("Question: school zone speed?"));
        assert!(prompt.contains("school zone is 20 mph"));
        assert!(prompt.contains("Residential speed limit"));
        assert!(!prompt.contains("fire hydrant"));
        assert_eq!(prompt.matches("---SECTION---").count(), 1);
    }

    #[test]
    fn test_prompt_truncates_contexts_on_char_boundary() {
        let long = Chunk::new("washington", 0, &"é".repeat(1000));
        let prompt = build_prompt("q", &[long], 2, 10);
        assert!(prompt.contains(&"é".repeat(10)));
        assert!(!prompt.contains(&"é".repeat(11)));
    }

    #[test]
    fn test_normalize_length_short_untouched() {
        assert_eq!(normalize_length("Stop fully.", 200), "Stop fully.");
    }

    #[test]
    fn test_normalize_length_cuts_to_sentence() {
        let text = "One two three four. Five six seven eight nine ten.";
        assert_eq!(normalize_length(text, 6), "One two three four.");
    }

    #[test]
    fn test_normalize_length_ellipsis_without_terminator() {
        let text = "one two three four five six seven eight";
        assert_eq!(normalize_length(text, 4), "one two three four...");
    }

    #[test]
    fn test_split_sentences_keeps_decimals_together() {
        let s = split_sentences("Keep 2.5 seconds behind the vehicle ahead. Slow down in rain or fog!");
        assert_eq!(
            s,
            vec![
                "Keep 2.5 seconds behind the vehicle ahead.",
                "Slow down in rain or fog!"
            ]
        );
    }

    #[test]
    fn test_extract_answer_shape() {
        let answer = extract_answer(
            "What is the speed limit in a school zone?",
            &chunks(),
            "washington",
            200,
            150,
        )
        .unwrap();
        assert!(answer.starts_with("According to the Washington traffic manual"));
        assert!(answer.contains("20 mph"));
        assert!(answer.ends_with('.'));
        assert!(answer.contains(CLOSING));
        assert!(answer.split_whitespace().count() <= 200);
    }

    #[test]
    fn test_extract_answer_orders_by_overlap() {
        let answer = extract_answer(
            "school zone speed limit children",
            &chunks(),
            "washington",
            200,
            150,
        )
        .unwrap();
        let school = answer.find("school zone is 20 mph").unwrap();
        let residential = answer.find("Residential").unwrap();
        assert!(school < residential);
    }

    #[test]
    fn test_extract_answer_respects_budget() {
        let long: String = (0..120).map(|i| format!("speed{} ", i)).collect();
        let ctx = vec![Chunk::new(
            "washington",
            0,
            &format!("The speed rule says {}. The speed rule says {}.", long, long),
        )];
        assert!(extract_answer("speed rule", &ctx, "washington", 100, 80).is_none());
    }

    #[test]
    fn test_extract_answer_shortens_long_sentence_at_clause() {
        let tail: String = (0..250).map(|i| format!("rule{} ", i)).collect();
        let ctx = vec![Chunk::new(
            "washington",
            0,
            &format!(
                "The speed rule applies on every highway, in school zones, and near construction sites; {}apply.",
                tail
            ),
        )];
        let answer = extract_answer("speed rule", &ctx, "washington", 200, 150).unwrap();
        assert!(answer.split_whitespace().count() <= 200);
        assert!(!answer.ends_with("..."));
        assert!(answer.contains("near construction sites. "), "got: {}", answer);
        assert!(ends_with_terminal(&answer));
        assert!(!answer.contains("rule1 "));
    }

    #[test]
    fn test_extract_answer_none_without_overlap() {
        assert!(extract_answer("bicycle helmets", &chunks(), "washington", 200, 150).is_none());
    }

    #[test]
    fn test_topic_intros() {
        assert!(topic_intro("Where can I park?", "florida").starts_with("Based on Florida parking"));
        assert!(topic_intro("turning left", "texas").starts_with("Texas traffic laws regarding turning"));
        assert!(topic_intro("lanes", "ohio").starts_with("According to the official Ohio"));
    }

    #[tokio::test]
    async fn test_generative_answer_preferred() {
        let synth = synthesizer(Arc::new(Fixed("  Slow to 20 mph near schools.  ")));
        let out = synth
            .synthesize("school zone speed", &chunks(), "washington")
            .await
            .unwrap();
        assert_eq!(out.kind, SynthesisKind::Generative);
        assert_eq!(out.text, "Slow to 20 mph near schools.");
    }

    #[tokio::test]
    async fn test_failed_generator_falls_back_to_extractive() {
        let synth = synthesizer(Arc::new(Broken));
        let out = synth
            .synthesize("school zone speed", &chunks(), "washington")
            .await
            .unwrap();
        assert_eq!(out.kind, SynthesisKind::Extractive);
        assert!(out.text.contains("20 mph"));
    }

    #[tokio::test]
    async fn test_empty_generation_falls_back_to_extractive() {
        let synth = synthesizer(Arc::new(Fixed("   ")));
        let out = synth
            .synthesize("school zone speed", &chunks(), "washington")
            .await
            .unwrap();
        assert_eq!(out.kind, SynthesisKind::Extractive);
    }

    #[tokio::test]
    async fn test_no_contexts_fails() {
        let synth = synthesizer(Arc::new(Fixed("anything")));
        let err = synth.synthesize("q", &[], "washington").await.unwrap_err();
        assert!(matches!(err, PipelineError::SynthesisFailure(_)));
    }
}
