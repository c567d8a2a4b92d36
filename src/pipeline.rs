//! The answer pipeline: cache, quick table, retrieval, fallback.
//!
//! [`AnswerPipeline::answer`] walks a fixed sequence of tiers and returns at
//! the first one that produces text:
//!
//! ```text
//!  validate ─▶ CACHE_CHECK ─hit─▶ cache
//!                  │ miss
//!                  ▼
//!             QUICK_CHECK ─match─▶ quick        (profiles with quick answers)
//!                  │ miss
//!                  ▼
//!              RETRIEVAL ──in time──▶ retrieval  (written to the cache)
//!                  │ timeout / error / no context
//!                  ▼
//!              FALLBACK ─────────────▶ fallback
//! ```
//!
//! Retrieval runs in one spawned task (search on the blocking pool, then
//! synthesis) raced against the profile deadline. When the deadline fires
//! the task is told to stop and aborted. Only this module writes the cache,
//! and only after an in-time success, so a result that arrives late is
//! dropped with its task. The cache write never waits on disk, and
//! `elapsed_ms` is taken after it.

use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::config::{Config, PipelineConfig, Profile, ProfileConfig};
use crate::corpus::CorpusStore;
use crate::error::PipelineError;
use crate::fallback::FallbackLibrary;
use crate::generator::{create_generator, GenerationOptions};
use crate::models::{
    normalize_jurisdiction, AnswerResult, FallbackReason, SynthesisKind, Tier,
};
use crate::search::RelevanceSearch;
use crate::synth::{AnswerSynthesizer, Synthesis};

pub struct AnswerPipeline {
    corpus: Arc<CorpusStore>,
    cache: Arc<ResponseCache>,
    search: Arc<RelevanceSearch>,
    synthesizer: Arc<AnswerSynthesizer>,
    fallback: FallbackLibrary,
    config: PipelineConfig,
    top_k: usize,
    stats: PipelineStats,
}

/// Output of a successful retrieval worker.
struct Retrieved {
    synthesis: Synthesis,
    contexts_used: usize,
}

impl AnswerPipeline {
    /// Assemble a pipeline from already-built services.
    pub fn new(
        corpus: Arc<CorpusStore>,
        cache: Arc<ResponseCache>,
        synthesizer: Arc<AnswerSynthesizer>,
        config: &Config,
    ) -> Self {
        let search = Arc::new(RelevanceSearch::new(corpus.clone(), &config.retrieval));
        Self {
            corpus,
            cache,
            search,
            synthesizer,
            fallback: FallbackLibrary::new(&config.fallback),
            config: config.pipeline.clone(),
            top_k: config.retrieval.top_k,
            stats: PipelineStats::default(),
        }
    }

    /// Build every service from configuration: corpus (preloaded when
    /// configured), persisted cache, and the configured generator.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let corpus = Arc::new(CorpusStore::new(&config.corpus)?);
        if config.corpus.preload {
            let store = corpus.clone();
            tokio::task::spawn_blocking(move || store.load_all()).await?;
        }

        let cache = Arc::new(ResponseCache::open(&config.cache).await);
        let generator = create_generator(&config.generator)?;
        info!(generator = generator.name(), "generator ready");
        let synthesizer = Arc::new(AnswerSynthesizer::new(
            generator,
            &config.synthesis,
            GenerationOptions::from(&config.generator),
        ));

        Ok(Self::new(corpus, cache, synthesizer, config))
    }

    pub fn corpus(&self) -> &Arc<CorpusStore> {
        &self.corpus
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn fallback(&self) -> &FallbackLibrary {
        &self.fallback
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Canonical jurisdiction for a hint; absent or blank → the default.
    pub fn resolve_jurisdiction(&self, hint: Option<&str>) -> String {
        let resolved = hint.map(normalize_jurisdiction).unwrap_or_default();
        if resolved.is_empty() {
            normalize_jurisdiction(&self.config.default_jurisdiction)
        } else {
            resolved
        }
    }

    /// Answer one question. Always returns a result; never an error.
    pub async fn answer(
        &self,
        message: &str,
        jurisdiction: Option<&str>,
        profile: Profile,
    ) -> AnswerResult {
        let span = info_span!("answer", request_id = %Uuid::new_v4(), profile = profile.as_str());
        self.answer_inner(message, jurisdiction, profile)
            .instrument(span)
            .await
    }

    async fn answer_inner(
        &self,
        message: &str,
        jurisdiction: Option<&str>,
        profile: Profile,
    ) -> AnswerResult {
        let started = Instant::now();
        let query = message.trim();
        let jurisdiction = self.resolve_jurisdiction(jurisdiction);
        let outcome = Outcome::new(started, &jurisdiction);

        if query.is_empty() {
            return self.finish(outcome.error("Please enter a driving question."));
        }
        let max = self.config.max_message_chars;
        if query.chars().count() > max {
            return self.finish(outcome.error(&format!(
                "Your question is too long. Please keep it under {} characters.",
                max
            )));
        }

        if let Some(entry) = self.cache.get(query, &jurisdiction) {
            return self.finish(outcome.answered(
                Tier::Cache,
                entry.text,
                entry.contexts_used,
                None,
            ));
        }

        let profile_config = self.config.profile(profile);
        if profile_config.quick_answers {
            if let Some(text) = self.fallback.quick(query) {
                return self.finish(outcome.answered(Tier::Quick, text.to_string(), 0, None));
            }
        }

        let reason = match self.retrieve(query, &jurisdiction, profile_config, started).await {
            Ok(retrieved) => {
                let mut result = outcome.answered(
                    Tier::Retrieval,
                    retrieved.synthesis.text,
                    retrieved.contexts_used,
                    Some(retrieved.synthesis.kind),
                );
                self.cache.put(query, &jurisdiction, &result);
                result.elapsed_ms = outcome.elapsed_ms();
                return self.finish(result);
            }
            Err(reason) => reason,
        };

        if reason == FallbackReason::Timeout {
            self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
        }
        self.finish(outcome.fallback(self.fallback.respond(query), reason))
    }

    /// Run search and synthesis in one task under the profile deadline.
    async fn retrieve(
        &self,
        query: &str,
        jurisdiction: &str,
        profile: &ProfileConfig,
        started: Instant,
    ) -> std::result::Result<Retrieved, FallbackReason> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let k = profile.top_k.unwrap_or(self.top_k);

        let worker = {
            let search = self.search.clone();
            let synthesizer = self.synthesizer.clone();
            let cancelled = cancelled.clone();
            let query = query.to_string();
            let jurisdiction = jurisdiction.to_string();
            async move {
                let contexts = {
                    let (q, j) = (query.clone(), jurisdiction.clone());
                    tokio::task::spawn_blocking(move || search.search(&q, &j, k))
                        .await
                        .map_err(|e| {
                            PipelineError::SynthesisFailure(format!("search task failed: {}", e))
                        })?
                };
                if contexts.is_empty() {
                    return Ok(None);
                }
                if cancelled.load(Ordering::Relaxed) {
                    return Err(PipelineError::RetrievalTimeout {
                        elapsed: started.elapsed(),
                    });
                }
                let synthesis = synthesizer
                    .synthesize(&query, &contexts, &jurisdiction)
                    .await?;
                Ok::<_, PipelineError>(Some(Retrieved {
                    synthesis,
                    contexts_used: contexts.len(),
                }))
            }
        };

        let mut handle = tokio::spawn(worker);
        let remaining = profile.timeout().saturating_sub(started.elapsed());

        match tokio::time::timeout(remaining, &mut handle).await {
            Ok(Ok(Ok(Some(retrieved)))) if !retrieved.synthesis.text.trim().is_empty() => {
                Ok(retrieved)
            }
            Ok(Ok(Ok(_))) => Err(FallbackReason::NoContext),
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "retrieval failed");
                Err(FallbackReason::Error)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "retrieval task panicked");
                Err(FallbackReason::Error)
            }
            Err(_) => {
                cancelled.store(true, Ordering::Relaxed);
                handle.abort();
                let err = PipelineError::RetrievalTimeout {
                    elapsed: started.elapsed(),
                };
                warn!(error = %err, "falling back");
                Err(FallbackReason::Timeout)
            }
        }
    }

    fn finish(&self, result: AnswerResult) -> AnswerResult {
        self.stats.record(&result);
        info!(
            tier = %result.tier,
            elapsed_ms = result.elapsed_ms,
            jurisdiction = %result.jurisdiction,
            contexts = result.contexts_used,
            "answered"
        );
        result
    }
}

/// Builder for the one result of an `answer` call.
struct Outcome<'a> {
    started: Instant,
    jurisdiction: &'a str,
}

impl<'a> Outcome<'a> {
    fn new(started: Instant, jurisdiction: &'a str) -> Self {
        Self {
            started,
            jurisdiction,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn answered(
        &self,
        tier: Tier,
        text: String,
        contexts_used: usize,
        synthesis: Option<SynthesisKind>,
    ) -> AnswerResult {
        AnswerResult {
            text,
            tier,
            elapsed_ms: self.elapsed_ms(),
            jurisdiction: self.jurisdiction.to_string(),
            contexts_used,
            fallback_reason: None,
            synthesis,
        }
    }

    fn fallback(&self, text: String, reason: FallbackReason) -> AnswerResult {
        AnswerResult {
            fallback_reason: Some(reason),
            ..self.answered(Tier::Fallback, text, 0, None)
        }
    }

    fn error(&self, text: &str) -> AnswerResult {
        self.answered(Tier::Error, text.to_string(), 0, None)
    }
}

// ============ Stats ============

#[derive(Default)]
struct PipelineStats {
    requests: AtomicU64,
    cache: AtomicU64,
    quick: AtomicU64,
    retrieval: AtomicU64,
    fallback: AtomicU64,
    error: AtomicU64,
    timeouts: AtomicU64,
    total_elapsed_ms: AtomicU64,
}

/// Point-in-time pipeline counters.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub cache: u64,
    pub quick: u64,
    pub retrieval: u64,
    pub fallback: u64,
    pub error: u64,
    pub timeouts: u64,
    pub avg_elapsed_ms: f64,
}

impl PipelineStats {
    fn record(&self, result: &AnswerResult) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_elapsed_ms
            .fetch_add(result.elapsed_ms, Ordering::Relaxed);
        let counter = match result.tier {
            Tier::Cache => &self.cache,
            Tier::Quick => &self.quick,
            Tier::Retrieval => &self.retrieval,
            Tier::Fallback => &self.fallback,
            Tier::Error => &self.error,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let total = self.total_elapsed_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            requests,
            cache: self.cache.load(Ordering::Relaxed),
            quick: self.quick.load(Ordering::Relaxed),
            retrieval: self.retrieval.load(Ordering::Relaxed),
            fallback: self.fallback.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            avg_elapsed_ms: if requests == 0 {
                0.0
            } else {
                total as f64 / requests as f64
            },
        }
    }
}

// ============ CLI ============

pub async fn run_ask(
    config: &Config,
    question: &str,
    jurisdiction: Option<String>,
    profile: Profile,
) -> Result<()> {
    let pipeline = AnswerPipeline::from_config(config).await?;
    let result = pipeline
        .answer(question, jurisdiction.as_deref(), profile)
        .await;

    println!("{}", result.text);
    println!();
    print!(
        "[{} | {} | {}ms | {} contexts",
        result.tier, result.jurisdiction, result.elapsed_ms, result.contexts_used
    );
    if let Some(reason) = result.fallback_reason {
        print!(" | reason: {}", reason.as_str());
    }
    println!("]");

    pipeline.cache().close().await;
    Ok(())
}
