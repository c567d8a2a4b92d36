use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ============ Corpus ============

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    /// Load every jurisdiction at startup instead of on first reference.
    #[serde(default = "default_true")]
    pub preload: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            dir: default_corpus_dir(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            min_chunk_chars: default_min_chunk_chars(),
            max_chunk_chars: default_max_chunk_chars(),
            preload: true,
        }
    }
}

fn default_corpus_dir() -> PathBuf {
    PathBuf::from("./state_rules")
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
        "**/*.pdf".to_string(),
    ]
}
fn default_min_chunk_chars() -> usize {
    50
}
fn default_max_chunk_chars() -> usize {
    600
}
fn default_true() -> bool {
    true
}

// ============ Retrieval ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default)]
    pub weights: ScoringWeights,
    #[serde(default = "default_exact_phrases")]
    pub exact_phrases: Vec<String>,
    #[serde(default = "default_domain_terms")]
    pub domain_terms: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            fuzzy_threshold: default_fuzzy_threshold(),
            weights: ScoringWeights::default(),
            exact_phrases: default_exact_phrases(),
            domain_terms: default_domain_terms(),
        }
    }
}

/// Relevance weights. Exact values are tunable; their ordering is validated.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ScoringWeights {
    #[serde(default = "default_w_exact")]
    pub exact_phrase: f64,
    #[serde(default = "default_w_keyword")]
    pub keyword: f64,
    #[serde(default = "default_w_numeric")]
    pub numeric: f64,
    #[serde(default = "default_w_domain")]
    pub domain_term: f64,
    #[serde(default = "default_w_fuzzy")]
    pub fuzzy: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            exact_phrase: default_w_exact(),
            keyword: default_w_keyword(),
            numeric: default_w_numeric(),
            domain_term: default_w_domain(),
            fuzzy: default_w_fuzzy(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_score() -> f64 {
    5.0
}
fn default_fuzzy_threshold() -> f64 {
    70.0
}
fn default_w_exact() -> f64 {
    20.0
}
fn default_w_keyword() -> f64 {
    3.0
}
fn default_w_numeric() -> f64 {
    5.0
}
fn default_w_domain() -> f64 {
    2.0
}
fn default_w_fuzzy() -> f64 {
    10.0
}

fn default_exact_phrases() -> Vec<String> {
    [
        "speed limit",
        "fire hydrant",
        "school zone",
        "right on red",
        "learner permit",
        "parking distance",
        "mph",
        "feet",
        "school bus",
        "passing bus",
        "stop sign",
        "yield",
        "turn signal",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_domain_terms() -> Vec<String> {
    [
        "speed",
        "limit",
        "zone",
        "park",
        "distance",
        "turn",
        "permit",
        "license",
        "bus",
        "stop",
        "children",
        "passing",
        "lane",
        "road",
        "intersection",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// ============ Synthesis ============

#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    #[serde(default = "default_max_prompt_contexts")]
    pub max_prompt_contexts: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_max_answer_words")]
    pub max_answer_words: usize,
    #[serde(default = "default_target_answer_words")]
    pub target_answer_words: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_prompt_contexts: default_max_prompt_contexts(),
            max_context_chars: default_max_context_chars(),
            max_answer_words: default_max_answer_words(),
            target_answer_words: default_target_answer_words(),
        }
    }
}

fn default_max_prompt_contexts() -> usize {
    2
}
fn default_max_context_chars() -> usize {
    600
}
fn default_max_answer_words() -> usize {
    200
}
fn default_target_answer_words() -> usize {
    150
}

// ============ Generator ============

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL. Defaults to `http://localhost:11434` for Ollama and
    /// `https://api.openai.com` for OpenAI.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            num_ctx: default_num_ctx(),
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
        }
    }
}

impl GeneratorConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_top_p() -> f32 {
    0.9
}
fn default_max_tokens() -> u32 {
    200
}
fn default_num_ctx() -> u32 {
    2048
}
fn default_timeout_secs() -> u64 {
    30
}

// ============ Cache ============

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// SQLite file backing the cache. `None` keeps the cache in memory only.
    #[serde(default = "default_cache_path")]
    pub path: Option<PathBuf>,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Entries older than this are treated as misses and dropped.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cache_path(),
            max_entries: default_max_entries(),
            ttl_secs: None,
        }
    }
}

fn default_cache_path() -> Option<PathBuf> {
    Some(PathBuf::from("./data/answer_cache.sqlite"))
}
fn default_max_entries() -> usize {
    5000
}

// ============ Pipeline ============

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_jurisdiction")]
    pub default_jurisdiction: String,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default = "ProfileConfig::quick")]
    pub quick: ProfileConfig,
    #[serde(default = "ProfileConfig::full")]
    pub full: ProfileConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_jurisdiction: default_jurisdiction(),
            max_message_chars: default_max_message_chars(),
            quick: ProfileConfig::quick(),
            full: ProfileConfig::full(),
        }
    }
}

impl PipelineConfig {
    pub fn profile(&self, profile: Profile) -> &ProfileConfig {
        match profile {
            Profile::Quick => &self.quick,
            Profile::Full => &self.full,
        }
    }
}

fn default_jurisdiction() -> String {
    "washington".to_string()
}
fn default_max_message_chars() -> usize {
    1000
}

/// Deployment profile: how long retrieval may run and whether the instant
/// keyword table is consulted before it.
#[derive(Debug, Deserialize, Clone)]
pub struct ProfileConfig {
    pub timeout_ms: u64,
    pub quick_answers: bool,
    /// Overrides `retrieval.top_k` for this profile.
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl ProfileConfig {
    pub fn quick() -> Self {
        Self {
            timeout_ms: 12_000,
            quick_answers: true,
            top_k: Some(2),
        }
    }

    pub fn full() -> Self {
        Self {
            timeout_ms: 60_000,
            quick_answers: false,
            top_k: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Quick,
    Full,
}

impl Profile {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "quick" => Ok(Profile::Quick),
            "full" => Ok(Profile::Full),
            other => bail!("Unknown profile: {}. Use quick or full.", other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Quick => "quick",
            Profile::Full => "full",
        }
    }
}

// ============ Fallback ============

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FallbackConfig {
    /// Extra instant answers, checked before the built-in table.
    #[serde(default)]
    pub quick: Vec<QuickPatternConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuickPatternConfig {
    pub pattern: String,
    pub answer: String,
}

// ============ Server ============

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

// ============ Loading ============

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        // Corpus
        if self.corpus.min_chunk_chars == 0 {
            bail!("corpus.min_chunk_chars must be > 0");
        }
        if self.corpus.max_chunk_chars < self.corpus.min_chunk_chars {
            bail!("corpus.max_chunk_chars must be >= corpus.min_chunk_chars");
        }

        // Retrieval
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }
        if !(0.0..=100.0).contains(&self.retrieval.fuzzy_threshold) {
            bail!("retrieval.fuzzy_threshold must be in [0, 100]");
        }
        let w = &self.retrieval.weights;
        if [w.exact_phrase, w.keyword, w.numeric, w.domain_term, w.fuzzy]
            .iter()
            .any(|v| *v < 0.0)
        {
            bail!("retrieval.weights must be non-negative");
        }
        if w.exact_phrase < w.keyword || w.exact_phrase < w.fuzzy {
            bail!("retrieval.weights.exact_phrase must be >= keyword and fuzzy weights");
        }
        if w.fuzzy < w.numeric || w.fuzzy < w.domain_term {
            bail!("retrieval.weights.fuzzy must be >= numeric and domain_term weights");
        }

        // Synthesis
        if self.synthesis.max_prompt_contexts == 0 {
            bail!("synthesis.max_prompt_contexts must be >= 1");
        }
        if self.synthesis.target_answer_words > self.synthesis.max_answer_words {
            bail!("synthesis.target_answer_words must be <= synthesis.max_answer_words");
        }

        // Generator
        match self.generator.provider.as_str() {
            "disabled" | "ollama" | "openai" => {}
            other => bail!(
                "Unknown generator provider: '{}'. Must be disabled, ollama, or openai.",
                other
            ),
        }
        if self.generator.is_enabled() && self.generator.model.is_none() {
            bail!(
                "generator.model must be specified when provider is '{}'",
                self.generator.provider
            );
        }

        // Pipeline
        if self.pipeline.max_message_chars == 0 {
            bail!("pipeline.max_message_chars must be > 0");
        }
        for (name, p) in [("quick", &self.pipeline.quick), ("full", &self.pipeline.full)] {
            if p.timeout_ms == 0 {
                bail!("pipeline.{}.timeout_ms must be > 0", name);
            }
            if p.top_k == Some(0) {
                bail!("pipeline.{}.top_k must be >= 1", name);
            }
        }

        // Cache
        if self.cache.max_entries == 0 {
            bail!("cache.max_entries must be >= 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.pipeline.default_jurisdiction, "washington");
        assert_eq!(config.pipeline.full.timeout_ms, 60_000);
        assert!(config.pipeline.quick.quick_answers);
        assert!(!config.pipeline.full.quick_answers);
        assert_eq!(config.retrieval.weights.exact_phrase, 20.0);
        assert!(!config.generator.is_enabled());
    }

    #[test]
    fn test_shipped_config_parses() {
        let config: Config = toml::from_str(include_str!("../config/drivesmart.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.pipeline.quick.top_k, Some(2));
        assert_eq!(config.cache.max_entries, 5000);
    }

    #[test]
    fn test_partial_profile_override() {
        let config: Config = toml::from_str(
            r#"
            [pipeline.quick]
            timeout_ms = 500
            quick_answers = false
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.quick.timeout(), Duration::from_millis(500));
        assert!(!config.pipeline.quick.quick_answers);
        assert_eq!(config.pipeline.full.timeout_ms, 60_000);
    }

    #[test]
    fn test_rejects_inverted_weight_ordering() {
        let mut config = Config::default();
        config.retrieval.weights.keyword = 50.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exact_phrase"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let mut config = Config::default();
        config.generator.provider = "bard".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_provider_requires_model() {
        let mut config = Config::default();
        config.generator.provider = "ollama".to_string();
        assert!(config.validate().is_err());
        config.generator.model = Some("mistral:latest".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(Profile::parse("quick").unwrap(), Profile::Quick);
        assert_eq!(Profile::parse("full").unwrap(), Profile::Full);
        assert!(Profile::parse("turbo").is_err());
    }
}
