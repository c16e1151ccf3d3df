//! TOML configuration.
//!
//! Every section except `[db]` is optional; omitted fields take the
//! defaults below. [`load_config`] reads and validates a file,
//! [`parse_config`] does the same for an in-memory string.
//!
//! ```toml
//! [db]
//! path = "./data/rh.sqlite"
//!
//! [embedding]
//! provider = "openai"            # disabled | openai | ollama
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "openai"            # disabled | openai | ollama
//! model = "gpt-4o-mini"          # classification, routing, decomposition, rerank, gap
//! synthesis_model = "gpt-4o"     # research report synthesis
//!
//! [retrieval]
//! semantic_weight = 0.7
//! lexical_weight = 0.3
//! rrf_k = 60.0
//!
//! [research]
//! max_sub_queries = 4
//!
//! [gap]
//! threshold = 0.85
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```
//!
//! API keys are read from the environment (`OPENAI_API_KEY`), never from
//! this file.

use anyhow::{bail, Context, Result};
use research_harness_core::search::HybridParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Upper bound on decomposition fan-out.
pub const MAX_SUB_QUERIES: usize = 4;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub gap: GapConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// A config with every section at its default and the index at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            retrieval: RetrievalConfig::default(),
            research: ResearchConfig::default(),
            rerank: RerankConfig::default(),
            gap: GapConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for Ollama (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

// ============ Generation ============

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Fast tier.
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Stronger tier used for report synthesis.
    #[serde(default = "default_synthesis_model")]
    pub synthesis_model: String,
    /// Base URL for Ollama (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_generation_model(),
            synthesis_model: default_synthesis_model(),
            url: None,
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_synthesis_model() -> String {
    "gpt-4o".to_string()
}
fn default_generation_retries() -> u32 {
    2
}
fn default_generation_timeout() -> u64 {
    60
}

// ============ Retrieval ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Primary-pool limit on the simple path.
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
    /// Limit of every secondary-pool supplement.
    #[serde(default = "default_secondary_limit")]
    pub secondary_limit: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            overfetch: default_overfetch(),
            semantic_weight: default_semantic_weight(),
            lexical_weight: default_lexical_weight(),
            rrf_k: default_rrf_k(),
            result_limit: default_result_limit(),
            secondary_limit: default_secondary_limit(),
            preview_chars: default_preview_chars(),
        }
    }
}

impl RetrievalConfig {
    pub fn hybrid_params(&self) -> HybridParams {
        HybridParams {
            overfetch: self.overfetch,
            semantic_weight: self.semantic_weight,
            lexical_weight: self.lexical_weight,
            rrf_k: self.rrf_k,
        }
    }
}

fn default_overfetch() -> usize {
    20
}
fn default_semantic_weight() -> f64 {
    0.7
}
fn default_lexical_weight() -> f64 {
    0.3
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_result_limit() -> usize {
    5
}
fn default_secondary_limit() -> usize {
    5
}
fn default_preview_chars() -> usize {
    500
}

// ============ Research ============

#[derive(Debug, Deserialize, Clone)]
pub struct ResearchConfig {
    #[serde(default = "default_max_sub_queries")]
    pub max_sub_queries: usize,
    /// Per-sub-query search limit.
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,
    /// Candidates handed to synthesis.
    #[serde(default = "default_max_context_items")]
    pub max_context_items: usize,
    /// Caller-facing result list length.
    #[serde(default = "default_display_results")]
    pub display_results: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_sub_queries: default_max_sub_queries(),
            results_per_query: default_results_per_query(),
            max_context_items: default_max_context_items(),
            display_results: default_display_results(),
        }
    }
}

fn default_max_sub_queries() -> usize {
    MAX_SUB_QUERIES
}
fn default_results_per_query() -> usize {
    5
}
fn default_max_context_items() -> usize {
    15
}
fn default_display_results() -> usize {
    10
}

// ============ Rerank / Gap / Server ============

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            candidate_count: default_candidate_count(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_candidate_count() -> usize {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct GapConfig {
    #[serde(default = "default_gap_threshold")]
    pub threshold: f64,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            threshold: default_gap_threshold(),
        }
    }
}

fn default_gap_threshold() -> f64 {
    0.85
}

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
    "127.0.0.1:7341".to_string()
}

// ============ Loading ============

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Retrieval
    let r = &config.retrieval;
    if r.semantic_weight < 0.0 || r.lexical_weight < 0.0 {
        bail!("retrieval weights must be >= 0");
    }
    if r.semantic_weight == 0.0 && r.lexical_weight == 0.0 {
        bail!("retrieval.semantic_weight and retrieval.lexical_weight must not both be 0");
    }
    if r.rrf_k <= 0.0 {
        bail!("retrieval.rrf_k must be > 0");
    }
    if r.overfetch < 1 {
        bail!("retrieval.overfetch must be >= 1");
    }
    if r.result_limit < 1 || r.secondary_limit < 1 {
        bail!("retrieval.result_limit and retrieval.secondary_limit must be >= 1");
    }

    // Research
    let rs = &config.research;
    if !(1..=MAX_SUB_QUERIES).contains(&rs.max_sub_queries) {
        bail!("research.max_sub_queries must be in 1..={}", MAX_SUB_QUERIES);
    }
    if rs.results_per_query < 1 || rs.max_context_items < 1 || rs.display_results < 1 {
        bail!("research limits must be >= 1");
    }

    if config.rerank.candidate_count < 1 {
        bail!("rerank.candidate_count must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.gap.threshold) {
        bail!("gap.threshold must be in [0.0, 1.0]");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    // Generation
    match config.generation.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.generation.is_enabled()
        && (config.generation.model.trim().is_empty()
            || config.generation.synthesis_model.trim().is_empty())
    {
        bail!(
            "generation.model and generation.synthesis_model must be set when provider is '{}'",
            config.generation.provider
        );
    }

    Ok(())
}
