use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RagError, RagResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the persisted document index lives
    pub data_dir: PathBuf,
    /// Chat backend configuration
    pub llm: LlmConfig,
    /// Embedding backend configuration
    pub embedding: EmbeddingConfig,
    /// Bounded retry used while backends warm up
    pub retry: RetryConfig,
    /// Retrieval parameters applied to new sessions
    pub strategy: StrategyConfig,
    /// Rewrite answers so they embed the retrieved source links
    pub refine_sources: bool,
}

/// Backend wire protocol, matched by exact case-normalised name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenAi,
    /// Offline hashing embedder; embeddings only.
    Hashing,
}

impl Provider {
    pub fn parse(name: &str) -> RagResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "openai" => Ok(Provider::OpenAi),
            "hashing" => Ok(Provider::Hashing),
            other => Err(RagError::Configuration(format!(
                "unsupported provider '{other}' (expected ollama, openai or hashing)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for chat, reformulation and filter construction
    pub chat_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3:8b".to_string(),
            api_key: None,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "ollama", "openai" or "hashing"
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Embedding vector dimension
    pub dim: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
            dim: 768,
        }
    }
}

/// Fixed-interval retry budget for backend initialization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            interval_secs: 5,
        }
    }
}

impl RetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Retrieval parameters, fixed when a conversation is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy_id: String,
    pub result_count_k: usize,
    /// Weight of the dense score in hybrid fusion; `1 - alpha` goes to the lexical score.
    pub fusion_weight_alpha: f32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// When set, similarity search re-ranks with maximal marginal relevance.
    pub mmr_lambda: Option<f32>,
    /// Length of the lexical candidate list in hybrid fusion.
    pub sparse_k: usize,
    /// Number of reformulations requested by multi-query retrieval.
    pub query_count: usize,
    /// Also search with the unmodified query in multi-query retrieval.
    pub include_original: bool,
    /// Candidate pool multiplier for MMR and parent expansion.
    pub fetch_multiplier: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            strategy_id: "similarity".to_string(),
            result_count_k: 10,
            fusion_weight_alpha: 0.5,
            chunk_size: 750,
            chunk_overlap: 80,
            mmr_lambda: None,
            sparse_k: 20,
            query_count: 3,
            include_original: true,
            fetch_multiplier: 4,
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> RagResult<()> {
        if self.result_count_k == 0 {
            return Err(RagError::Configuration(
                "result_count_k must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fusion_weight_alpha) {
            return Err(RagError::Configuration(format!(
                "fusion_weight_alpha must be in [0, 1], got {}",
                self.fusion_weight_alpha
            )));
        }
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if let Some(lambda) = self.mmr_lambda {
            if !(0.0..=1.0).contains(&lambda) {
                return Err(RagError::Configuration(format!(
                    "mmr_lambda must be in [0, 1], got {lambda}"
                )));
            }
        }
        if self.sparse_k == 0 {
            return Err(RagError::Configuration(
                "sparse_k must be greater than 0".to_string(),
            ));
        }
        if self.query_count == 0 {
            return Err(RagError::Configuration(
                "query_count must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = strategy_id.into();
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.result_count_k = k;
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.fusion_weight_alpha = alpha;
        self
    }

    /// Candidate pool size for strategies that over-fetch before narrowing to `k`.
    pub fn fetch_k(&self) -> usize {
        self.result_count_k * self.fetch_multiplier.max(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            retry: RetryConfig::default(),
            strategy: StrategyConfig::default(),
            refine_sources: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("CORPUS_CHAT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        // Chat backend
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key.clone());
            config.embedding.api_key = Some(key);
        }
        if let Ok(val) = std::env::var("LLM_TEMPERATURE") {
            if let Ok(v) = val.parse() {
                config.llm.temperature = v;
            }
        }

        // Embedding backend
        if let Ok(provider) = std::env::var("EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }
        if let Ok(url) = std::env::var("EMBEDDING_BASE_URL") {
            config.embedding.base_url = url;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(dim) = std::env::var("EMBEDDING_DIM") {
            if let Ok(d) = dim.parse() {
                config.embedding.dim = d;
            }
        }

        // Initialization retry
        if let Ok(val) = std::env::var("BACKEND_INIT_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.retry.timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("BACKEND_INIT_INTERVAL_SECS") {
            if let Ok(v) = val.parse::<u64>() {
                config.retry.interval_secs = v.max(1);
            }
        }

        // Retrieval
        if let Ok(id) = std::env::var("RAG_STRATEGY") {
            config.strategy.strategy_id = id;
        }
        if let Ok(val) = std::env::var("RAG_TOP_K") {
            if let Ok(v) = val.parse() {
                config.strategy.result_count_k = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_SPARSE_K") {
            if let Ok(v) = val.parse() {
                config.strategy.sparse_k = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_FUSION_ALPHA") {
            if let Ok(v) = val.parse() {
                config.strategy.fusion_weight_alpha = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_CHUNK_SIZE") {
            if let Ok(v) = val.parse() {
                config.strategy.chunk_size = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_CHUNK_OVERLAP") {
            if let Ok(v) = val.parse() {
                config.strategy.chunk_overlap = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_MMR_LAMBDA") {
            if let Ok(v) = val.parse() {
                config.strategy.mmr_lambda = Some(v);
            }
        }
        if let Ok(val) = std::env::var("RAG_QUERY_COUNT") {
            if let Ok(v) = val.parse() {
                config.strategy.query_count = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_REFINE_SOURCES") {
            config.refine_sources = matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }

        config
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn parents_path(&self) -> PathBuf {
        self.data_dir.join("parents.json")
    }
}
