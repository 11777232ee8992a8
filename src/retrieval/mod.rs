//! Pluggable retrieval strategies.
//!
//! Every strategy maps `(query, StrategyConfig)` to a relevance-ordered
//! [`RetrievalResult`] of at most `result_count_k` passages, using the shared
//! handles in [`RetrievalContext`]. [`dispatch`] selects one by id.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::StrategyConfig;
use crate::error::{RagError, RagResult};
use crate::llm::backend::LanguageModel;
use crate::llm::embeddings::Embedder;
use crate::llm::self_query::{default_attributes, AttributeInfo};
use crate::models::{MetadataFilter, RetrievalResult};
use crate::search::bm25::LexicalCache;
use crate::search::parent::ParentStore;
use crate::search::vector::DocumentIndex;

pub mod compression;
pub mod dispatch;
pub mod hybrid;
pub mod multi_query;
pub mod parent_document;
pub mod self_query;
pub mod similarity;

pub use dispatch::{dispatch, StrategyKind};

/// Shared handles every strategy may use.
#[derive(Clone)]
pub struct RetrievalContext {
    pub index: Arc<dyn DocumentIndex>,
    pub embedder: Arc<dyn Embedder>,
    /// Used by strategies that call the language model during retrieval.
    pub model: Arc<dyn LanguageModel>,
    pub lexical: Arc<LexicalCache>,
    pub parents: Arc<ParentStore>,
    /// Metadata fields the self-query strategy may filter on.
    pub attributes: Vec<AttributeInfo>,
}

impl RetrievalContext {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            index,
            embedder,
            model,
            lexical: Arc::new(LexicalCache::new()),
            parents: Arc::new(ParentStore::in_memory()),
            attributes: default_attributes(),
        }
    }

    pub fn with_parents(mut self, parents: Arc<ParentStore>) -> Self {
        self.parents = parents;
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<AttributeInfo>) -> Self {
        self.attributes = attributes;
        self
    }

    pub(crate) async fn embed_query(&self, query: &str) -> RagResult<Vec<f32>> {
        self.embedder
            .embed(query)
            .await
            .map_err(|e| RagError::retrieval(format!("embedding failed: {e:#}")))
    }

    /// Embed `query` and run a cosine search, optionally filtered.
    pub(crate) async fn dense_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<RetrievalResult> {
        let vector = self.embed_query(query).await?;
        self.search_vector(&vector, k, filter)
    }

    pub(crate) fn search_vector(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<RetrievalResult> {
        let hits = match filter {
            Some(filter) => self.index.filtered_query(vector, k, filter),
            None => self.index.query_similar(vector, k, None),
        };
        hits.map_err(|e| RagError::Index(format!("{e:#}")))
    }
}

#[async_trait]
pub trait RetrievalAlgorithm: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn retrieve(
        &self,
        ctx: &RetrievalContext,
        query: &str,
        config: &StrategyConfig,
    ) -> RagResult<RetrievalResult>;
}
