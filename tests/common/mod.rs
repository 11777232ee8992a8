//! Shared doubles for the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use corpus_chat::llm::backend::{LanguageModel, TokenStream};
use corpus_chat::llm::embeddings::{Embedder, HashingEmbedder};
use corpus_chat::models::{Passage, Turn};
use corpus_chat::search::vector::VectorStore;

pub const DIM: usize = 256;

/// Language model replaying canned output and recording what it was asked.
#[derive(Default)]
pub struct FakeModel {
    completions: Mutex<VecDeque<String>>,
    chunks: Vec<String>,
    pub prompts: Mutex<Vec<String>>,
    pub memory_sizes: Mutex<Vec<usize>>,
    calls: AtomicUsize,
}

impl FakeModel {
    pub fn answering(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_completion(self, text: &str) -> Self {
        self.completions.lock().push_back(text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn generate_stream(&self, prompt: &str, memory: &[Turn]) -> Result<TokenStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        self.memory_sizes.lock().push(memory.len());
        let items: Vec<Result<String>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(stream::iter(items)))
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        self.completions
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no canned completion"))
    }
}

pub fn embedder() -> Arc<HashingEmbedder> {
    Arc::new(HashingEmbedder::new(DIM))
}

pub async fn indexed(passages: Vec<Passage>) -> Arc<VectorStore> {
    let embedder = embedder();
    let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
    let vectors = embedder.embed_batch(&texts).await.unwrap();
    let store = VectorStore::in_memory();
    store
        .add_passages(
            passages
                .into_iter()
                .zip(vectors)
                .map(|(p, v)| p.with_vector(v))
                .collect(),
        )
        .unwrap();
    Arc::new(store)
}

/// Opening hours, fares and route map of a local transit agency.
pub fn transit_corpus() -> Vec<Passage> {
    vec![
        Passage::new(
            "office-hours",
            "The ticket office opening hours are 7:00 to 19:00, Monday to Saturday.",
        )
        .with_metadata("source", "https://transit.example/office")
        .with_metadata("type", "info"),
        Passage::new(
            "fares",
            "A single bus fare costs 1.50 euro; a daily pass costs 6 euro.",
        )
        .with_metadata("source", "https://transit.example/fares")
        .with_metadata("type", "price"),
        Passage::new(
            "route-map",
            "The route map shows every bus line and stop in the city network.",
        )
        .with_metadata("source", "https://transit.example/map")
        .with_metadata("type", "info"),
    ]
}
