//! # corpus-chat
//!
//! Conversational question answering over an indexed document corpus.
//! A question is answered by retrieving passages with one of several
//! pluggable strategies, filling a prompt template with them and streaming
//! the language model's answer back while stripping private reasoning.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌────────────────────┐
//!                    │  ChatRequest       │
//!                    │  (session, query)  │
//!                    └─────────┬──────────┘
//!                              │
//!                              ▼
//!                    ┌────────────────────┐
//!                    │  Session registry  │  strategy fixed per session
//!                    └─────────┬──────────┘
//!                              │
//!                              ▼
//!   ┌──────────────────────────────────────────────────────────┐
//!   │                   Strategy dispatch                      │
//!   │ similarity │ compression │ parent-document │ multiquery  │
//!   │ hybrid-fusion (dense + BM25) │ self-query (LM filter)    │
//!   └──────────────────────────┬───────────────────────────────┘
//!                              │ ≤ k passages
//!                              ▼
//!                    ┌────────────────────┐
//!                    │  Prompt template   │  {context} {question}
//!                    │  + memory window   │
//!                    └─────────┬──────────┘
//!                              │
//!                              ▼
//!                    ┌────────────────────┐
//!                    │  LM token stream   │
//!                    │  <think> filter    │
//!                    └─────────┬──────────┘
//!                              │ ChatEvent::Chunk / Error
//!                              ▼
//!                    ┌────────────────────┐
//!                    │  commit to memory  │  only on full completion
//!                    └────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for backends, retries and retrieval
//! - [`error`] - `RagError`, the error surface of the pipeline
//! - [`models`] - Shared data types: `Passage`, `MetadataFilter`, `Turn`, `ChatEvent`
//! - [`chunking`] - Recursive character splitter
//! - [`search::vector`] - In-memory vector store with cosine similarity and disk persistence
//! - [`search::bm25`] - Lazily built in-RAM BM25 index powered by tantivy
//! - [`search::hybrid`] - Weighted dense/lexical fusion and Reciprocal Rank Fusion
//! - [`search::mmr`] - Maximal Marginal Relevance selection
//! - [`search::parent`] - Parent-document side table and child-chunk ingestion
//! - [`llm::retry`] - Bounded retry for backend initialization
//! - [`llm::backend`] - Streaming chat via Ollama or OpenAI-compatible APIs
//! - [`llm::embeddings`] - Batch embeddings via HTTP, or a local hashing embedder
//! - [`llm::query_expand`] - LM query reformulation
//! - [`llm::self_query`] - LM-built metadata filters
//! - [`llm::reasoning`] - `<think>` segment stripping
//! - [`retrieval`] - The retrieval strategies and their dispatcher
//! - [`chat`] - Conversation orchestration and prompt assembly
//! - [`state`] - Shared application state and the session registry

pub mod chat;
pub mod chunking;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod retrieval;
pub mod search;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;
