//! Language-model and embedding backends plus the LM-driven query helpers.

pub mod backend;
pub mod embeddings;
pub mod query_expand;
pub mod reasoning;
pub mod retry;
pub mod self_query;
