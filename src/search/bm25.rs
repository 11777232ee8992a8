use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy};

use crate::error::{RagError, RagResult};
use crate::models::{Passage, ScoredPassage};
use crate::search::vector::DocumentIndex;

/// BM25 ranker over an in-RAM tantivy index built from a corpus snapshot.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    f_id: Field,
    f_text: Field,
    passages: HashMap<String, Passage>,
}

impl LexicalIndex {
    pub fn build(passages: Vec<Passage>) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let f_id = schema_builder.add_text_field("id", STRING | STORED);
        let f_text = schema_builder.add_text_field("text", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, 50_000_000)
            .context("Failed to create index writer")?;

        for p in &passages {
            writer.add_document(doc!(
                f_id => p.id.clone(),
                f_text => p.text.clone(),
            ))?;
        }
        writer.commit().context("Failed to commit lexical index")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create reader")?;

        let passages = passages.into_iter().map(|p| (p.id.clone(), p)).collect();

        Ok(Self {
            index,
            reader,
            f_id,
            f_text,
            passages,
        })
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Top-`k` passages by BM25 score. Scores are raw and unbounded.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>> {
        let cleaned = lexical_terms(query).join(" ");
        if cleaned.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.f_text]);
        let query = query_parser
            .parse_query(&cleaned)
            .context("Failed to parse lexical query")?;

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(k))
            .context("Lexical search failed")?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve document")?;
            let Some(id) = doc.get_first(self.f_id).and_then(|v| v.as_str()) else {
                continue;
            };
            if let Some(p) = self.passages.get(id) {
                hits.push(ScoredPassage::new(p.clone(), score));
            }
        }

        Ok(hits)
    }
}

/// Lowercased alphanumeric terms. Lowercasing also keeps words like "AND"
/// from being read as query operators.
fn lexical_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// Lazily built lexical index snapshot.
///
/// The snapshot is taken on first use and is NOT refreshed when the corpus
/// changes; callers that need freshness call [`LexicalCache::rebuild`] or
/// [`LexicalCache::invalidate`]. Concurrent first callers wait on a single build.
#[derive(Default)]
pub struct LexicalCache {
    slot: tokio::sync::Mutex<Option<Arc<LexicalIndex>>>,
}

impl LexicalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_build(&self, index: &dyn DocumentIndex) -> RagResult<Arc<LexicalIndex>> {
        let mut slot = self.slot.lock().await;
        if let Some(built) = slot.as_ref() {
            return Ok(built.clone());
        }

        let snapshot = index
            .export_all()
            .map_err(|e| RagError::Index(format!("{e:#}")))?;
        if snapshot.is_empty() {
            return Err(RagError::empty_corpus());
        }

        let count = snapshot.len();
        let built = tokio::task::spawn_blocking(move || LexicalIndex::build(snapshot))
            .await
            .map_err(|e| RagError::Index(format!("lexical index build panicked: {e}")))?
            .map_err(|e| RagError::Index(format!("{e:#}")))?;

        tracing::info!("Built lexical index snapshot over {count} passages");
        let built = Arc::new(built);
        *slot = Some(built.clone());
        Ok(built)
    }

    /// Drop the snapshot; the next hybrid call rebuilds it.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }

    pub async fn rebuild(&self, index: &dyn DocumentIndex) -> RagResult<Arc<LexicalIndex>> {
        self.invalidate().await;
        self.get_or_build(index).await
    }

    pub async fn is_built(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::vector::VectorStore;

    fn corpus() -> Vec<Passage> {
        vec![
            Passage::new("hours", "The ticket office opening hours are 7:00 to 19:00 on weekdays."),
            Passage::new("fares", "A single fare costs 1.50 euro; a daily pass costs 6 euro."),
            Passage::new("map", "The route map shows every bus line and night service."),
        ]
    }

    #[test]
    fn test_search_ranks_matching_passage_first() {
        let li = LexicalIndex::build(corpus()).unwrap();
        let hits = li.search("What are the opening hours?", 3).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].id(), "hours");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_search_handles_operator_like_words() {
        let li = LexicalIndex::build(corpus()).unwrap();
        let hits = li.search("fare AND (pass) OR \"map\"", 3).unwrap();
        assert!(hits.iter().any(|h| h.id() == "fares"));
    }

    #[test]
    fn test_search_blank_query() {
        let li = LexicalIndex::build(corpus()).unwrap();
        assert!(li.search("?!", 3).unwrap().is_empty());
        assert!(li.search("fares", 0).unwrap().is_empty());
    }

    #[test]
    fn test_lexical_terms() {
        assert_eq!(lexical_terms("Opening-hours, TODAY?"), vec!["opening", "hours", "today"]);
    }

    #[tokio::test]
    async fn test_cache_refuses_empty_corpus() {
        let cache = LexicalCache::new();
        let store = VectorStore::in_memory();
        let err = cache.get_or_build(&store).await.err().unwrap();
        assert!(err.is_empty_corpus());
        assert!(!cache.is_built().await);
    }

    #[tokio::test]
    async fn test_cache_is_not_refreshed_until_rebuild() {
        let cache = LexicalCache::new();
        let store = VectorStore::in_memory();
        store.add_passages(corpus()).unwrap();

        let first = cache.get_or_build(&store).await.unwrap();
        assert_eq!(first.len(), 3);

        store
            .add_passages(vec![Passage::new("lost", "Lost property office")])
            .unwrap();
        let stale = cache.get_or_build(&store).await.unwrap();
        assert_eq!(stale.len(), 3);
        assert!(Arc::ptr_eq(&first, &stale));

        let fresh = cache.rebuild(&store).await.unwrap();
        assert_eq!(fresh.len(), 4);
    }
}
