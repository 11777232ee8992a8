use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};

use crate::models::{MetadataFilter, Passage, ScoredPassage};

/// Read side of the passage store, as seen by retrieval.
pub trait DocumentIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top-`k` passages by cosine similarity, optionally restricted by `filter`.
    fn query_similar(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredPassage>>;

    /// Similarity search inside the subset matching `filter`.
    fn filtered_query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredPassage>> {
        self.query_similar(vector, k, Some(filter))
    }

    /// Snapshot of every stored passage, in insertion order.
    fn export_all(&self) -> Result<Vec<Passage>>;
}

/// In-memory vector store with optional disk persistence and exact cosine search.
pub struct VectorStore {
    entries: RwLock<Vec<Passage>>,
    persist_path: Option<PathBuf>,
}

impl VectorStore {
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            persist_path: None,
        }
    }

    pub fn open_or_create(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;
        let persist_path = index_dir.join("passages.json");

        let entries = if persist_path.exists() {
            let data = std::fs::read_to_string(&persist_path)
                .context("Failed to read passage store")?;
            serde_json::from_str(&data).context("Failed to parse passage store")?
        } else {
            Vec::new()
        };

        Ok(Self {
            entries: RwLock::new(entries),
            persist_path: Some(persist_path),
        })
    }

    /// Add passages, replacing any stored passage with the same id.
    pub fn add_passages(&self, passages: Vec<Passage>) -> Result<()> {
        let mut entries = self.entries.write();
        for p in passages {
            if let Some(existing) = entries.iter_mut().find(|e| e.id == p.id) {
                *existing = p;
            } else {
                entries.push(p);
            }
        }
        self.persist(&entries)
    }

    pub fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| !ids.contains(&e.id));
        let removed = before - entries.len();
        self.persist(&entries)?;
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<Passage> {
        self.entries.read().iter().find(|e| e.id == id).cloned()
    }

    fn persist(&self, entries: &[Passage]) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        // Atomic write via temp file + rename
        let data = serde_json::to_string(entries)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

impl DocumentIndex for VectorStore {
    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn query_similar(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredPassage>> {
        let entries = self.entries.read();

        let mut scored: Vec<(f32, &Passage)> = entries
            .iter()
            .filter(|e| filter.map_or(true, |f| f.matches(e)))
            .map(|e| (cosine_similarity(vector, &e.vector), e))
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, e)| ScoredPassage::new(e.clone(), score))
            .collect())
    }

    fn export_all(&self) -> Result<Vec<Passage>> {
        Ok(self.entries.read().clone())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(id: &str, kind: &str, v: Vec<f32>) -> Passage {
        Passage::new(id, format!("text {id}"))
            .with_metadata("type", kind)
            .with_vector(v)
    }

    fn store() -> VectorStore {
        let s = VectorStore::in_memory();
        s.add_passages(vec![
            passage("hours", "info", vec![1.0, 0.0, 0.0]),
            passage("fares", "price", vec![0.0, 1.0, 0.0]),
            passage("map", "info", vec![0.7, 0.7, 0.0]),
        ])
        .unwrap();
        s
    }

    #[test]
    fn test_query_orders_by_cosine() {
        let hits = store().query_similar(&[0.9, 0.1, 0.0], 3, None).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id()).collect();
        assert_eq!(ids, vec!["hours", "map", "fares"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_query_respects_k() {
        let hits = store().query_similar(&[1.0, 0.0, 0.0], 1, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id(), "hours");
    }

    #[test]
    fn test_filtered_query_restricts_subset() {
        let filter = MetadataFilter::eq("type", "price");
        let hits = store().filtered_query(&[1.0, 0.0, 0.0], 3, &filter).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id(), "fares");
    }

    #[test]
    fn test_empty_store_returns_nothing() {
        let s = VectorStore::in_memory();
        assert!(s.is_empty());
        assert!(s.query_similar(&[1.0], 5, None).unwrap().is_empty());
        assert!(s.export_all().unwrap().is_empty());
    }

    #[test]
    fn test_add_replaces_same_id() {
        let s = store();
        s.add_passages(vec![passage("fares", "price", vec![0.0, 0.0, 1.0])])
            .unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.get("fares").unwrap().vector, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let s = VectorStore::open_or_create(dir.path()).unwrap();
            s.add_passages(vec![passage("a", "info", vec![1.0, 0.0])]).unwrap();
        }
        let reopened = VectorStore::open_or_create(dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("a").unwrap().metadata["type"], "info");
    }

    #[test]
    fn test_delete() {
        let s = store();
        assert_eq!(s.delete(&["map".to_string()]).unwrap(), 1);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }
}
