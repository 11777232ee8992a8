use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::chunking::TextSplitter;
use crate::error::{RagError, RagResult};
use crate::llm::embeddings::Embedder;
use crate::models::{Passage, PARENT_ID_KEY};
use crate::search::vector::{DocumentIndex, VectorStore};

/// Side table from parent-document id to the full parent passage.
///
/// Child chunks live in the vector index and point back here through their
/// `parent_id` metadata.
pub struct ParentStore {
    parents: RwLock<HashMap<String, Passage>>,
    persist_path: Option<PathBuf>,
}

impl ParentStore {
    pub fn in_memory() -> Self {
        Self {
            parents: RwLock::new(HashMap::new()),
            persist_path: None,
        }
    }

    pub fn open_or_create(path: &Path) -> Result<Self> {
        let parents = if path.exists() {
            let data = std::fs::read_to_string(path).context("Failed to read parent store")?;
            serde_json::from_str(&data).context("Failed to parse parent store")?
        } else {
            HashMap::new()
        };

        Ok(Self {
            parents: RwLock::new(parents),
            persist_path: Some(path.to_path_buf()),
        })
    }

    pub fn insert(&self, parent: Passage) -> Result<()> {
        let mut parents = self.parents.write();
        parents.insert(parent.id.clone(), parent);
        self.persist(&parents)
    }

    pub fn get(&self, id: &str) -> Option<Passage> {
        self.parents.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.parents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.read().is_empty()
    }

    /// Parent of a child chunk, if the child carries a known `parent_id`.
    pub fn resolve(&self, child: &Passage) -> Option<Passage> {
        child.parent_id().and_then(|id| self.get(id))
    }

    /// Split `parent` into child chunks, embed and index them, and record
    /// the parent. Returns the number of children indexed.
    pub async fn ingest(
        &self,
        parent: Passage,
        splitter: &TextSplitter,
        embedder: &dyn Embedder,
        index: &VectorStore,
    ) -> RagResult<usize> {
        let texts = splitter.split(&parent.text);
        if texts.is_empty() {
            return Ok(0);
        }

        let vectors = embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| RagError::Index(format!("failed to embed children of {}: {e:#}", parent.id)))?;

        let children: Vec<Passage> = texts
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, vector))| {
                let mut child = Passage::new(format!("{}#{i}", parent.id), text).with_vector(vector);
                child.metadata = parent.metadata.clone();
                child.with_metadata(PARENT_ID_KEY, parent.id.clone())
            })
            .collect();

        // Re-ingesting a parent replaces all of its previous children
        let stale: Vec<String> = index
            .export_all()
            .map_err(|e| RagError::Index(format!("{e:#}")))?
            .into_iter()
            .filter(|p| p.parent_id() == Some(parent.id.as_str()))
            .map(|p| p.id)
            .collect();
        if !stale.is_empty() {
            index
                .delete(&stale)
                .map_err(|e| RagError::Index(format!("{e:#}")))?;
        }

        let count = children.len();
        index
            .add_passages(children)
            .map_err(|e| RagError::Index(format!("{e:#}")))?;
        self.insert(parent)
            .map_err(|e| RagError::Index(format!("{e:#}")))?;

        tracing::debug!("Indexed {count} child chunks");
        Ok(count)
    }

    fn persist(&self, parents: &HashMap<String, Passage>) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_string(parents)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::embeddings::HashingEmbedder;

    #[tokio::test]
    async fn test_ingest_links_children_to_parent() {
        let store = ParentStore::in_memory();
        let index = VectorStore::in_memory();
        let splitter = TextSplitter::new(30, 0).unwrap();
        let embedder = HashingEmbedder::new(64);

        let parent = Passage::new(
            "timetable",
            "Line 1 runs every ten minutes.\n\nLine 2 runs every half hour.",
        )
        .with_metadata("source", "https://example.org/timetable");

        let n = store.ingest(parent, &splitter, &embedder, &index).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(index.len(), 2);
        assert_eq!(store.len(), 1);

        let child = index.get("timetable#1").unwrap();
        assert_eq!(child.parent_id(), Some("timetable"));
        assert_eq!(child.source(), Some("https://example.org/timetable"));
        assert_eq!(store.resolve(&child).unwrap().id, "timetable");
    }

    #[tokio::test]
    async fn test_reingest_replaces_previous_children() {
        let store = ParentStore::in_memory();
        let index = VectorStore::in_memory();
        let splitter = TextSplitter::new(30, 0).unwrap();
        let embedder = HashingEmbedder::new(64);

        let long = Passage::new(
            "timetable",
            "Line 1 runs every ten minutes.\n\nLine 2 runs every half hour.\n\nLine 3 is suspended.",
        );
        assert_eq!(store.ingest(long, &splitter, &embedder, &index).await.unwrap(), 3);

        let short = Passage::new("timetable", "Line 1 runs every ten minutes.");
        assert_eq!(store.ingest(short, &splitter, &embedder, &index).await.unwrap(), 1);
        assert_eq!(index.len(), 1);
        assert!(index.get("timetable#2").is_none());
        assert_eq!(store.get("timetable").unwrap().text, "Line 1 runs every ten minutes.");
    }

    #[test]
    fn test_resolve_without_parent_id() {
        let store = ParentStore::in_memory();
        assert!(store.resolve(&Passage::new("orphan", "x")).is_none());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parents.json");
        {
            let store = ParentStore::open_or_create(&path).unwrap();
            store.insert(Passage::new("p1", "parent text")).unwrap();
        }
        let reopened = ParentStore::open_or_create(&path).unwrap();
        assert_eq!(reopened.get("p1").unwrap().text, "parent text");
    }
}
