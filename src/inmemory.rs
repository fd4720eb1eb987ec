//! In-memory store implementations backed by `HashMap`s behind
//! `tokio::sync::RwLock`. Suitable for development, testing, and
//! small-scale use; the production backend is [`PgStore`](crate::PgStore).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::document::{Chunk, ChunkKind, Document, DocumentStatus};
use crate::error::{RagError, Result};
use crate::store::{ChunkStore, ContentStore, DocumentStore, ScoredChunk};

/// An in-memory [`ChunkStore`] + [`DocumentStore`].
///
/// Vector search uses cosine similarity; lexical search uses a simple
/// term-frequency rank over lowercased alphanumeric tokens.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<Uuid, Document>>,
    chunks: RwLock<HashMap<Uuid, Chunk>>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunk rows currently stored for a document.
    pub async fn chunk_count(&self, document_id: Uuid) -> usize {
        self.chunks.read().await.values().filter(|c| c.document_id == document_id).count()
    }

    /// Snapshot of all chunk rows for a document, ordered by chunk index.
    pub async fn chunks_for_document(&self, document_id: Uuid) -> Vec<Chunk> {
        let mut rows: Vec<Chunk> = self
            .chunks
            .read()
            .await
            .values()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.chunk_index);
        rows
    }

}

fn document_name(documents: &HashMap<Uuid, Document>, id: Uuid) -> String {
    documents.get(&id).map(|d| d.name.clone()).unwrap_or_default()
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Term-frequency rank of a chunk's content against query terms.
fn lexical_rank(content: &str, query_terms: &[String]) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let tokens = tokenize(content);
    query_terms
        .iter()
        .map(|term| tokens.iter().filter(|t| *t == term).count() as f32)
        .sum()
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn insert_chunks(&self, document_id: Uuid, chunks: &[Chunk]) -> Result<()> {
        // Validate before mutating so a bad batch leaves the store untouched
        // (the in-memory stand-in for a rolled-back transaction).
        for chunk in chunks {
            if chunk.document_id != document_id {
                return Err(RagError::Storage(format!(
                    "chunk {} belongs to document {}, not {document_id}",
                    chunk.id, chunk.document_id
                )));
            }
            if chunk.kind == ChunkKind::Child && chunk.parent_id.is_none() {
                return Err(RagError::Storage(format!(
                    "child chunk {} has no parent reference",
                    chunk.id
                )));
            }
        }

        let mut store = self.chunks.write().await;
        for chunk in chunks {
            store.insert(chunk.id, chunk.clone());
        }
        Ok(())
    }

    async fn delete_document_chunks(&self, document_id: Uuid) -> Result<()> {
        let mut store = self.chunks.write().await;
        store.retain(|_, c| c.document_id != document_id);
        Ok(())
    }

    async fn vector_search(
        &self,
        collection_id: Uuid,
        embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<ScoredChunk>> {
        let documents = self.documents.read().await;
        let chunks = self.chunks.read().await;

        let mut scored = Vec::new();
        for chunk in chunks.values() {
            if chunk.collection_id != collection_id || chunk.kind != ChunkKind::Child {
                continue;
            }
            let Some(vector) = chunk.embedding.as_ref() else { continue };
            let score = cosine_similarity(vector, embedding);
            if score < min_similarity {
                continue;
            }
            scored.push(ScoredChunk {
                chunk: chunk.clone(),
                document_name: document_name(&documents, chunk.document_id),
                score,
            });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn lexical_search(
        &self,
        collection_id: Uuid,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let terms = tokenize(query);
        let documents = self.documents.read().await;
        let chunks = self.chunks.read().await;

        let mut scored = Vec::new();
        for chunk in chunks.values() {
            if chunk.collection_id != collection_id || chunk.kind != ChunkKind::Child {
                continue;
            }
            let score = lexical_rank(&chunk.content, &terms);
            if score <= 0.0 {
                continue;
            }
            scored.push(ScoredChunk {
                chunk: chunk.clone(),
                document_name: document_name(&documents, chunk.document_id),
                score,
            });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn fetch_parents(&self, ids: &[Uuid]) -> Result<Vec<Chunk>> {
        let chunks = self.chunks.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| chunks.get(id))
            .filter(|c| c.kind == ChunkKind::Parent)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn create_document(&self, document: &Document) -> Result<()> {
        let mut documents = self.documents.write().await;
        documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.documents.read().await.get(&id).cloned())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut documents = self.documents.write().await;
        let doc = documents
            .get_mut(&id)
            .ok_or_else(|| RagError::Storage(format!("unknown document {id}")))?;
        doc.status = status;
        doc.error = error;
        Ok(())
    }

    async fn delete_document(&self, id: Uuid) -> Result<()> {
        let mut documents = self.documents.write().await;
        documents.remove(&id);
        drop(documents);
        // Cascade, matching the SQL schema's foreign-key behavior.
        self.delete_document_chunks(id).await
    }
}

/// An in-memory [`ContentStore`] keyed by `mem://` URLs.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryContentStore {
    /// Create a new empty content store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<String> {
        let url = format!("mem://{path}");
        self.objects.write().await.insert(url.clone(), bytes.to_vec());
        Ok(url)
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| RagError::ContentStore(format!("no content at {url}")))
    }

    async fn delete(&self, url: &str) -> Result<()> {
        self.objects.write().await.remove(url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChunkSpan;
    use chrono::Utc;

    fn doc(collection_id: Uuid) -> Document {
        Document {
            id: Uuid::new_v4(),
            collection_id,
            name: "notes.txt".to_string(),
            mime_type: "text/plain".to_string(),
            size_bytes: 10,
            content_url: "mem://x".to_string(),
            status: DocumentStatus::Pending,
            error: None,
            created_at: Utc::now(),
        }
    }

    fn child(document_id: Uuid, collection_id: Uuid, parent_id: Uuid, content: &str, embedding: Vec<f32>, index: i32) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id,
            collection_id,
            content: content.to_string(),
            embedding: Some(embedding),
            chunk_index: index,
            kind: ChunkKind::Child,
            parent_id: Some(parent_id),
            page: None,
            section: None,
            has_images: false,
            image_desc: None,
            span: ChunkSpan::new(0, content.len()),
        }
    }

    fn parent(document_id: Uuid, collection_id: Uuid, content: &str, index: i32) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id,
            collection_id,
            content: content.to_string(),
            embedding: None,
            chunk_index: index,
            kind: ChunkKind::Parent,
            parent_id: None,
            page: None,
            section: None,
            has_images: false,
            image_desc: None,
            span: ChunkSpan::new(0, content.len()),
        }
    }

    #[tokio::test]
    async fn vector_search_orders_by_similarity() {
        let store = InMemoryStore::new();
        let collection = Uuid::new_v4();
        let d = doc(collection);
        store.create_document(&d).await.unwrap();

        let p = parent(d.id, collection, "parent", 0);
        let near = child(d.id, collection, p.id, "near", vec![1.0, 0.0], 1);
        let far = child(d.id, collection, p.id, "far", vec![0.0, 1.0], 2);
        store.insert_chunks(d.id, &[p, near.clone(), far]).await.unwrap();

        let results = store.vector_search(collection, &[1.0, 0.1], 10, 0.0).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, near.id);
        assert!(results[0].score > results[1].score);
        assert_eq!(results[0].document_name, "notes.txt");
    }

    #[tokio::test]
    async fn min_similarity_floor_filters_candidates() {
        let store = InMemoryStore::new();
        let collection = Uuid::new_v4();
        let d = doc(collection);
        store.create_document(&d).await.unwrap();

        let p = parent(d.id, collection, "parent", 0);
        let orthogonal = child(d.id, collection, p.id, "c", vec![0.0, 1.0], 1);
        store.insert_chunks(d.id, &[p, orthogonal]).await.unwrap();

        let results = store.vector_search(collection, &[1.0, 0.0], 10, 0.5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn lexical_search_ranks_by_term_frequency() {
        let store = InMemoryStore::new();
        let collection = Uuid::new_v4();
        let d = doc(collection);
        store.create_document(&d).await.unwrap();

        let p = parent(d.id, collection, "parent", 0);
        let twice = child(d.id, collection, p.id, "osmosis then osmosis again", vec![1.0], 1);
        let once = child(d.id, collection, p.id, "osmosis mentioned once", vec![1.0], 2);
        let never = child(d.id, collection, p.id, "unrelated content", vec![1.0], 3);
        store.insert_chunks(d.id, &[p, twice.clone(), once.clone(), never]).await.unwrap();

        let results = store.lexical_search(collection, "Osmosis", 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, twice.id);
        assert_eq!(results[1].chunk.id, once.id);
    }

    #[tokio::test]
    async fn delete_document_cascades_to_chunks() {
        let store = InMemoryStore::new();
        let collection = Uuid::new_v4();
        let d = doc(collection);
        store.create_document(&d).await.unwrap();

        let p = parent(d.id, collection, "parent", 0);
        let c = child(d.id, collection, p.id, "content", vec![1.0], 1);
        store.insert_chunks(d.id, &[p, c]).await.unwrap();
        assert_eq!(store.chunk_count(d.id).await, 2);

        store.delete_document(d.id).await.unwrap();
        assert_eq!(store.chunk_count(d.id).await, 0);
        assert!(store.get_document(d.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_chunks_is_idempotent() {
        let store = InMemoryStore::new();
        assert!(store.delete_document_chunks(Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn fetch_parents_skips_children_and_unknown_ids() {
        let store = InMemoryStore::new();
        let collection = Uuid::new_v4();
        let d = doc(collection);
        store.create_document(&d).await.unwrap();

        let p = parent(d.id, collection, "parent", 0);
        let c = child(d.id, collection, p.id, "content", vec![1.0], 1);
        store.insert_chunks(d.id, &[p.clone(), c.clone()]).await.unwrap();

        let fetched = store.fetch_parents(&[p.id, c.id, Uuid::new_v4()]).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, p.id);
    }

    #[tokio::test]
    async fn content_store_round_trip() {
        let store = InMemoryContentStore::new();
        let url = store.put("class/doc.txt", b"bytes").await.unwrap();
        assert_eq!(store.get(&url).await.unwrap(), b"bytes");
        store.delete(&url).await.unwrap();
        assert!(store.get(&url).await.is_err());
    }
}
