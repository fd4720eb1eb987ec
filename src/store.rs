//! Storage trait seams: chunk persistence, document lifecycle rows, and the
//! opaque content-addressable byte store.

use async_trait::async_trait;
use uuid::Uuid;

use crate::document::{Chunk, Document, DocumentStatus};
use crate::error::Result;

/// A child chunk returned by a store search, paired with its raw score and
/// the owning document's display name.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The matched child chunk (embedding not populated on read).
    pub chunk: Chunk,
    /// The owning document's display name.
    pub document_name: String,
    /// Raw backend score: cosine similarity for vector search, lexical rank
    /// for full-text search. Scales differ; the retrieval engine normalizes.
    pub score: f32,
}

/// Persistence for parent/child chunk rows with vector and full-text query
/// support.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert a document's full chunk set in a single atomic transaction.
    ///
    /// Either every row is committed or none are; a partially-indexed
    /// document must never become visible to search. Parents are expected
    /// before the children that reference them.
    async fn insert_chunks(&self, document_id: Uuid, chunks: &[Chunk]) -> Result<()>;

    /// Delete all chunk rows for a document.
    ///
    /// Idempotent: deleting a document with no chunks is not an error.
    async fn delete_document_chunks(&self, document_id: Uuid) -> Result<()>;

    /// Rank child chunks of a collection by cosine similarity to the query
    /// embedding, best first, dropping rows below `min_similarity`.
    async fn vector_search(
        &self,
        collection_id: Uuid,
        embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<ScoredChunk>>;

    /// Rank child chunks of a collection by lexical full-text relevance to
    /// the query, best first. Rows with no term overlap are omitted.
    async fn lexical_search(
        &self,
        collection_id: Uuid,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Point lookup of parent chunks by identifier.
    ///
    /// Unknown identifiers are silently absent from the result.
    async fn fetch_parents(&self, ids: &[Uuid]) -> Result<Vec<Chunk>>;
}

/// Persistence for document lifecycle rows.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document row.
    async fn create_document(&self, document: &Document) -> Result<()>;

    /// Fetch a document by id.
    async fn get_document(&self, id: Uuid) -> Result<Option<Document>>;

    /// Update a document's lifecycle status and error message.
    ///
    /// Passing `error: None` clears any previous message.
    async fn set_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        error: Option<String>,
    ) -> Result<()>;

    /// Delete a document row, cascading to its chunks.
    async fn delete_document(&self, id: Uuid) -> Result<()>;
}

/// An opaque content-addressable byte store for uploaded files.
///
/// Put/get failures are fatal to the calling operation; delete failures are
/// logged and swallowed by callers (best-effort cleanup).
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store bytes under a path, returning an opaque URL/handle.
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<String>;

    /// Fetch the bytes behind a previously returned URL.
    async fn get(&self, url: &str) -> Result<Vec<u8>>;

    /// Delete the bytes behind a previously returned URL.
    async fn delete(&self, url: &str) -> Result<()>;
}
