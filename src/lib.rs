//! # docrag
//!
//! Document ingestion and hybrid retrieval for educational material.
//!
//! Uploaded files (PDF, DOCX, plain text) are extracted, embedded images
//! are captioned by a vision model, the text is split into hierarchical
//! parent/child chunks, child chunks are embedded, and everything is
//! indexed for hybrid search: vector similarity fused with lexical
//! full-text relevance, with an optional LLM reranking stage.
//!
//! ## Components
//!
//! - [`IngestPipeline`] — upload-to-index orchestration with a
//!   `PENDING → PROCESSING → COMPLETED | FAILED` document status machine
//! - [`HybridSearchEngine`] — fused vector + lexical retrieval with parent
//!   context hydration and optional reranking
//! - [`PgStore`] — PostgreSQL persistence (pgvector + full-text search)
//! - [`InMemoryStore`] — in-process store for development and tests
//! - [`OpenAiEmbedder`], [`OpenAiDescriber`], [`LlmReranker`] — OpenAI-backed
//!   model clients behind the [`EmbeddingProvider`], [`ImageDescriber`], and
//!   [`Reranker`] trait seams
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docrag::{
//!     HybridSearchEngine, IngestPipeline, NewDocument, OpenAiEmbedder, PgStore, SearchConfig,
//! };
//!
//! let store = Arc::new(PgStore::connect(&database_url).await?);
//! let embedder = Arc::new(OpenAiEmbedder::from_env()?);
//! store.ensure_schema(embedder.dimensions()).await?;
//!
//! let pipeline = IngestPipeline::builder()
//!     .document_store(store.clone())
//!     .chunk_store(store.clone())
//!     .content_store(content_store)
//!     .embedder(embedder.clone())
//!     .build()?;
//!
//! let doc = pipeline.submit(NewDocument {
//!     collection_id,
//!     name: "syllabus.pdf".into(),
//!     mime_type: "application/pdf".into(),
//!     bytes,
//! }).await?;
//!
//! let engine = HybridSearchEngine::new(store, embedder, SearchConfig::default());
//! let results = engine.search(collection_id, "when is the midterm?").await?;
//! ```

pub mod chunking;
pub mod config;
pub mod describe;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod inmemory;
pub mod openai;
pub mod pgstore;
pub mod pipeline;
pub mod rerank;
pub mod search;
pub mod store;

pub use chunking::{ChildChunk, HierarchicalChunker, ParentChunk};
pub use config::{PipelineConfig, SearchConfig};
pub use describe::{ImageDescriber, OpenAiDescriber};
pub use document::{
    Chunk, ChunkKind, ChunkSpan, Document, DocumentStatus, HierarchicalSearchResult, NewDocument,
};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use extract::{ExtractionResult, PageMap, PageText, PdfImage};
pub use inmemory::{InMemoryContentStore, InMemoryStore};
pub use openai::OpenAiEmbedder;
pub use pgstore::PgStore;
pub use pipeline::IngestPipeline;
pub use rerank::{LlmReranker, NoOpReranker, RankedIndex, RerankCandidate, Reranker};
pub use search::HybridSearchEngine;
pub use store::{ChunkStore, ContentStore, DocumentStore, ScoredChunk};
