//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::Result;

/// A provider that generates dense vector embeddings from text.
///
/// Implementations wrap external embedding APIs behind a unified async
/// interface. Batch embedding is all-or-nothing: a failure on any part of
/// the batch fails the whole call, and no partial result is ever returned.
///
/// # Example
///
/// ```rust,ignore
/// use docrag::EmbeddingProvider;
///
/// let provider = OpenAiEmbedder::from_env()?;
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// Returns one vector per input, in input order. An empty input slice
    /// must return an empty `Vec` without contacting the provider.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Return the dimensionality of embeddings produced by this provider.
    ///
    /// Must match the vector column declared by the chunk store.
    fn dimensions(&self) -> usize;
}
