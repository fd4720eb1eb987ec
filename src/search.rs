//! Hybrid retrieval engine: vector + lexical search with weighted score
//! fusion, parent context hydration, and an optional reranking stage.
//!
//! Both backends are queried concurrently with an overfetch factor, each
//! result set is max-normalized, and the two are merged by chunk id into a
//! single weighted ranking. A chunk found by only one backend simply
//! contributes zero from the other side.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::config::SearchConfig;
use crate::document::{Chunk, HierarchicalSearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::rerank::{RerankCandidate, Reranker};
use crate::store::{ChunkStore, ScoredChunk};

/// How many candidates to pull from each backend per requested result.
const OVERFETCH_FACTOR: usize = 3;

/// Hybrid search over a [`ChunkStore`], combining vector similarity and
/// lexical full-text relevance.
///
/// # Example
///
/// ```rust,ignore
/// use docrag::{HybridSearchEngine, SearchConfig};
///
/// let engine = HybridSearchEngine::new(store, embedder, SearchConfig::default())
///     .with_reranker(reranker);
/// let results = engine.search(collection_id, "photosynthesis").await?;
/// ```
pub struct HybridSearchEngine {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<dyn Reranker>>,
    config: SearchConfig,
}

impl HybridSearchEngine {
    /// Create a new engine without a reranker.
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Self {
        Self { store, embedder, reranker: None, config }
    }

    /// Attach a reranker, enabling the two-stage [`rag_search`](Self::rag_search) path.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Single-stage hybrid search: fused ranking truncated to `top_k`,
    /// hydrated with parent context.
    pub async fn search(
        &self,
        collection_id: Uuid,
        query: &str,
    ) -> Result<Vec<HierarchicalSearchResult>> {
        let fused = self.fused_candidates(collection_id, query, self.config.top_k).await?;
        self.hydrate(fused).await
    }

    /// Two-stage search: fused ranking of `initial_k` candidates, reranked,
    /// truncated to `final_k`, hydrated with parent context.
    ///
    /// The reranker's ordering is authoritative; fusion scores only decide
    /// which candidates it gets to see. Without a reranker attached, or
    /// with at most one candidate, the fused ranking is used as-is.
    pub async fn rag_search(
        &self,
        collection_id: Uuid,
        query: &str,
    ) -> Result<Vec<HierarchicalSearchResult>> {
        let mut fused = self.fused_candidates(collection_id, query, self.config.initial_k).await?;

        if let Some(reranker) = self.reranker.as_ref().filter(|_| fused.len() > 1) {
            let candidates: Vec<RerankCandidate> = fused
                .iter()
                .map(|(scored, _)| RerankCandidate {
                    content: scored.chunk.content.clone(),
                    document_name: scored.document_name.clone(),
                    section: scored.chunk.section.clone(),
                })
                .collect();

            let verdicts = reranker.rerank(query, &candidates).await?;
            debug!(candidates = fused.len(), "applied reranker verdicts");

            let reranked: Vec<(ScoredChunk, f32)> = verdicts
                .into_iter()
                .filter_map(|v| {
                    fused.get(v.index).map(|(scored, _)| (scored.clone(), v.score / 10.0))
                })
                .collect();
            fused = reranked;
        }

        fused.truncate(self.config.final_k);
        self.hydrate(fused).await
    }

    /// Query both backends concurrently and fuse into a single ranking of
    /// at most `take` candidates, best first.
    async fn fused_candidates(
        &self,
        collection_id: Uuid,
        query: &str,
        take: usize,
    ) -> Result<Vec<(ScoredChunk, f32)>> {
        if query.trim().is_empty() {
            return Err(RagError::Search("query must not be empty".into()));
        }

        let embedding = self.embedder.embed(query).await?;
        let fetch = take * OVERFETCH_FACTOR;

        let (vector, lexical) = tokio::try_join!(
            self.store.vector_search(
                collection_id,
                &embedding,
                fetch,
                self.config.min_similarity
            ),
            self.store.lexical_search(collection_id, query, fetch),
        )?;

        debug!(
            vector_hits = vector.len(),
            lexical_hits = lexical.len(),
            "fusing backend results"
        );

        let mut fused =
            fuse(vector, lexical, self.config.vector_weight, self.config.bm25_weight);
        fused.truncate(take);
        Ok(fused)
    }

    /// Resolve parent content for each hit and shape the public result.
    async fn hydrate(
        &self,
        fused: Vec<(ScoredChunk, f32)>,
    ) -> Result<Vec<HierarchicalSearchResult>> {
        let parent_ids: Vec<Uuid> =
            fused.iter().filter_map(|(scored, _)| scored.chunk.parent_id).collect();

        let parents: HashMap<Uuid, Chunk> = if parent_ids.is_empty() {
            HashMap::new()
        } else {
            self.store
                .fetch_parents(&parent_ids)
                .await?
                .into_iter()
                .map(|p| (p.id, p))
                .collect()
        };

        Ok(fused
            .into_iter()
            .map(|(scored, score)| {
                let parent_content = scored
                    .chunk
                    .parent_id
                    .and_then(|id| parents.get(&id))
                    .map(|p| p.content.clone());
                HierarchicalSearchResult {
                    chunk_id: scored.chunk.id,
                    content: scored.chunk.content,
                    score,
                    document_id: scored.chunk.document_id,
                    document_name: scored.document_name,
                    chunk_index: scored.chunk.chunk_index,
                    page: scored.chunk.page,
                    section: scored.chunk.section,
                    parent_content,
                    has_images: scored.chunk.has_images,
                    image_desc: scored.chunk.image_desc,
                }
            })
            .collect())
    }
}

/// Normalization divisor for a result set: its best score, floored at 1.0
/// so scales already bounded by one (cosine similarity) pass through raw.
fn max_divisor(results: &[ScoredChunk]) -> f32 {
    results.iter().map(|s| s.score).fold(0.0_f32, f32::max).max(1.0)
}

/// Merge two scored result sets by chunk id into a weighted ranking,
/// best first. Each side is max-normalized before weighting; a chunk
/// absent from one side contributes zero from it.
fn fuse(
    vector: Vec<ScoredChunk>,
    lexical: Vec<ScoredChunk>,
    vector_weight: f32,
    lexical_weight: f32,
) -> Vec<(ScoredChunk, f32)> {
    let vector_div = max_divisor(&vector);
    let lexical_div = max_divisor(&lexical);

    let mut merged: HashMap<Uuid, (ScoredChunk, f32)> = HashMap::new();

    for scored in vector {
        let contribution = scored.score / vector_div * vector_weight;
        merged.insert(scored.chunk.id, (scored, contribution));
    }
    for scored in lexical {
        let contribution = scored.score / lexical_div * lexical_weight;
        merged
            .entry(scored.chunk.id)
            .and_modify(|(_, combined)| *combined += contribution)
            .or_insert((scored, contribution));
    }

    let mut fused: Vec<(ScoredChunk, f32)> = merged.into_values().collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ChunkKind, ChunkSpan};

    fn scored(id: Uuid, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id,
                document_id: Uuid::new_v4(),
                collection_id: Uuid::new_v4(),
                content: "text".into(),
                embedding: None,
                chunk_index: 0,
                kind: ChunkKind::Child,
                parent_id: None,
                page: None,
                section: None,
                has_images: false,
                image_desc: None,
                span: ChunkSpan::new(0, 4),
            },
            document_name: "doc.pdf".into(),
            score,
        }
    }

    #[test]
    fn divisor_floors_at_one() {
        assert_eq!(max_divisor(&[scored(Uuid::new_v4(), 0.8)]), 1.0);
        assert_eq!(max_divisor(&[]), 1.0);
        assert_eq!(max_divisor(&[scored(Uuid::new_v4(), 4.0)]), 4.0);
    }

    #[test]
    fn both_backends_sum_their_weighted_contributions() {
        let id = Uuid::new_v4();
        let fused = fuse(vec![scored(id, 0.9)], vec![scored(id, 2.0)], 0.7, 0.3);
        assert_eq!(fused.len(), 1);
        // 0.9/1.0 * 0.7 + 2.0/2.0 * 0.3
        assert!((fused[0].1 - 0.93).abs() < 1e-6);
    }

    #[test]
    fn single_backend_hit_keeps_partial_score() {
        let vector_only = Uuid::new_v4();
        let lexical_only = Uuid::new_v4();
        let fused =
            fuse(vec![scored(vector_only, 1.0)], vec![scored(lexical_only, 3.0)], 0.7, 0.3);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].0.chunk.id, vector_only);
        assert!((fused[0].1 - 0.7).abs() < 1e-6);
        assert!((fused[1].1 - 0.3).abs() < 1e-6);
    }

    #[test]
    fn ranking_is_best_first() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let fused = fuse(
            vec![scored(a, 0.2), scored(b, 0.9)],
            Vec::new(),
            0.7,
            0.3,
        );
        assert_eq!(fused[0].0.chunk.id, b);
        assert_eq!(fused[1].0.chunk.id, a);
    }

    #[test]
    fn lexical_normalization_uses_its_own_max() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let fused = fuse(Vec::new(), vec![scored(a, 8.0), scored(b, 4.0)], 0.7, 0.3);
        assert!((fused[0].1 - 0.3).abs() < 1e-6);
        assert!((fused[1].1 - 0.15).abs() < 1e-6);
    }
}
