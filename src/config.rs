//! Configuration for the ingestion pipeline and the retrieval engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Configuration parameters for document processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Target size of a parent chunk in characters.
    pub parent_size: usize,
    /// Target size of a child chunk in characters.
    pub child_size: usize,
    /// Maximum number of texts sent to the embedding provider per call.
    pub max_batch_size: usize,
    /// Delay between consecutive embedding sub-batches (rate-limit pacing).
    pub batch_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parent_size: 2000,
            child_size: 400,
            max_batch_size: 100,
            batch_delay: Duration::from_millis(200),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for constructing a [`PipelineConfig`].
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

/// Builder for constructing a validated [`PipelineConfig`].
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the target parent chunk size in characters.
    pub fn parent_size(mut self, size: usize) -> Self {
        self.config.parent_size = size;
        self
    }

    /// Set the target child chunk size in characters.
    pub fn child_size(mut self, size: usize) -> Self {
        self.config.child_size = size;
        self
    }

    /// Set the maximum embedding sub-batch size.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.max_batch_size = size;
        self
    }

    /// Set the delay between consecutive embedding sub-batches.
    pub fn batch_delay(mut self, delay: Duration) -> Self {
        self.config.batch_delay = delay;
        self
    }

    /// Build the [`PipelineConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - `child_size == 0`
    /// - `child_size > parent_size`
    /// - `max_batch_size == 0`
    pub fn build(self) -> Result<PipelineConfig> {
        if self.config.child_size == 0 {
            return Err(RagError::Config("child_size must be greater than zero".to_string()));
        }
        if self.config.child_size > self.config.parent_size {
            return Err(RagError::Config(format!(
                "child_size ({}) must not exceed parent_size ({})",
                self.config.child_size, self.config.parent_size
            )));
        }
        if self.config.max_batch_size == 0 {
            return Err(RagError::Config("max_batch_size must be greater than zero".to_string()));
        }
        Ok(self.config)
    }
}

/// Configuration parameters for hybrid retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Number of fused results returned by a plain hybrid search.
    pub top_k: usize,
    /// Weight applied to the normalized vector-similarity score.
    pub vector_weight: f32,
    /// Weight applied to the normalized lexical rank score.
    pub bm25_weight: f32,
    /// Minimum cosine similarity a child chunk must reach to be a vector
    /// candidate.
    pub min_similarity: f32,
    /// Size of the fused candidate set handed to the reranker.
    pub initial_k: usize,
    /// Number of results returned from the reranked entry point.
    pub final_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            vector_weight: 0.7,
            bm25_weight: 0.3,
            min_similarity: 0.0,
            initial_k: 30,
            final_k: 5,
        }
    }
}

impl SearchConfig {
    /// Create a new builder for constructing a [`SearchConfig`].
    pub fn builder() -> SearchConfigBuilder {
        SearchConfigBuilder::default()
    }
}

/// Builder for constructing a validated [`SearchConfig`].
#[derive(Debug, Clone, Default)]
pub struct SearchConfigBuilder {
    config: SearchConfig,
}

impl SearchConfigBuilder {
    /// Set the number of fused results returned by a plain hybrid search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the weight applied to normalized vector scores.
    pub fn vector_weight(mut self, weight: f32) -> Self {
        self.config.vector_weight = weight;
        self
    }

    /// Set the weight applied to normalized lexical scores.
    pub fn bm25_weight(mut self, weight: f32) -> Self {
        self.config.bm25_weight = weight;
        self
    }

    /// Set the minimum cosine similarity for vector candidates.
    pub fn min_similarity(mut self, floor: f32) -> Self {
        self.config.min_similarity = floor;
        self
    }

    /// Set the fused candidate count handed to the reranker.
    pub fn initial_k(mut self, k: usize) -> Self {
        self.config.initial_k = k;
        self
    }

    /// Set the result count returned from the reranked entry point.
    pub fn final_k(mut self, k: usize) -> Self {
        self.config.final_k = k;
        self
    }

    /// Build the [`SearchConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - `top_k == 0` or `final_k == 0`
    /// - `final_k > initial_k`
    /// - either weight is negative or non-finite, or both weights are zero
    pub fn build(self) -> Result<SearchConfig> {
        let c = &self.config;
        if c.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".to_string()));
        }
        if c.final_k == 0 {
            return Err(RagError::Config("final_k must be greater than zero".to_string()));
        }
        if c.final_k > c.initial_k {
            return Err(RagError::Config(format!(
                "final_k ({}) must not exceed initial_k ({})",
                c.final_k, c.initial_k
            )));
        }
        for (name, w) in [("vector_weight", c.vector_weight), ("bm25_weight", c.bm25_weight)] {
            if !w.is_finite() || w < 0.0 {
                return Err(RagError::Config(format!(
                    "{name} must be finite and non-negative, got {w}"
                )));
            }
        }
        if c.vector_weight == 0.0 && c.bm25_weight == 0.0 {
            return Err(RagError::Config(
                "at least one of vector_weight and bm25_weight must be non-zero".to_string(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_validate() {
        assert!(PipelineConfig::builder().build().is_ok());
        assert!(SearchConfig::builder().build().is_ok());
    }

    #[test]
    fn child_larger_than_parent_is_rejected() {
        let err = PipelineConfig::builder().parent_size(100).child_size(200).build();
        assert!(matches!(err, Err(RagError::Config(_))));
    }

    #[test]
    fn final_k_must_fit_in_initial_k() {
        let err = SearchConfig::builder().initial_k(5).final_k(6).build();
        assert!(matches!(err, Err(RagError::Config(_))));
    }

    #[test]
    fn zero_weights_are_rejected() {
        let err = SearchConfig::builder().vector_weight(0.0).bm25_weight(0.0).build();
        assert!(matches!(err, Err(RagError::Config(_))));
    }
}
