//! Reranking trait and implementations for second-stage retrieval.
//!
//! A reranker re-scores an already-retrieved candidate list against the
//! query. Scores are on a 0-10 scale; the reranker's ordering is
//! authoritative for the final cut regardless of first-stage fusion scores.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{RagError, Result};

/// The default OpenAI chat completions endpoint used by [`LlmReranker`].
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// The default model used by [`LlmReranker`].
const DEFAULT_RERANK_MODEL: &str = "gpt-4o-mini";

/// A retrieval candidate handed to a reranker.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    /// The chunk text to score against the query.
    pub content: String,
    /// The owning document's display name, for prompt context.
    pub document_name: String,
    /// The section heading the chunk fell under, if any.
    pub section: Option<String>,
}

/// A reranker's verdict on one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedIndex {
    /// Index into the candidate slice passed to [`Reranker::rerank`].
    pub index: usize,
    /// Relevance score on a 0-10 scale, higher is more relevant.
    pub score: f32,
}

/// Second-stage relevance scorer for retrieved candidates.
///
/// Implementations return one [`RankedIndex`] per input candidate, sorted
/// best first. Every input index must appear exactly once in the output.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Re-score `candidates` against `query`, best first.
    async fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<RankedIndex>>;
}

/// A reranker that preserves the incoming order and assigns no-op scores.
///
/// Useful for tests and for running the two-stage search path without a
/// second model call.
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    async fn rerank(
        &self,
        _query: &str,
        candidates: &[RerankCandidate],
    ) -> Result<Vec<RankedIndex>> {
        // Descending scores so the incoming order survives a stable re-sort.
        Ok(candidates
            .iter()
            .enumerate()
            .map(|(index, _)| RankedIndex {
                index,
                score: (candidates.len() - index) as f32 * 10.0 / candidates.len().max(1) as f32,
            })
            .collect())
    }
}

/// A [`Reranker`] that asks an OpenAI chat model to score candidates.
///
/// Candidates are numbered and sent in a single prompt; the model replies
/// with a JSON array of `{index, score}` objects. Missing indexes are
/// appended with score 0 so the contract of one verdict per candidate holds
/// even when the model drops an item.
pub struct LlmReranker {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl LlmReranker {
    /// Create a new reranker with the given API key and the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::Rerank {
                reranker: "LLM".into(),
                message: "API key must not be empty".into(),
            });
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_RERANK_MODEL.into(),
        })
    }

    /// Create a new reranker using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| RagError::Rerank {
            reranker: "LLM".into(),
            message: "OPENAI_API_KEY environment variable not set".into(),
        })?;
        Self::new(api_key)
    }

    /// Set the chat model used for scoring.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn build_prompt(query: &str, candidates: &[RerankCandidate]) -> String {
        let mut prompt = format!(
            "Score each passage for relevance to the query on a scale of 0 to 10.\n\
             Reply with only a JSON array of objects like {{\"index\": 0, \"score\": 7.5}}, \
             one per passage.\n\nQuery: {query}\n\n"
        );
        for (i, candidate) in candidates.iter().enumerate() {
            prompt.push_str(&format!("[{i}] (from \"{}\"", candidate.document_name));
            if let Some(section) = &candidate.section {
                prompt.push_str(&format!(", section \"{section}\""));
            }
            prompt.push_str(&format!(")\n{}\n\n", candidate.content));
        }
        prompt
    }

    fn parse_verdicts(body: &str, candidate_count: usize) -> Result<Vec<RankedIndex>> {
        // Models sometimes wrap the array in a markdown fence.
        let trimmed = body.trim();
        let json = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|s| s.strip_suffix("```"))
            .unwrap_or(trimmed)
            .trim();

        let raw: Vec<RawVerdict> = serde_json::from_str(json).map_err(|e| RagError::Rerank {
            reranker: "LLM".into(),
            message: format!("unparseable verdict response: {e}"),
        })?;

        let mut seen = vec![false; candidate_count];
        let mut verdicts = Vec::with_capacity(candidate_count);
        for v in raw {
            if v.index >= candidate_count || seen[v.index] {
                continue;
            }
            seen[v.index] = true;
            verdicts.push(RankedIndex { index: v.index, score: v.score.clamp(0.0, 10.0) });
        }

        for (index, seen) in seen.into_iter().enumerate() {
            if !seen {
                warn!(index, "reranker dropped a candidate, scoring it 0");
                verdicts.push(RankedIndex { index, score: 0.0 });
            }
        }

        verdicts.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(verdicts)
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    index: usize,
    score: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[async_trait]
impl Reranker for LlmReranker {
    async fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<RankedIndex>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = Self::build_prompt(query, candidates);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: &prompt }],
            temperature: 0.0,
        };

        debug!(model = %self.model, candidates = candidates.len(), "reranking");

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(reranker = "LLM", error = %e, "rerank request failed");
                RagError::Rerank { reranker: "LLM".into(), message: format!("request failed: {e}") }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(reranker = "LLM", %status, "rerank API error");
            return Err(RagError::Rerank {
                reranker: "LLM".into(),
                message: format!("API returned {status}: {body}"),
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| RagError::Rerank {
            reranker: "LLM".into(),
            message: format!("failed to parse response: {e}"),
        })?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RagError::Rerank {
                reranker: "LLM".into(),
                message: "API returned no choices".into(),
            })?;

        Self::parse_verdicts(&content, candidates.len())
    }
}
