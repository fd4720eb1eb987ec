//! Image description: vision-model captioning of embedded PDF images and
//! the sentinel markers used to fuse descriptions into page text.
//!
//! Descriptions are appended to a page's text wrapped in a sentinel pair so
//! they travel through chunking with the surrounding prose. After chunking,
//! [`split_image_annotations`] pulls the enclosed text back out of child
//! chunk content into a structured field — image commentary comes from a
//! different process than the source text and would otherwise skew lexical
//! and vector matching of the chunk itself.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{RagError, Result};
use crate::extract::PdfImage;

/// Opening sentinel for a fused image description.
pub const IMAGE_DESC_START: &str = "[IMG]";

/// Closing sentinel for a fused image description.
pub const IMAGE_DESC_END: &str = "[/IMG]";

/// A vision-model client that turns image bytes into a text description.
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    /// Describe one embedded image. The page number is available as context
    /// for the model prompt.
    async fn describe(&self, image: &PdfImage) -> Result<String>;
}

/// Append a sentinel-wrapped image description after the given page text.
///
/// Blank lines inside the description are collapsed so the sentinel pair
/// always stays within one paragraph and cannot be split by a paragraph
/// boundary downstream.
pub fn fuse_description(page_text: &mut String, description: &str) {
    let mut description = description.to_string();
    while description.contains("\n\n") {
        description = description.replace("\n\n", "\n");
    }
    page_text.push('\n');
    page_text.push_str(IMAGE_DESC_START);
    page_text.push_str(&description);
    page_text.push_str(IMAGE_DESC_END);
}

/// Extract sentinel-wrapped image descriptions from chunk content.
///
/// Returns the content with every sentinel pair (and the enclosed text)
/// removed, plus the enclosed descriptions trimmed and joined by newlines.
/// Content without a complete sentinel pair is returned unchanged with
/// `None`.
pub fn split_image_annotations(content: &str) -> (String, Option<String>) {
    if !content.contains(IMAGE_DESC_START) {
        return (content.to_string(), None);
    }

    let mut clean = String::with_capacity(content.len());
    let mut descriptions: Vec<&str> = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find(IMAGE_DESC_START) {
        let after_start = start + IMAGE_DESC_START.len();
        match rest[after_start..].find(IMAGE_DESC_END) {
            Some(end) => {
                clean.push_str(&rest[..start]);
                let desc = rest[after_start..after_start + end].trim();
                if !desc.is_empty() {
                    descriptions.push(desc);
                }
                rest = &rest[after_start + end + IMAGE_DESC_END.len()..];
            }
            None => {
                // Unterminated marker (split across a chunk boundary):
                // leave the remainder untouched.
                break;
            }
        }
    }
    clean.push_str(rest);

    if descriptions.is_empty() {
        return (clean, None);
    }
    (clean.trim_end().to_string(), Some(descriptions.join("\n")))
}

/// The default OpenAI-compatible chat completions endpoint.
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// The default vision-capable model.
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// An [`ImageDescriber`] backed by an OpenAI-compatible vision model.
///
/// Sends the image as a base64 data URL alongside a prompt that carries the
/// page number as context.
pub struct OpenAiDescriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiDescriber {
    /// Create a new describer with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::ImageDescription("API key must not be empty".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            url: OPENAI_CHAT_URL.to_string(),
        })
    }

    /// Create a new describer using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::ImageDescription("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        Self::new(api_key)
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a non-default endpoint URL (e.g. a proxy or compatible server).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

// ── API request/response types ─────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
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
impl ImageDescriber for OpenAiDescriber {
    async fn describe(&self, image: &PdfImage) -> Result<String> {
        debug!(page = image.page, bytes = image.data.len(), "describing embedded image");

        let encoded = base64::engine::general_purpose::STANDARD.encode(&image.data);
        let data_url = format!("data:{};base64,{encoded}", image.mime_type);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: format!(
                            "Describe this image from page {} of an uploaded document. \
                             Focus on information a student would need: diagrams, labels, \
                             figures, tables. Be concise.",
                            image.page
                        ),
                    },
                    ContentPart::ImageUrl { image_url: ImageUrl { url: data_url } },
                ],
            }],
            max_tokens: 300,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(page = image.page, error = %e, "vision request failed");
                RagError::ImageDescription(format!("vision request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(page = image.page, %status, "vision API error");
            return Err(RagError::ImageDescription(format!("vision API returned {status}: {body}")));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            RagError::ImageDescription(format!("failed to parse vision response: {e}"))
        })?;

        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| {
                RagError::ImageDescription("vision API returned no choices".to_string())
            })
    }
}
