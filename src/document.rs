//! Data types for documents, chunks, and search results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an uploaded document.
///
/// `Pending → Processing → Completed | Failed`; a failed document may be
/// retried, which moves it back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    /// Stable string form used in the database `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded file and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: Uuid,
    /// The collection (e.g. a class's material set) this document belongs to.
    pub collection_id: Uuid,
    /// Display name, usually the original file name.
    pub name: String,
    /// Declared MIME type of the uploaded bytes.
    pub mime_type: String,
    /// Size of the uploaded bytes.
    pub size_bytes: i64,
    /// Opaque handle into the content store where the raw bytes live.
    pub content_url: String,
    /// Current lifecycle state.
    pub status: DocumentStatus,
    /// Error message captured verbatim when `status` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A new upload handed to the pipeline for processing.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// The collection the document belongs to.
    pub collection_id: Uuid,
    /// Display name, usually the original file name.
    pub name: String,
    /// Declared MIME type.
    pub mime_type: String,
    /// The raw file bytes.
    pub bytes: Vec<u8>,
}

/// Whether a chunk is a broad-context parent or an embeddable child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkKind {
    Parent,
    Child,
}

impl ChunkKind {
    /// Stable string form used in the database `kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parent => "PARENT",
            Self::Child => "CHILD",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PARENT" => Some(Self::Parent),
            "CHILD" => Some(Self::Child),
            _ => None,
        }
    }
}

/// Character offsets of a chunk within its document's extracted full text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpan {
    /// Absolute start offset (inclusive).
    pub start_char: usize,
    /// Absolute end offset (exclusive).
    pub end_char: usize,
}

impl ChunkSpan {
    /// Create a span from absolute offsets.
    pub fn new(start_char: usize, end_char: usize) -> Self {
        Self { start_char, end_char }
    }

    /// Length of the span in characters.
    pub fn len(&self) -> usize {
        self.end_char.saturating_sub(self.start_char)
    }

    /// Whether the span is empty.
    pub fn is_empty(&self) -> bool {
        self.end_char <= self.start_char
    }
}

/// A unit of extracted text derived from a [`Document`].
///
/// Parent chunks hold broad context and never carry an embedding; child
/// chunks are the embeddable units actually matched by search, and every
/// child's `parent_id` resolves to a parent of the same document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier for the chunk.
    pub id: Uuid,
    /// The owning document.
    pub document_id: Uuid,
    /// The owning collection, denormalized for query filtering.
    pub collection_id: Uuid,
    /// The chunk's text content.
    pub content: String,
    /// Dense vector, present only on child chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Index unique within the document, parents first then children.
    pub chunk_index: i32,
    /// Parent or child.
    pub kind: ChunkKind,
    /// The parent chunk's identifier; `None` for parents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// 1-based page number recovered from the extraction-time page map.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i32>,
    /// Section heading detected for the enclosing parent chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Whether an embedded-image description was extracted from this chunk.
    pub has_images: bool,
    /// Image description text pulled out of the content during
    /// post-processing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_desc: Option<String>,
    /// Character offsets within the document's extracted full text.
    pub span: ChunkSpan,
}

/// A retrieved child chunk hydrated with document and parent context.
///
/// Ephemeral query-time value; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchicalSearchResult {
    /// Identifier of the matched child chunk.
    pub chunk_id: Uuid,
    /// The child chunk's content.
    pub content: String,
    /// Fused (or reranked) relevance score, higher is more relevant.
    pub score: f32,
    /// The source document's identifier.
    pub document_id: Uuid,
    /// The source document's display name.
    pub document_name: String,
    /// The child chunk's index within its document.
    pub chunk_index: i32,
    /// 1-based page number, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i32>,
    /// Detected section heading, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// The parent chunk's content, hydrated at query time. `None` when the
    /// parent lookup came back empty (e.g. a dangling reference).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_content: Option<String>,
    /// Whether the chunk carried an embedded-image description.
    pub has_images: bool,
    /// The extracted image description, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_desc: Option<String>,
}
