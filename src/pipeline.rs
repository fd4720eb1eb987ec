//! Ingestion pipeline: upload, extraction, image description, hierarchical
//! chunking, embedding, and indexing, driven by a document status machine.
//!
//! [`submit`](IngestPipeline::submit) stores the raw bytes, creates a
//! `PENDING` document row, and hands processing to a detached task; every
//! processing failure lands in the document row as `FAILED` with the error
//! message captured verbatim, so no document is ever silently stuck.

use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunking::HierarchicalChunker;
use crate::config::PipelineConfig;
use crate::describe::{self, ImageDescriber, IMAGE_DESC_START};
use crate::document::{Chunk, ChunkKind, Document, DocumentStatus, NewDocument};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extract::{self, PageMap, PageText};
use crate::store::{ChunkStore, ContentStore, DocumentStore};

/// Orchestrates document ingestion end to end.
///
/// Cheap to clone; all state is behind `Arc`s so a clone can be moved into
/// the background task that does the actual processing.
///
/// # Example
///
/// ```rust,ignore
/// use docrag::{IngestPipeline, PipelineConfig};
///
/// let pipeline = IngestPipeline::builder()
///     .document_store(store.clone())
///     .chunk_store(store.clone())
///     .content_store(content)
///     .embedder(embedder)
///     .build()?;
/// let doc = pipeline.submit(upload).await?;
/// ```
#[derive(Clone)]
pub struct IngestPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    documents: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    content: Arc<dyn ContentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    describer: Option<Arc<dyn ImageDescriber>>,
    config: PipelineConfig,
}

impl IngestPipeline {
    /// Create a new builder for constructing an [`IngestPipeline`].
    pub fn builder() -> IngestPipelineBuilder {
        IngestPipelineBuilder::default()
    }

    /// Accept an upload: persist the bytes, create a `PENDING` document row,
    /// and schedule processing on a detached task.
    ///
    /// Returns immediately with the pending document; callers observe the
    /// outcome through the document's status.
    pub async fn submit(&self, upload: NewDocument) -> Result<Document> {
        let document = self.accept(upload).await?;
        self.spawn_processing(document.id);
        Ok(document)
    }

    /// Submit several uploads as one batch.
    ///
    /// Every upload is accepted (or rejected) up front; a rejected upload
    /// does not prevent the rest from being accepted. Accepted documents are
    /// then processed strictly one at a time, in submission order, on a
    /// single detached task — one file finishes (or fails) before the next
    /// begins, and a per-file failure does not stop the rest of the batch.
    pub async fn submit_batch(&self, uploads: Vec<NewDocument>) -> Vec<Result<Document>> {
        let mut outcomes = Vec::with_capacity(uploads.len());
        let mut accepted = Vec::new();
        for upload in uploads {
            match self.accept(upload).await {
                Ok(document) => {
                    accepted.push(document.id);
                    outcomes.push(Ok(document));
                }
                Err(e) => outcomes.push(Err(e)),
            }
        }

        let pipeline = self.clone();
        tokio::spawn(async move {
            for document_id in accepted {
                // process() already records each failure on its document row.
                let _ = pipeline.process(document_id).await;
            }
        });
        outcomes
    }

    /// Persist the upload and create its `PENDING` row without scheduling
    /// any processing.
    async fn accept(&self, upload: NewDocument) -> Result<Document> {
        if upload.bytes.is_empty() {
            return Err(RagError::Pipeline("uploaded file is empty".to_string()));
        }

        let id = Uuid::new_v4();
        let path = format!("{}/{}/{}", upload.collection_id, id, upload.name);
        let content_url = self.inner.content.put(&path, &upload.bytes).await?;

        let document = Document {
            id,
            collection_id: upload.collection_id,
            name: upload.name,
            mime_type: upload.mime_type,
            size_bytes: upload.bytes.len() as i64,
            content_url,
            status: DocumentStatus::Pending,
            error: None,
            created_at: Utc::now(),
        };
        self.inner.documents.create_document(&document).await?;

        info!(document_id = %id, name = %document.name, "accepted upload");
        Ok(document)
    }

    /// Re-enqueue a `FAILED` document for processing.
    ///
    /// The status moves back to `PENDING` and the stored error is cleared;
    /// any chunk rows left over from the failed attempt are replaced during
    /// reprocessing.
    pub async fn retry(&self, document_id: Uuid) -> Result<Document> {
        let document = self.get_document_required(document_id).await?;
        if document.status != DocumentStatus::Failed {
            return Err(RagError::Pipeline(format!(
                "document {document_id} is {}, only FAILED documents can be retried",
                document.status
            )));
        }

        self.inner.documents.set_status(document_id, DocumentStatus::Pending, None).await?;
        info!(%document_id, "retrying failed document");
        self.spawn_processing(document_id);

        Ok(Document { status: DocumentStatus::Pending, error: None, ..document })
    }

    /// Delete a document: its row, its chunk rows, and (best-effort) its
    /// stored bytes.
    pub async fn delete_document(&self, document_id: Uuid) -> Result<()> {
        let document = self.get_document_required(document_id).await?;

        // The index must win even if the blob lingers.
        if let Err(e) = self.inner.content.delete(&document.content_url).await {
            warn!(%document_id, error = %e, "failed to delete stored content, continuing");
        }

        self.inner.documents.delete_document(document_id).await?;
        info!(%document_id, "deleted document");
        Ok(())
    }

    /// Fetch a document's current row.
    pub async fn get_document(&self, document_id: Uuid) -> Result<Option<Document>> {
        self.inner.documents.get_document(document_id).await
    }

    /// Run the processing stages for a document, recording any failure in
    /// the document row as `FAILED` with the error message verbatim.
    ///
    /// Normally invoked from the task spawned by [`submit`](Self::submit) or
    /// [`retry`](Self::retry); public so embedders can drive processing
    /// synchronously.
    pub async fn process(&self, document_id: Uuid) -> Result<()> {
        if let Err(e) = self.run_stages(document_id).await {
            self.record_failure(document_id, &e).await;
            return Err(e);
        }

        // A failed completion write must not strand the document in
        // PROCESSING; record it as a failure like any other stage error.
        if let Err(e) =
            self.inner.documents.set_status(document_id, DocumentStatus::Completed, None).await
        {
            self.record_failure(document_id, &e).await;
            return Err(e);
        }

        info!(%document_id, "document processing completed");
        Ok(())
    }

    async fn record_failure(&self, document_id: Uuid, error: &RagError) {
        let message = error.to_string();
        error!(%document_id, error = %message, "document processing failed");
        if let Err(status_err) = self
            .inner
            .documents
            .set_status(document_id, DocumentStatus::Failed, Some(message))
            .await
        {
            error!(%document_id, error = %status_err, "failed to record failure status");
        }
    }

    fn spawn_processing(&self, document_id: Uuid) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            // process() already records the failure on the document row.
            let _ = pipeline.process(document_id).await;
        });
    }

    async fn get_document_required(&self, document_id: Uuid) -> Result<Document> {
        self.inner
            .documents
            .get_document(document_id)
            .await?
            .ok_or_else(|| RagError::Pipeline(format!("unknown document {document_id}")))
    }

    async fn run_stages(&self, document_id: Uuid) -> Result<()> {
        let document = self.get_document_required(document_id).await?;

        // Clear any rows left by a previous attempt before re-indexing.
        self.inner.chunks.delete_document_chunks(document_id).await?;
        self.inner.documents.set_status(document_id, DocumentStatus::Processing, None).await?;

        let bytes = self.inner.content.get(&document.content_url).await?;

        let mime_type = document.mime_type.clone();
        let mut extraction =
            tokio::task::spawn_blocking(move || extract::extract(&bytes, &mime_type))
                .await
                .map_err(|e| RagError::Pipeline(format!("extraction task failed: {e}")))??;

        if let Some(describer) = &self.inner.describer {
            if !extraction.images.is_empty() {
                self.describe_images(describer, &extraction.images, &mut extraction.pages)
                    .await?;
            }
        }

        let (full_text, page_map) = extract::assemble(&extraction.pages);
        let chunks = self.build_chunks(&document, &full_text, &page_map).await?;

        self.inner.chunks.insert_chunks(document_id, &chunks).await?;
        debug!(%document_id, chunks = chunks.len(), "indexed document chunks");
        Ok(())
    }

    /// Describe every embedded image and fuse each description into its
    /// page's text. Fail-fast: one failed vision call fails the document,
    /// so the index never holds a partially annotated chunk set.
    async fn describe_images(
        &self,
        describer: &Arc<dyn ImageDescriber>,
        images: &[extract::PdfImage],
        pages: &mut [PageText],
    ) -> Result<()> {
        debug!(count = images.len(), "describing embedded images");
        let descriptions =
            try_join_all(images.iter().map(|image| describer.describe(image))).await?;

        for (image, description) in images.iter().zip(descriptions) {
            let page = match pages.iter().position(|p| p.number == Some(image.page)) {
                Some(i) => pages.get_mut(i),
                None => pages.last_mut(),
            };
            if let Some(page) = page {
                describe::fuse_description(&mut page.text, &description);
            }
        }
        Ok(())
    }

    /// Chunk the full text and shape the persistent rows: parents first
    /// (indexes `0..P`), then children (indexes `P..`), with embeddings on
    /// children only and image annotations pulled out of child content.
    async fn build_chunks(
        &self,
        document: &Document,
        full_text: &str,
        page_map: &PageMap,
    ) -> Result<Vec<Chunk>> {
        let chunker =
            HierarchicalChunker::new(self.inner.config.parent_size, self.inner.config.child_size);
        let parents = chunker.chunk_parents(full_text)?;
        let children = chunker.chunk_children(&parents);

        let parent_ids: Vec<Uuid> = parents.iter().map(|_| Uuid::new_v4()).collect();
        let mut rows = Vec::with_capacity(parents.len() + children.len());

        for parent in &parents {
            rows.push(Chunk {
                id: parent_ids[parent.index],
                document_id: document.id,
                collection_id: document.collection_id,
                content: parent.content.clone(),
                embedding: None,
                chunk_index: parent.index as i32,
                kind: ChunkKind::Parent,
                parent_id: None,
                page: page_map.page_for_offset(parent.span.start_char),
                section: parent.section.clone(),
                has_images: parent.content.contains(IMAGE_DESC_START),
                image_desc: None,
                span: parent.span,
            });
        }

        let mut child_rows = Vec::with_capacity(children.len());
        for child in &children {
            let (clean, image_desc) = describe::split_image_annotations(&child.content);
            if clean.trim().is_empty() && image_desc.is_none() {
                continue;
            }
            // A chunk that was nothing but an annotation keeps the
            // description as its searchable content.
            let content = if clean.trim().is_empty() {
                image_desc.clone().unwrap_or_default()
            } else {
                clean
            };
            child_rows.push(Chunk {
                id: Uuid::new_v4(),
                document_id: document.id,
                collection_id: document.collection_id,
                content,
                embedding: None,
                chunk_index: (parents.len() + child.chunk_index) as i32,
                kind: ChunkKind::Child,
                parent_id: Some(parent_ids[child.parent_index]),
                page: page_map.page_for_offset(child.span.start_char),
                section: parents[child.parent_index].section.clone(),
                has_images: image_desc.is_some(),
                image_desc,
                span: child.span,
            });
        }

        // One all-or-nothing batch call; the provider does its own
        // sub-batching and pacing.
        let texts: Vec<&str> = child_rows.iter().map(|c| c.content.as_str()).collect();
        let embeddings = self.inner.embedder.embed_batch(&texts).await?;
        drop(texts);
        for (row, embedding) in child_rows.iter_mut().zip(embeddings) {
            row.embedding = Some(embedding);
        }

        rows.extend(child_rows);
        Ok(rows)
    }
}

/// Builder for constructing an [`IngestPipeline`].
#[derive(Default)]
pub struct IngestPipelineBuilder {
    documents: Option<Arc<dyn DocumentStore>>,
    chunks: Option<Arc<dyn ChunkStore>>,
    content: Option<Arc<dyn ContentStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    describer: Option<Arc<dyn ImageDescriber>>,
    config: Option<PipelineConfig>,
}

impl IngestPipelineBuilder {
    /// Set the document lifecycle store (required).
    pub fn document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(store);
        self
    }

    /// Set the chunk store (required).
    pub fn chunk_store(mut self, store: Arc<dyn ChunkStore>) -> Self {
        self.chunks = Some(store);
        self
    }

    /// Set the raw content store (required).
    pub fn content_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.content = Some(store);
        self
    }

    /// Set the embedding provider (required).
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Attach a vision describer for embedded PDF images (optional; without
    /// one, images are ignored).
    pub fn describer(mut self, describer: Arc<dyn ImageDescriber>) -> Self {
        self.describer = Some(describer);
        self
    }

    /// Override the default [`PipelineConfig`].
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] when a required component is missing.
    pub fn build(self) -> Result<IngestPipeline> {
        let missing =
            |what: &str| RagError::Config(format!("pipeline requires a {what}"));
        Ok(IngestPipeline {
            inner: Arc::new(PipelineInner {
                documents: self.documents.ok_or_else(|| missing("document store"))?,
                chunks: self.chunks.ok_or_else(|| missing("chunk store"))?,
                content: self.content.ok_or_else(|| missing("content store"))?,
                embedder: self.embedder.ok_or_else(|| missing("embedding provider"))?,
                describer: self.describer,
                config: self.config.unwrap_or_default(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::describe::IMAGE_DESC_END;
    use crate::extract::PdfImage;
    use crate::inmemory::{InMemoryContentStore, InMemoryStore};

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    struct PageEchoDescriber;

    #[async_trait]
    impl ImageDescriber for PageEchoDescriber {
        async fn describe(&self, image: &PdfImage) -> Result<String> {
            Ok(format!("figure on page {}", image.page))
        }
    }

    struct BrokenDescriber;

    #[async_trait]
    impl ImageDescriber for BrokenDescriber {
        async fn describe(&self, _image: &PdfImage) -> Result<String> {
            Err(RagError::ImageDescription("vision quota exhausted".to_string()))
        }
    }

    fn test_pipeline() -> IngestPipeline {
        let store = Arc::new(InMemoryStore::new());
        IngestPipeline::builder()
            .document_store(store.clone())
            .chunk_store(store)
            .content_store(Arc::new(InMemoryContentStore::new()))
            .embedder(Arc::new(StubEmbedder))
            .config(PipelineConfig::builder().parent_size(300).child_size(80).build().unwrap())
            .build()
            .unwrap()
    }

    fn doc() -> Document {
        Document {
            id: Uuid::new_v4(),
            collection_id: Uuid::new_v4(),
            name: "notes.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 1,
            content_url: "mem://x".to_string(),
            status: DocumentStatus::Pending,
            error: None,
            created_at: Utc::now(),
        }
    }

    fn jpeg(page: i32) -> PdfImage {
        PdfImage { data: vec![0xff, 0xd8], mime_type: "image/jpeg".to_string(), page }
    }

    #[tokio::test]
    async fn descriptions_fuse_into_their_pages() {
        let pipeline = test_pipeline();
        let describer: Arc<dyn ImageDescriber> = Arc::new(PageEchoDescriber);
        let mut pages = vec![
            PageText { number: Some(1), text: "First page.".to_string() },
            PageText { number: Some(2), text: "Second page.".to_string() },
        ];

        pipeline
            .describe_images(&describer, &[jpeg(2), jpeg(9)], &mut pages)
            .await
            .unwrap();

        assert_eq!(pages[0].text, "First page.");
        assert!(pages[1].text.contains("[IMG]figure on page 2[/IMG]"));
        // An image whose page is unknown lands on the last page.
        assert!(pages[1].text.contains("figure on page 9"));
    }

    #[tokio::test]
    async fn one_failed_description_aborts_them_all() {
        let pipeline = test_pipeline();
        let describer: Arc<dyn ImageDescriber> = Arc::new(BrokenDescriber);
        let mut pages = vec![PageText { number: Some(1), text: "Page one.".to_string() }];

        let err = pipeline
            .describe_images(&describer, &[jpeg(1), jpeg(1)], &mut pages)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ImageDescription(_)));
        // Nothing was fused on the failure path.
        assert_eq!(pages[0].text, "Page one.");
    }

    #[tokio::test]
    async fn annotations_become_structured_fields_on_children() {
        let pipeline = test_pipeline();
        let document = doc();

        let mut text = "Photosynthesis Overview\nChlorophyll absorbs light in the chloroplast."
            .to_string();
        describe::fuse_description(&mut text, "Diagram of a chloroplast");

        let rows = pipeline.build_chunks(&document, &text, &PageMap::default()).await.unwrap();

        let children: Vec<_> = rows.iter().filter(|c| c.kind == ChunkKind::Child).collect();
        assert!(!children.is_empty());
        for child in &children {
            assert!(!child.content.contains(IMAGE_DESC_START));
            assert!(!child.content.contains(IMAGE_DESC_END));
            assert!(child.embedding.is_some());
        }

        let annotated: Vec<_> = children.iter().filter(|c| c.has_images).collect();
        assert_eq!(annotated.len(), 1);
        assert_eq!(annotated[0].image_desc.as_deref(), Some("Diagram of a chloroplast"));

        // Parents keep the inline annotation for answer-time context.
        let parents: Vec<_> = rows.iter().filter(|c| c.kind == ChunkKind::Parent).collect();
        assert!(parents.iter().any(|p| p.has_images && p.content.contains(IMAGE_DESC_START)));
    }

    #[tokio::test]
    async fn oversized_annotation_round_trips_through_chunking() {
        let pipeline = test_pipeline();
        let document = doc();

        // Longer than the 80-char child size, so a naive window cut would
        // tear the sentinel pair apart.
        let description = "A detailed diagram of a chloroplast showing the thylakoid \
                           membranes, the stroma, and the sites of the light reactions";
        let mut text = "Photosynthesis converts light energy into chemical energy stored \
                        in glucose molecules."
            .to_string();
        describe::fuse_description(&mut text, description);

        let rows = pipeline.build_chunks(&document, &text, &PageMap::default()).await.unwrap();

        let children: Vec<_> = rows.iter().filter(|c| c.kind == ChunkKind::Child).collect();
        for child in &children {
            assert!(!child.content.contains(IMAGE_DESC_START), "leak in {:?}", child.content);
            assert!(!child.content.contains(IMAGE_DESC_END), "leak in {:?}", child.content);
        }
        let annotated: Vec<_> = children.iter().filter(|c| c.has_images).collect();
        assert_eq!(annotated.len(), 1);
        assert_eq!(annotated[0].image_desc.as_deref(), Some(description));
    }

    struct CompletionRejectingStore {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl DocumentStore for CompletionRejectingStore {
        async fn create_document(&self, document: &Document) -> Result<()> {
            self.inner.create_document(document).await
        }

        async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
            self.inner.get_document(id).await
        }

        async fn set_status(
            &self,
            id: Uuid,
            status: DocumentStatus,
            error: Option<String>,
        ) -> Result<()> {
            if status == DocumentStatus::Completed {
                return Err(RagError::Storage("status write refused".to_string()));
            }
            self.inner.set_status(id, status, error).await
        }

        async fn delete_document(&self, id: Uuid) -> Result<()> {
            self.inner.delete_document(id).await
        }
    }

    #[tokio::test]
    async fn failed_completion_write_is_recorded_as_failure() {
        let documents = Arc::new(CompletionRejectingStore { inner: InMemoryStore::new() });
        let content = Arc::new(InMemoryContentStore::new());
        let pipeline = IngestPipeline::builder()
            .document_store(documents.clone())
            .chunk_store(Arc::new(InMemoryStore::new()))
            .content_store(content.clone())
            .embedder(Arc::new(StubEmbedder))
            .build()
            .unwrap();

        let url = content.put("c/notes.txt", b"Plain text to process.").await.unwrap();
        let document = Document {
            name: "notes.txt".to_string(),
            mime_type: "text/plain".to_string(),
            content_url: url,
            ..doc()
        };
        documents.create_document(&document).await.unwrap();

        let err = pipeline.process(document.id).await.unwrap_err();
        assert!(matches!(err, RagError::Storage(_)));

        // The document must not be stranded in PROCESSING.
        let row = documents.get_document(document.id).await.unwrap().unwrap();
        assert_eq!(row.status, DocumentStatus::Failed);
        assert!(row.error.unwrap().contains("status write refused"));
    }
}
