//! Ingestion pipeline orchestration.
//!
//! Runs one uploaded document through the full flow:
//! store → extraction → chunking → embedding → index, and records the
//! outcome on the document:
//!
//! ```text
//! uploaded ──▶ processing ──▶ completed   (more than half the chunks indexed)
//!                        └──▶ failed      (any stage error, or a minority indexed)
//! ```
//!
//! Any chunks from an earlier attempt are deleted before the new ones are
//! written. The whole run is bounded by one [`Deadline`].

use std::sync::Arc;
use std::time::Duration;

use ragline_core::chunk::build_chunks;
use ragline_core::index::VectorIndex;
use ragline_core::models::{Document, StatusUpdate};
use ragline_core::store::DocumentStore;
use ragline_core::RagError;

use crate::embedding::EmbeddingClient;
use crate::extract::TextExtractor;
use crate::resilience::Deadline;

pub struct IngestionPipeline {
    store: Arc<dyn DocumentStore>,
    extractor: TextExtractor,
    embedder: Arc<EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    max_chunk_size: i64,
    deadline: Duration,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        extractor: TextExtractor,
        embedder: Arc<EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        max_chunk_size: i64,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            extractor,
            embedder,
            index,
            max_chunk_size,
            deadline,
        }
    }

    /// Ingest one document and return its final record.
    ///
    /// Stage failures do not surface as `Err`: they end up as a `failed`
    /// status with a short message. `Err` means the document could not be
    /// loaded or its status could not be written.
    pub async fn run(&self, document_id: &str) -> Result<Document, RagError> {
        let document = self.store.document(document_id).await?;
        if document.status.is_terminal() {
            return Err(RagError::InvalidInput(format!(
                "document {} is already {}",
                document.id, document.status
            )));
        }

        self.store
            .put_status(document_id, &StatusUpdate::processing())
            .await?;
        tracing::info!(
            document_id,
            file_name = %document.file_name,
            media_type = %document.media_type,
            "ingestion started"
        );

        let mut total = 0usize;
        let deadline = Deadline::after(self.deadline);
        let outcome = deadline.run(self.process(&document, &mut total)).await;
        let update = match outcome {
            Ok(update) => update,
            Err(e) => {
                tracing::error!(document_id, error = %e, "ingestion failed");
                StatusUpdate::failed(total, 0, e.status_message())
            }
        };

        let document = self.store.put_status(document_id, &update).await?;
        tracing::info!(
            document_id,
            status = %document.status,
            total_chunks = document.total_chunks,
            chunks_with_embeddings = document.chunks_with_embeddings,
            "ingestion finished"
        );
        Ok(document)
    }

    async fn process(&self, document: &Document, total: &mut usize) -> Result<StatusUpdate, RagError> {
        let bytes = self.store.get(&document.id).await?;
        let extracted = self.extractor.extract(&bytes, &document.media_type)?;
        tracing::debug!(
            document_id = %document.id,
            words = extracted.word_count,
            chars = extracted.char_count,
            "text extracted"
        );

        let mut chunks = build_chunks(document, &extracted.text, self.max_chunk_size);
        *total = chunks.len();
        if chunks.is_empty() {
            return Ok(StatusUpdate::failed(
                0,
                0,
                "document contains no extractable text".to_string(),
            ));
        }

        let vectors = self.embedder.embed_batch(&chunks).await?;
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
        }

        self.index.ensure_index(self.embedder.spec()).await?;
        let removed = self.index.delete_document(&document.id).await?;
        if removed > 0 {
            tracing::info!(document_id = %document.id, removed, "removed chunks from earlier run");
        }

        let report = self.index.upsert_chunks(&chunks).await?;
        Ok(majority_outcome(chunks.len(), report.written))
    }
}

/// `completed` when strictly more than half of the chunks were indexed.
pub fn majority_outcome(total: usize, written: usize) -> StatusUpdate {
    if written * 2 > total {
        StatusUpdate::completed(total, written)
    } else {
        StatusUpdate::failed(
            total,
            written,
            format!("only {written} of {total} chunks were indexed"),
        )
    }
}
