//! Core data models that flow through the ingestion and query pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RagError;

/// Lifecycle of an uploaded document.
///
/// `Uploaded → Processing → Completed | Failed`. The two terminal states
/// are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded document and its processing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub file_name: String,
    pub media_type: String,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub total_chunks: usize,
    #[serde(default)]
    pub chunks_with_embeddings: usize,
}

impl Document {
    /// Create a freshly uploaded document with a random id.
    pub fn new(file_name: &str, media_type: &str, size_bytes: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            media_type: media_type.to_string(),
            size_bytes,
            status: DocumentStatus::Uploaded,
            uploaded_at: Utc::now(),
            processed_at: None,
            error_message: None,
            total_chunks: 0,
            chunks_with_embeddings: 0,
        }
    }

    /// Apply a status update, refusing to touch a document that already
    /// reached a terminal state.
    pub fn apply(&mut self, update: &StatusUpdate) -> Result<(), RagError> {
        if self.status.is_terminal() {
            return Err(RagError::InvalidInput(format!(
                "document {} is already {}",
                self.id, self.status
            )));
        }
        self.status = update.status;
        self.total_chunks = update.total_chunks;
        self.chunks_with_embeddings = update.chunks_with_embeddings;
        self.error_message = update.error_message.clone();
        if update.status.is_terminal() {
            self.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            document_id: self.id.clone(),
            file_name: self.file_name.clone(),
            status: self.status,
            uploaded_at: self.uploaded_at,
            processed_at: self.processed_at,
            total_chunks: self.total_chunks,
            chunks_with_embeddings: self.chunks_with_embeddings,
            error_message: self.error_message.clone(),
        }
    }
}

/// A status transition written by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: DocumentStatus,
    pub total_chunks: usize,
    pub chunks_with_embeddings: usize,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn processing() -> Self {
        Self {
            status: DocumentStatus::Processing,
            total_chunks: 0,
            chunks_with_embeddings: 0,
            error_message: None,
        }
    }

    pub fn completed(total_chunks: usize, chunks_with_embeddings: usize) -> Self {
        Self {
            status: DocumentStatus::Completed,
            total_chunks,
            chunks_with_embeddings,
            error_message: None,
        }
    }

    pub fn failed(total_chunks: usize, chunks_with_embeddings: usize, message: String) -> Self {
        Self {
            status: DocumentStatus::Failed,
            total_chunks,
            chunks_with_embeddings,
            error_message: Some(message),
        }
    }
}

/// Processing summary of a document, as printed by `ragline status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub document_id: String,
    pub file_name: String,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub total_chunks: usize,
    pub chunks_with_embeddings: usize,
    pub error_message: Option<String>,
}

/// Per-chunk metadata stored alongside the vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_name: String,
    pub file_type: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub word_count: usize,
    pub char_count: usize,
}

/// A contiguous slice of a document's extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// `<document_id>_chunk_<ordinal>`, unique within the document.
    pub id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub content: String,
    /// SHA-256 of `content`, hex encoded.
    pub hash: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: ChunkMetadata,
}

/// A retrieved chunk, as returned by vector search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub document_id: String,
    pub chunk_id: String,
    pub content: String,
    /// Provider-native similarity; higher is more relevant.
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Similarity metric configured on the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    Cosine,
    L2,
    InnerProduct,
}

impl SimilarityMetric {
    /// OpenSearch k-NN `space_type` for this metric.
    pub fn space_type(self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosinesimil",
            SimilarityMetric::L2 => "l2",
            SimilarityMetric::InnerProduct => "innerproduct",
        }
    }

    pub fn from_space_type(s: &str) -> Option<Self> {
        match s {
            "cosinesimil" => Some(SimilarityMetric::Cosine),
            "l2" => Some(SimilarityMetric::L2),
            "innerproduct" => Some(SimilarityMetric::InnerProduct),
            _ => None,
        }
    }
}

/// Dimensionality and metric shared by the embedder and the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorSpec {
    pub dimension: usize,
    pub metric: SimilarityMetric,
}

impl VectorSpec {
    /// Check that a vector has the configured length.
    pub fn check(&self, vector: &[f32]) -> Result<(), RagError> {
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Check that an existing index was built for this spec.
    ///
    /// `space_type` is the index's k-NN space type, `None` when the index
    /// does not report one.
    pub fn check_index(&self, dimension: usize, space_type: Option<&str>) -> Result<(), RagError> {
        if dimension != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: dimension,
            });
        }
        match space_type {
            Some(actual) if actual != self.metric.space_type() => Err(RagError::MetricMismatch {
                expected: self.metric.space_type().to_string(),
                actual: actual.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Answer returned by the query pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    /// RFC 3339 timestamp of when the answer was produced.
    pub query_time: String,
}
