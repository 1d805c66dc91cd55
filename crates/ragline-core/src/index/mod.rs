//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait covers everything the pipelines need from a
//! k-NN capable document store: idempotent index creation, bulk upsert,
//! similarity search, and per-document housekeeping.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`ensure_index`](VectorIndex::ensure_index) | Create the index if absent, verify its dimension if present |
//! | [`upsert_chunks`](VectorIndex::upsert_chunks) | Write embedded chunks in one batched call |
//! | [`search`](VectorIndex::search) | Top-k sources by descending score |
//! | [`delete_document`](VectorIndex::delete_document) | Remove every chunk of a document |
//! | [`count_chunks`](VectorIndex::count_chunks) | Number of indexed chunks for a document |

pub mod memory;

use async_trait::async_trait;

use crate::error::RagError;
use crate::models::{Chunk, Source, VectorSpec};

/// What [`VectorIndex::ensure_index`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyExists,
}

/// Result of a bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Chunks the index acknowledged.
    pub written: usize,
    /// Chunks skipped because they carried no vector.
    pub skipped: usize,
    /// Chunks the index rejected individually.
    pub failed: usize,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the index with the given dimension and metric if it does not
    /// exist. An existing index with another dimension is a
    /// [`RagError::DimensionMismatch`], one with another metric a
    /// [`RagError::MetricMismatch`]; no write happens in either case.
    async fn ensure_index(&self, spec: &VectorSpec) -> Result<EnsureOutcome, RagError>;

    /// Write chunks, skipping (and logging) those without an embedding.
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<UpsertReport, RagError>;

    /// At most `k` sources sorted by descending score.
    ///
    /// Fails with [`RagError::DimensionMismatch`] when `query` does not
    /// have the index dimension, and [`RagError::SearchUnavailable`] when
    /// the backend cannot be reached.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Source>, RagError>;

    /// Returns the number of chunks removed.
    async fn delete_document(&self, document_id: &str) -> Result<u64, RagError>;

    async fn count_chunks(&self, document_id: &str) -> Result<u64, RagError>;
}

/// Sort sources by descending score and keep the first `k`.
pub fn rank_sources(mut sources: Vec<Source>, k: usize) -> Vec<Source> {
    sources.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sources.truncate(k);
    sources
}
