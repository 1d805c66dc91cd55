//! In-memory [`VectorIndex`] used by tests and local dry runs.
//!
//! Brute-force scoring over every stored vector. Each mutating call bumps a
//! write counter so tests can assert that idempotent operations stay
//! read-only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::RagError;
use crate::models::{Chunk, Source, VectorSpec};
use crate::vector;

use super::{rank_sources, EnsureOutcome, UpsertReport, VectorIndex};

#[derive(Debug, Clone)]
struct StoredChunk {
    chunk_id: String,
    document_id: String,
    content: String,
    vector: Vec<f32>,
    metadata: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct InMemoryIndex {
    spec: RwLock<Option<VectorSpec>>,
    chunks: RwLock<Vec<StoredChunk>>,
    writes: AtomicUsize,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of write operations performed so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        read(&self.chunks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spec(&self) -> Result<VectorSpec, RagError> {
        let spec = *read(&self.spec);
        spec.ok_or_else(|| RagError::SearchUnavailable("index does not exist".to_string()))
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn ensure_index(&self, spec: &VectorSpec) -> Result<EnsureOutcome, RagError> {
        let mut current = write(&self.spec);
        match *current {
            Some(existing) => {
                spec.check_index(existing.dimension, Some(existing.metric.space_type()))?;
                Ok(EnsureOutcome::AlreadyExists)
            }
            None => {
                *current = Some(*spec);
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(EnsureOutcome::Created)
            }
        }
    }

    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<UpsertReport, RagError> {
        let spec = self.spec()?;
        let mut report = UpsertReport::default();
        let mut stored = write(&self.chunks);

        for chunk in chunks {
            let Some(vector) = &chunk.embedding else {
                tracing::warn!(chunk_id = %chunk.id, "skipping chunk without embedding");
                report.skipped += 1;
                continue;
            };
            if spec.check(vector).is_err() {
                report.failed += 1;
                continue;
            }
            stored.retain(|sc| sc.chunk_id != chunk.id);
            stored.push(StoredChunk {
                chunk_id: chunk.id.clone(),
                document_id: chunk.document_id.clone(),
                content: chunk.content.clone(),
                vector: vector.clone(),
                metadata: serde_json::to_value(&chunk.metadata).unwrap_or_default(),
            });
            report.written += 1;
        }

        if report.written > 0 {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(report)
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Source>, RagError> {
        let spec = self.spec()?;
        spec.check(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let stored = read(&self.chunks);
        let sources = stored
            .iter()
            .map(|sc| Source {
                document_id: sc.document_id.clone(),
                chunk_id: sc.chunk_id.clone(),
                content: sc.content.clone(),
                score: vector::score(spec.metric, query, &sc.vector),
                metadata: Some(sc.metadata.clone()),
            })
            .collect();
        Ok(rank_sources(sources, k))
    }

    async fn delete_document(&self, document_id: &str) -> Result<u64, RagError> {
        let mut stored = write(&self.chunks);
        let before = stored.len();
        stored.retain(|sc| sc.document_id != document_id);
        let removed = (before - stored.len()) as u64;
        if removed > 0 {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn count_chunks(&self, document_id: &str) -> Result<u64, RagError> {
        let stored = read(&self.chunks);
        Ok(stored.iter().filter(|sc| sc.document_id == document_id).count() as u64)
    }
}
