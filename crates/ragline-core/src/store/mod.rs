//! Object and metadata store abstraction.
//!
//! Documents are uploaded by something outside the pipeline; ingestion
//! reads their bytes and writes their status through [`DocumentStore`].

pub mod memory;

use async_trait::async_trait;

use crate::error::RagError;
use crate::models::{Document, StatusUpdate};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Register a newly uploaded document and its raw bytes.
    async fn put(&self, document: &Document, bytes: &[u8]) -> Result<(), RagError>;

    /// Raw bytes of a document. [`RagError::NotFound`] if unknown.
    async fn get(&self, id: &str) -> Result<Vec<u8>, RagError>;

    /// The document record, including its current status.
    async fn document(&self, id: &str) -> Result<Document, RagError>;

    /// Apply a status transition. Terminal documents reject further updates.
    async fn put_status(&self, id: &str, update: &StatusUpdate) -> Result<Document, RagError>;
}
