//! In-memory [`DocumentStore`] for tests.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::RagError;
use crate::models::{Document, StatusUpdate};

use super::DocumentStore;

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<String, (Document, Vec<u8>)>>,
    history: RwLock<Vec<(String, StatusUpdate)>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status update applied so far, in order.
    pub fn history(&self) -> Vec<(String, StatusUpdate)> {
        read(&self.history).clone()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn put(&self, document: &Document, bytes: &[u8]) -> Result<(), RagError> {
        write(&self.docs).insert(document.id.clone(), (document.clone(), bytes.to_vec()));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>, RagError> {
        read(&self.docs)
            .get(id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| RagError::NotFound(format!("document {id}")))
    }

    async fn document(&self, id: &str) -> Result<Document, RagError> {
        read(&self.docs)
            .get(id)
            .map(|(doc, _)| doc.clone())
            .ok_or_else(|| RagError::NotFound(format!("document {id}")))
    }

    async fn put_status(&self, id: &str, update: &StatusUpdate) -> Result<Document, RagError> {
        let mut docs = write(&self.docs);
        let (doc, _) = docs
            .get_mut(id)
            .ok_or_else(|| RagError::NotFound(format!("document {id}")))?;
        doc.apply(update)?;
        write(&self.history).push((id.to_string(), update.clone()));
        Ok(doc.clone())
    }
}
