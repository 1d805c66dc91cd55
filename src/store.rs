//! Filesystem-backed document store.
//!
//! Each document is two files under the store root:
//!
//! ```text
//! <root>/<id>.bin    raw uploaded bytes
//! <root>/<id>.json   Document record (status, counts, timestamps)
//! ```
//!
//! Record updates are written to a temporary file and renamed into place,
//! and serialized through a single lock so concurrent status writes cannot
//! interleave.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ragline_core::models::{Document, StatusUpdate};
use ragline_core::store::DocumentStore;
use ragline_core::RagError;
use tokio::sync::Mutex;

use crate::extract::detect_media_type;

pub struct FsDocumentStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a local file as a new document and return its record.
    pub async fn upload(&self, path: &Path) -> Result<Document> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid file name: {}", path.display()))?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if bytes.is_empty() {
            bail!("{} is empty", path.display());
        }

        let document = Document::new(file_name, detect_media_type(file_name), bytes.len() as u64);
        self.put(&document, &bytes).await?;
        tracing::info!(
            document_id = %document.id,
            file_name,
            media_type = %document.media_type,
            "uploaded document"
        );
        Ok(document)
    }

    fn paths(&self, id: &str) -> Result<(PathBuf, PathBuf), RagError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RagError::InvalidInput(format!("invalid document id: {id:?}")));
        }
        Ok((
            self.root.join(format!("{id}.bin")),
            self.root.join(format!("{id}.json")),
        ))
    }

    async fn write_record(&self, path: &Path, document: &Document) -> Result<(), RagError> {
        let json = serde_json::to_vec_pretty(document)
            .map_err(|e| RagError::Storage(format!("serialize {}: {}", document.id, e)))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn read_record(&self, id: &str, path: &Path) -> Result<Document, RagError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RagError::NotFound(format!("document {id}")))
            }
            Err(e) => return Err(io_error(path, e)),
        };
        let mut document: Document = serde_json::from_slice(&bytes)
            .map_err(|e| RagError::Storage(format!("corrupt record {}: {}", path.display(), e)))?;
        if document.media_type.is_empty() {
            document.media_type = detect_media_type(&document.file_name).to_string();
        }
        Ok(document)
    }
}

fn io_error(path: &Path, err: std::io::Error) -> RagError {
    RagError::Storage(format!("{}: {}", path.display(), err))
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn put(&self, document: &Document, bytes: &[u8]) -> Result<(), RagError> {
        let (bin, json) = self.paths(&document.id)?;
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;
        tokio::fs::write(&bin, bytes)
            .await
            .map_err(|e| io_error(&bin, e))?;
        self.write_record(&json, document).await
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>, RagError> {
        let (bin, _) = self.paths(id)?;
        match tokio::fs::read(&bin).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RagError::NotFound(format!("document {id}")))
            }
            Err(e) => Err(io_error(&bin, e)),
        }
    }

    async fn document(&self, id: &str) -> Result<Document, RagError> {
        let (_, json) = self.paths(id)?;
        self.read_record(id, &json).await
    }

    async fn put_status(&self, id: &str, update: &StatusUpdate) -> Result<Document, RagError> {
        let (_, json) = self.paths(id)?;
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_record(id, &json).await?;
        document.apply(update)?;
        self.write_record(&json, &document).await?;
        tracing::debug!(document_id = id, status = %document.status, "status updated");
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragline_core::models::DocumentStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_and_status_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("notes.md");
        std::fs::write(&file, "# Notes\n\nHello.").unwrap();

        let store = FsDocumentStore::new(tmp.path().join("store"));
        let doc = store.upload(&file).await.unwrap();
        assert_eq!(doc.media_type, "text/markdown");
        assert_eq!(doc.status, DocumentStatus::Uploaded);
        assert_eq!(store.get(&doc.id).await.unwrap(), b"# Notes\n\nHello.");

        store
            .put_status(&doc.id, &StatusUpdate::processing())
            .await
            .unwrap();
        store
            .put_status(&doc.id, &StatusUpdate::completed(3, 2))
            .await
            .unwrap();

        let reopened = FsDocumentStore::new(tmp.path().join("store"));
        let stored = reopened.document(&doc.id).await.unwrap();
        assert_eq!(stored.status, DocumentStatus::Completed);
        assert_eq!(stored.total_chunks, 3);
        assert_eq!(stored.chunks_with_embeddings, 2);
        assert!(stored.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_status_is_not_overwritten() {
        let tmp = TempDir::new().unwrap();
        let store = FsDocumentStore::new(tmp.path());
        let doc = Document::new("a.txt", "text/plain", 1);
        store.put(&doc, b"a").await.unwrap();
        store
            .put_status(&doc.id, &StatusUpdate::failed(0, 0, "boom".into()))
            .await
            .unwrap();

        let err = store
            .put_status(&doc.id, &StatusUpdate::completed(1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
        let stored = store.document(&doc.id).await.unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_unknown_and_invalid_ids() {
        let tmp = TempDir::new().unwrap();
        let store = FsDocumentStore::new(tmp.path());
        assert!(matches!(
            store.get("missing").await,
            Err(RagError::NotFound(_))
        ));
        assert!(matches!(
            store.document("../etc/passwd").await,
            Err(RagError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("empty.txt");
        std::fs::write(&file, "").unwrap();
        let store = FsDocumentStore::new(tmp.path().join("store"));
        assert!(store.upload(&file).await.is_err());
    }
}
