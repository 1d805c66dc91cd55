//! OpenSearch-compatible k-NN index client.
//!
//! Implements [`VectorIndex`] over the document-store REST API:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | exists | `HEAD /{index}` |
//! | existing dimension | `GET /{index}/_mapping` |
//! | create | `PUT /{index}` with settings + mapping |
//! | upsert | `POST /_bulk` (NDJSON, one `index` action per chunk) |
//! | search | `POST /{index}/_search` with a `knn` query |
//! | delete | `POST /{index}/_delete_by_query` |
//! | count | `POST /{index}/_count` |
//!
//! The vector dimension and similarity metric are fixed when the index is
//! created. Requests can be SigV4-signed (`es` service) for managed
//! domains.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use ragline_core::index::{rank_sources, EnsureOutcome, UpsertReport, VectorIndex};
use ragline_core::models::{Chunk, Source, VectorSpec};
use ragline_core::RagError;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::IndexConfig;
use crate::sigv4::SigV4Signer;

/// HNSW and naming parameters of the index.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    pub name: String,
    pub vector_field: String,
    pub engine: String,
    pub m: u32,
    pub ef_construction: u32,
    pub ef_search: u32,
}

impl IndexLayout {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            name: config.name.clone(),
            vector_field: config.vector_field.clone(),
            engine: config.engine.clone(),
            m: config.m,
            ef_construction: config.ef_construction,
            ef_search: config.ef_search,
        }
    }
}

pub struct OpenSearchIndex {
    http: reqwest::Client,
    base_url: String,
    layout: IndexLayout,
    spec: VectorSpec,
    signer: Option<SigV4Signer>,
}

impl OpenSearchIndex {
    pub fn new(
        base_url: &str,
        layout: IndexLayout,
        spec: VectorSpec,
        timeout: Duration,
        signer: Option<SigV4Signer>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            layout,
            spec,
            signer,
        })
    }

    /// Send one request; `Err` carries a transport-level description.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<(Vec<u8>, &'static str)>,
    ) -> std::result::Result<(StatusCode, String), String> {
        let raw = format!("{}{}", self.base_url, path);
        let url = Url::parse(&raw).map_err(|e| format!("invalid URL {}: {}", raw, e))?;
        let payload = body.as_ref().map(|(b, _)| b.as_slice()).unwrap_or_default();

        let mut req = self.http.request(method.clone(), url.clone());
        if let Some(signer) = &self.signer {
            let headers = signer
                .sign(method.as_str(), &url, payload, Utc::now())
                .map_err(|e| e.to_string())?;
            for (name, value) in headers {
                req = req.header(name, value);
            }
        }
        if let Some((bytes, content_type)) = body {
            req = req.header("content-type", content_type).body(bytes);
        }

        let response = req
            .send()
            .await
            .map_err(|e| format!("{} {} failed: {}", method, path, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| format!("{} {} body read failed: {}", method, path, e))?;
        Ok((status, text))
    }

    async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: &Value,
    ) -> std::result::Result<(StatusCode, String), String> {
        let bytes = serde_json::to_vec(body).map_err(|e| e.to_string())?;
        self.send(method, path, Some((bytes, "application/json")))
            .await
    }

    async fn existing_vector_field(&self) -> Result<Option<VectorField>, RagError> {
        let path = format!("/{}/_mapping", self.layout.name);
        let (status, text) = self
            .send(Method::GET, &path, None)
            .await
            .map_err(RagError::Storage)?;
        if !status.is_success() {
            return Err(http_error(RagError::Storage, status, &text));
        }
        let mapping: Value = serde_json::from_str(&text)
            .map_err(|e| RagError::Storage(format!("invalid mapping response: {}", e)))?;
        Ok(mapping_vector_field(&mapping, &self.layout.vector_field))
    }
}

fn http_error(variant: fn(String) -> RagError, status: StatusCode, body: &str) -> RagError {
    let snippet: String = body.chars().take(300).collect();
    variant(format!("HTTP {}: {}", status.as_u16(), snippet))
}

/// Settings and mapping for a new index.
pub fn index_body(layout: &IndexLayout, spec: &VectorSpec) -> Value {
    let mut properties = json!({
        "document_id": { "type": "keyword" },
        "chunk_id": { "type": "keyword" },
        "content": { "type": "text" },
        "content_hash": { "type": "keyword" },
        "metadata": { "type": "object" },
        "created_at": { "type": "date" },
    });
    properties[layout.vector_field.as_str()] = json!({
        "type": "knn_vector",
        "dimension": spec.dimension,
        "method": {
            "name": "hnsw",
            "space_type": spec.metric.space_type(),
            "engine": layout.engine,
            "parameters": {
                "ef_construction": layout.ef_construction,
                "m": layout.m,
            }
        }
    });

    json!({
        "settings": {
            "index": {
                "knn": true,
                "knn.algo_param.ef_search": layout.ef_search,
            }
        },
        "mappings": { "properties": properties }
    })
}

/// Dimension and space type of an existing k-NN field.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VectorField {
    dimension: usize,
    space_type: Option<String>,
}

/// Vector field `field` in a `GET /{index}/_mapping` response.
fn mapping_vector_field(mapping: &Value, field: &str) -> Option<VectorField> {
    mapping.as_object()?.values().find_map(|index| {
        let properties = index.pointer(&format!("/mappings/properties/{}", field))?;
        let dimension = properties.get("dimension")?.as_u64()? as usize;
        let space_type = properties
            .pointer("/method/space_type")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(VectorField {
            dimension,
            space_type,
        })
    })
}

/// k-NN query body. The vector field is left out of `_source`.
pub fn knn_query(field: &str, vector: &[f32], k: usize) -> Value {
    let mut knn = serde_json::Map::new();
    knn.insert(field.to_string(), json!({ "vector": vector, "k": k }));
    json!({
        "size": k,
        "query": { "knn": knn },
        "_source": { "excludes": [field] }
    })
}

/// NDJSON bulk payload. Returns the payload, the number of documents in
/// it, and the number of chunks skipped for lacking a vector.
pub fn bulk_body(index: &str, field: &str, chunks: &[Chunk]) -> (String, usize, usize) {
    let created_at = Utc::now().to_rfc3339();
    let mut body = String::new();
    let mut included = 0;
    let mut skipped = 0;

    for chunk in chunks {
        let Some(vector) = &chunk.embedding else {
            tracing::warn!(chunk_id = %chunk.id, "skipping chunk without embedding");
            skipped += 1;
            continue;
        };
        let action = json!({ "index": { "_index": index, "_id": chunk.id } });
        let mut doc = json!({
            "document_id": chunk.document_id,
            "chunk_id": chunk.id,
            "content": chunk.content,
            "content_hash": chunk.hash,
            "metadata": chunk.metadata,
            "created_at": created_at,
        });
        doc[field] = json!(vector);

        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&doc.to_string());
        body.push('\n');
        included += 1;
    }
    (body, included, skipped)
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<Value>,
}

/// Number of bulk items the cluster rejected.
fn bulk_failures(response: &BulkResponse) -> usize {
    response
        .items
        .iter()
        .filter(|item| {
            let action = item
                .as_object()
                .and_then(|o| o.values().next())
                .cloned()
                .unwrap_or(Value::Null);
            let status = action.get("status").and_then(Value::as_u64).unwrap_or(500);
            action.get("error").is_some() || status >= 300
        })
        .count()
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score", default)]
    score: Option<f32>,
    #[serde(rename = "_source", default)]
    source: Value,
}

fn hit_to_source(hit: Hit) -> Source {
    let text = |key: &str| {
        hit.source
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let chunk_id = match text("chunk_id") {
        id if id.is_empty() => hit.id.clone(),
        id => id,
    };
    Source {
        document_id: text("document_id"),
        chunk_id,
        content: text("content"),
        score: hit.score.unwrap_or(0.0),
        metadata: hit.source.get("metadata").cloned(),
    }
}

fn term_query(document_id: &str) -> Value {
    json!({ "query": { "term": { "document_id": document_id } } })
}

#[async_trait]
impl VectorIndex for OpenSearchIndex {
    async fn ensure_index(&self, spec: &VectorSpec) -> Result<EnsureOutcome, RagError> {
        let path = format!("/{}", self.layout.name);
        let (status, text) = self
            .send(Method::HEAD, &path, None)
            .await
            .map_err(RagError::Storage)?;

        if status.is_success() {
            if let Some(existing) = self.existing_vector_field().await? {
                spec.check_index(existing.dimension, existing.space_type.as_deref())?;
            }
            tracing::debug!(index = %self.layout.name, "index already exists");
            return Ok(EnsureOutcome::AlreadyExists);
        }
        if status != StatusCode::NOT_FOUND {
            return Err(http_error(RagError::Storage, status, &text));
        }

        let (status, text) = self
            .send_json(Method::PUT, &path, &index_body(&self.layout, spec))
            .await
            .map_err(RagError::Storage)?;
        if status.is_success() {
            tracing::info!(
                index = %self.layout.name,
                dimension = spec.dimension,
                metric = spec.metric.space_type(),
                "created index"
            );
            return Ok(EnsureOutcome::Created);
        }
        if status == StatusCode::BAD_REQUEST && text.contains("resource_already_exists_exception") {
            return Ok(EnsureOutcome::AlreadyExists);
        }
        Err(http_error(RagError::Storage, status, &text))
    }

    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<UpsertReport, RagError> {
        let (body, included, skipped) =
            bulk_body(&self.layout.name, &self.layout.vector_field, chunks);
        if included == 0 {
            return Ok(UpsertReport {
                written: 0,
                skipped,
                failed: 0,
            });
        }

        let (status, text) = self
            .send(
                Method::POST,
                "/_bulk?refresh=wait_for",
                Some((body.into_bytes(), "application/x-ndjson")),
            )
            .await
            .map_err(RagError::Storage)?;
        if !status.is_success() {
            return Err(http_error(RagError::Storage, status, &text));
        }

        let response: BulkResponse = serde_json::from_str(&text)
            .map_err(|e| RagError::Storage(format!("invalid bulk response: {}", e)))?;
        let failed = bulk_failures(&response).min(included);
        if failed > 0 {
            tracing::warn!(failed, total = included, "bulk upsert had item errors");
        }
        Ok(UpsertReport {
            written: included - failed,
            skipped,
            failed,
        })
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Source>, RagError> {
        self.spec.check(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let path = format!("/{}/_search", self.layout.name);
        let body = knn_query(&self.layout.vector_field, query, k);
        let (status, text) = self
            .send_json(Method::POST, &path, &body)
            .await
            .map_err(RagError::SearchUnavailable)?;
        if !status.is_success() {
            return Err(http_error(RagError::SearchUnavailable, status, &text));
        }

        let response: SearchResponse = serde_json::from_str(&text)
            .map_err(|e| RagError::SearchUnavailable(format!("invalid search response: {}", e)))?;
        let sources = response.hits.hits.into_iter().map(hit_to_source).collect();
        Ok(rank_sources(sources, k))
    }

    async fn delete_document(&self, document_id: &str) -> Result<u64, RagError> {
        let path = format!("/{}/_delete_by_query?refresh=true", self.layout.name);
        let (status, text) = self
            .send_json(Method::POST, &path, &term_query(document_id))
            .await
            .map_err(RagError::Storage)?;
        if status == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !status.is_success() {
            return Err(http_error(RagError::Storage, status, &text));
        }
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| RagError::Storage(format!("invalid delete response: {}", e)))?;
        Ok(value.get("deleted").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn count_chunks(&self, document_id: &str) -> Result<u64, RagError> {
        let path = format!("/{}/_count", self.layout.name);
        let (status, text) = self
            .send_json(Method::POST, &path, &term_query(document_id))
            .await
            .map_err(RagError::SearchUnavailable)?;
        if status == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !status.is_success() {
            return Err(http_error(RagError::SearchUnavailable, status, &text));
        }
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| RagError::SearchUnavailable(format!("invalid count response: {}", e)))?;
        Ok(value.get("count").and_then(Value::as_u64).unwrap_or(0))
    }
}
