//! HTTP provider and index clients against in-process mock servers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use ragline::bedrock::{BedrockClient, BedrockEmbeddings, BedrockGeneration};
use ragline::embedding::{EmbeddingClient, EmbeddingOptions};
use ragline::generation::{AnswerGenerator, GenerationOptions};
use ragline::opensearch::{IndexLayout, OpenSearchIndex};
use ragline::resilience::{Resilience, RetryPolicy};
use ragline_core::breaker::CircuitBreaker;
use ragline_core::chunk::build_chunks;
use ragline_core::index::{EnsureOutcome, VectorIndex};
use ragline_core::models::{Document, SimilarityMetric, Source, VectorSpec};
use ragline_core::RagError;

const SPEC: VectorSpec = VectorSpec {
    dimension: 4,
    metric: SimilarityMetric::Cosine,
};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn resilience(max_retries: u32) -> Resilience {
    Resilience::new(
        RetryPolicy::no_delay(max_retries),
        Arc::new(CircuitBreaker::new("test", 5, Duration::from_secs(60))),
    )
}

fn runtime(base_url: &str) -> BedrockClient {
    BedrockClient::new(base_url, Duration::from_secs(5), None).unwrap()
}

// ============ Model runtime ============

#[derive(Default)]
struct RuntimeState {
    calls: AtomicUsize,
    throttle_first: AtomicBool,
    models: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Value>>,
}

async fn invoke_model(
    State(state): State<Arc<RuntimeState>>,
    Path(model): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.calls.fetch_add(1, Ordering::SeqCst);
    state.models.lock().unwrap().push(model.clone());
    state.bodies.lock().unwrap().push(body.clone());

    if state.throttle_first.swap(false, Ordering::SeqCst) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "message": "ThrottlingException" })),
        );
    }
    if model == "denied-model" {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "message": "AccessDeniedException" })),
        );
    }
    if model == "garbled-model" {
        return (StatusCode::OK, Json(json!({ "embedding": "not-a-vector" })));
    }
    if body.get("textGenerationConfig").is_some() {
        return (
            StatusCode::OK,
            Json(json!({
                "inputTextTokenCount": 12,
                "results": [{ "outputText": " Tokio runs async tasks.", "completionReason": "FINISH" }]
            })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({ "embedding": [0.1, 0.2, 0.3, 0.4], "inputTextTokenCount": 2 })),
    )
}

async fn runtime_server(state: Arc<RuntimeState>) -> String {
    let app = Router::new()
        .route("/model/{model}/invoke", post(invoke_model))
        .with_state(state);
    serve(app).await
}

fn embedding_client(base_url: &str, model: &str, max_retries: u32) -> EmbeddingClient {
    EmbeddingClient::new(
        Arc::new(BedrockEmbeddings::new(runtime(base_url))),
        resilience(max_retries),
        SPEC,
        EmbeddingOptions {
            model: model.to_string(),
            fallback_model: Some("titan-embed-v1".to_string()),
            concurrency: 2,
        },
    )
}

#[tokio::test]
async fn embedding_retries_after_throttling() {
    let state = Arc::new(RuntimeState::default());
    state.throttle_first.store(true, Ordering::SeqCst);
    let url = runtime_server(Arc::clone(&state)).await;

    let vector = embedding_client(&url, "titan-embed-v2", 2)
        .embed("hello world")
        .await
        .unwrap();
    assert_eq!(vector, vec![0.1, 0.2, 0.3, 0.4]);
    assert_eq!(state.calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.bodies.lock().unwrap()[0], json!({ "inputText": "hello world" }));
}

#[tokio::test]
async fn embedding_falls_back_when_model_is_denied() {
    let state = Arc::new(RuntimeState::default());
    let url = runtime_server(Arc::clone(&state)).await;
    let client = embedding_client(&url, "denied-model", 2);

    client.embed("first").await.unwrap();
    client.embed("second").await.unwrap();

    let models = state.models.lock().unwrap().clone();
    assert_eq!(models, vec!["denied-model", "titan-embed-v1", "titan-embed-v1"]);
    assert_eq!(client.active_model(), "titan-embed-v1");
}

#[tokio::test]
async fn unreadable_response_does_not_switch_to_fallback() {
    let state = Arc::new(RuntimeState::default());
    let url = runtime_server(Arc::clone(&state)).await;
    let client = embedding_client(&url, "garbled-model", 0);

    let err = client.embed("hello").await.unwrap_err();
    assert!(matches!(err, RagError::ProviderTransient(_)), "got {err:?}");
    assert_eq!(*state.models.lock().unwrap(), vec!["garbled-model"]);
    assert_eq!(client.active_model(), "garbled-model");
}

#[tokio::test]
async fn generation_sends_titan_request() {
    let state = Arc::new(RuntimeState::default());
    let url = runtime_server(Arc::clone(&state)).await;
    let generator = AnswerGenerator::new(
        Arc::new(BedrockGeneration::new(runtime(&url))),
        resilience(0),
        GenerationOptions {
            model: "titan-text".into(),
            ..GenerationOptions::default()
        },
    );

    let source = Source {
        document_id: "doc".into(),
        chunk_id: "doc_chunk_2".into(),
        content: "Tokio runs async tasks.".into(),
        score: 0.8,
        metadata: None,
    };
    let answer = generator.answer("What runs tasks?", &[source]).await.unwrap();
    assert_eq!(answer, "Tokio runs async tasks.");

    let body = state.bodies.lock().unwrap()[0].clone();
    assert!(body["inputText"]
        .as_str()
        .unwrap()
        .contains("Source 1 (Score: 0.800):\nTokio runs async tasks."));
    assert_eq!(body["textGenerationConfig"]["maxTokenCount"], 1000);
    assert_eq!(body["textGenerationConfig"]["stopSequences"], json!(["User:"]));
    assert_eq!(state.models.lock().unwrap()[0], "titan-text");
}

// ============ Index ============

#[derive(Default)]
struct IndexState {
    dimension: Mutex<Option<u64>>,
    space_type: Mutex<Option<String>>,
    creates: AtomicUsize,
    bulk_lines: Mutex<Vec<Value>>,
    fail_search: AtomicBool,
}

async fn index_exists(State(state): State<Arc<IndexState>>) -> StatusCode {
    if state.dimension.lock().unwrap().is_some() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn create_index(
    State(state): State<Arc<IndexState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.creates.fetch_add(1, Ordering::SeqCst);
    let dimension = body["mappings"]["properties"]["embedding"]["dimension"].as_u64();
    *state.dimension.lock().unwrap() = dimension;
    let space_type = body["mappings"]["properties"]["embedding"]["method"]["space_type"]
        .as_str()
        .map(str::to_string);
    *state.space_type.lock().unwrap() = space_type;
    Json(json!({ "acknowledged": true }))
}

async fn get_mapping(
    State(state): State<Arc<IndexState>>,
    Path(index): Path<String>,
) -> Json<Value> {
    let dimension = state.dimension.lock().unwrap().unwrap_or(0);
    let mut field = json!({ "type": "knn_vector", "dimension": dimension });
    if let Some(space_type) = state.space_type.lock().unwrap().clone() {
        field["method"] = json!({ "name": "hnsw", "space_type": space_type });
    }
    let mut response = serde_json::Map::new();
    response.insert(index, json!({ "mappings": { "properties": { "embedding": field } } }));
    Json(Value::Object(response))
}

async fn bulk(State(state): State<Arc<IndexState>>, body: String) -> Json<Value> {
    let lines: Vec<Value> = body
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let items: Vec<Value> = lines
        .iter()
        .filter_map(|l| l.get("index"))
        .enumerate()
        .map(|(i, action)| {
            if i == 1 {
                json!({ "index": { "_id": action["_id"], "status": 400, "error": { "type": "mapper_parsing_exception" } } })
            } else {
                json!({ "index": { "_id": action["_id"], "status": 201 } })
            }
        })
        .collect();
    *state.bulk_lines.lock().unwrap() = lines;
    Json(json!({ "took": 3, "errors": true, "items": items }))
}

async fn search(
    State(state): State<Arc<IndexState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if state.fail_search.load(Ordering::SeqCst) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "cluster_block_exception" })),
        );
    }
    assert_eq!(body["query"]["knn"]["embedding"]["k"], body["size"]);
    (
        StatusCode::OK,
        Json(json!({
            "hits": { "hits": [
                { "_id": "d_chunk_1", "_score": 0.42, "_source": { "document_id": "d", "chunk_id": "d_chunk_1", "content": "second" } },
                { "_id": "d_chunk_0", "_score": 0.97, "_source": { "document_id": "d", "chunk_id": "d_chunk_0", "content": "first", "metadata": { "chunk_index": 0 } } }
            ] }
        })),
    )
}

async fn delete_by_query(Json(body): Json<Value>) -> Json<Value> {
    assert_eq!(body["query"]["term"]["document_id"], "d");
    Json(json!({ "deleted": 3 }))
}

async fn count(Json(body): Json<Value>) -> Json<Value> {
    assert_eq!(body["query"]["term"]["document_id"], "d");
    Json(json!({ "count": 2 }))
}

async fn index_server(state: Arc<IndexState>) -> OpenSearchIndex {
    let app = Router::new()
        .route("/_bulk", post(bulk))
        .route("/{index}", put(create_index).head(index_exists))
        .route("/{index}/_mapping", get(get_mapping))
        .route("/{index}/_search", post(search))
        .route("/{index}/_delete_by_query", post(delete_by_query))
        .route("/{index}/_count", post(count))
        .with_state(state);
    let url = serve(app).await;

    let layout = IndexLayout {
        name: "rag-test".into(),
        vector_field: "embedding".into(),
        engine: "nmslib".into(),
        m: 16,
        ef_construction: 512,
        ef_search: 512,
    };
    OpenSearchIndex::new(&url, layout, SPEC, Duration::from_secs(5), None).unwrap()
}

#[tokio::test]
async fn ensure_index_is_idempotent() {
    let state = Arc::new(IndexState::default());
    let index = index_server(Arc::clone(&state)).await;

    assert_eq!(index.ensure_index(&SPEC).await.unwrap(), EnsureOutcome::Created);
    assert_eq!(
        index.ensure_index(&SPEC).await.unwrap(),
        EnsureOutcome::AlreadyExists
    );
    assert_eq!(state.creates.load(Ordering::SeqCst), 1);
    assert_eq!(*state.dimension.lock().unwrap(), Some(4));
    assert_eq!(state.space_type.lock().unwrap().as_deref(), Some("cosinesimil"));
}

#[tokio::test]
async fn ensure_index_rejects_other_dimension() {
    let state = Arc::new(IndexState::default());
    *state.dimension.lock().unwrap() = Some(768);
    let index = index_server(Arc::clone(&state)).await;

    let err = index.ensure_index(&SPEC).await.unwrap_err();
    assert!(matches!(
        err,
        RagError::DimensionMismatch {
            expected: 4,
            actual: 768
        }
    ));
    assert_eq!(state.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ensure_index_rejects_other_metric() {
    let state = Arc::new(IndexState::default());
    *state.dimension.lock().unwrap() = Some(4);
    *state.space_type.lock().unwrap() = Some("l2".to_string());
    let index = index_server(Arc::clone(&state)).await;

    let err = index.ensure_index(&SPEC).await.unwrap_err();
    match err {
        RagError::MetricMismatch { expected, actual } => {
            assert_eq!(expected, "cosinesimil");
            assert_eq!(actual, "l2");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(state.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bulk_upsert_counts_item_errors() {
    let state = Arc::new(IndexState::default());
    let index = index_server(Arc::clone(&state)).await;

    let doc = Document::new("a.txt", "text/plain", 10);
    let mut chunks = build_chunks(&doc, "One. Two. Three. Four.", 4);
    for chunk in chunks.iter_mut().take(3) {
        chunk.embedding = Some(vec![0.5; 4]);
    }

    let report = index.upsert_chunks(&chunks).await.unwrap();
    assert_eq!(report.written, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 1);

    let lines = state.bulk_lines.lock().unwrap().clone();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0]["index"]["_index"], "rag-test");
    assert_eq!(lines[1]["chunk_id"], chunks[0].id.as_str());
    assert_eq!(lines[1]["embedding"], json!([0.5, 0.5, 0.5, 0.5]));
}

#[tokio::test]
async fn search_parses_and_ranks_hits() {
    let state = Arc::new(IndexState::default());
    let index = index_server(Arc::clone(&state)).await;

    let sources = index.search(&[0.1, 0.2, 0.3, 0.4], 5).await.unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].chunk_id, "d_chunk_0");
    assert_eq!(sources[0].metadata, Some(json!({ "chunk_index": 0 })));
    assert_eq!(sources[1].content, "second");

    let err = index.search(&[0.1, 0.2], 5).await.unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { .. }));

    state.fail_search.store(true, Ordering::SeqCst);
    let err = index.search(&[0.1, 0.2, 0.3, 0.4], 5).await.unwrap_err();
    assert!(matches!(err, RagError::SearchUnavailable(_)));
}

#[tokio::test]
async fn delete_and_count_by_document() {
    let index = index_server(Arc::new(IndexState::default())).await;
    assert_eq!(index.delete_document("d").await.unwrap(), 3);
    assert_eq!(index.count_chunks("d").await.unwrap(), 2);
}

#[tokio::test]
async fn truncated_body_reports_read_failure() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let _ = socket.read(&mut buf).await;
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"count\"")
            .await;
        let _ = socket.shutdown().await;
    });

    let layout = IndexLayout {
        name: "rag-test".into(),
        vector_field: "embedding".into(),
        engine: "nmslib".into(),
        m: 16,
        ef_construction: 512,
        ef_search: 512,
    };
    let index =
        OpenSearchIndex::new(&format!("http://{}", addr), layout, SPEC, Duration::from_secs(5), None)
            .unwrap();

    let err = index.count_chunks("d").await.unwrap_err();
    match err {
        RagError::SearchUnavailable(message) => {
            assert!(message.contains("body read failed"), "message: {message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
