//! Command implementations for the `ragline` binary.
//!
//! Each `run_*` function wires the configured HTTP clients, runs one
//! operation, and prints a short `key: value` report to stdout. Logs go to
//! stderr through `tracing`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ragline_core::index::{EnsureOutcome, VectorIndex};
use ragline_core::models::StatusReport;
use ragline_core::store::DocumentStore;

use crate::bedrock::{BedrockClient, BedrockEmbeddings, BedrockGeneration};
use crate::config::Config;
use crate::embedding::{EmbeddingClient, EmbeddingOptions};
use crate::extract::TextExtractor;
use crate::generation::{AnswerGenerator, GenerationOptions};
use crate::ingest::IngestionPipeline;
use crate::opensearch::{IndexLayout, OpenSearchIndex};
use crate::query::QueryPipeline;
use crate::resilience::{breaker_from_config, Resilience, RetryPolicy};
use crate::sigv4::{AwsCredentials, SigV4Signer};
use crate::store::FsDocumentStore;

/// A signer for `service` when an `[aws]` section is configured.
fn signer(cfg: &Config, service: &str) -> Result<Option<SigV4Signer>> {
    match cfg.region() {
        Some(region) => {
            let credentials = AwsCredentials::from_env()?;
            Ok(Some(SigV4Signer::new(credentials, region, service)))
        }
        None => Ok(None),
    }
}

fn resilience(cfg: &Config, name: &str) -> Resilience {
    Resilience::new(
        RetryPolicy::from_config(&cfg.retry),
        breaker_from_config(name, &cfg.breaker),
    )
}

pub fn build_index(cfg: &Config) -> Result<Arc<OpenSearchIndex>> {
    let index = OpenSearchIndex::new(
        &cfg.index.url,
        IndexLayout::from_config(&cfg.index),
        cfg.vector_spec()?,
        Duration::from_secs(cfg.index.timeout_secs),
        signer(cfg, "es")?,
    )?;
    Ok(Arc::new(index))
}

pub fn build_embedder(cfg: &Config) -> Result<Arc<EmbeddingClient>> {
    let client = BedrockClient::new(
        &cfg.embedding_url()?,
        Duration::from_secs(cfg.embedding.timeout_secs),
        signer(cfg, "bedrock")?,
    )?;
    Ok(Arc::new(EmbeddingClient::new(
        Arc::new(BedrockEmbeddings::new(client)),
        resilience(cfg, "embedding"),
        cfg.vector_spec()?,
        EmbeddingOptions::from_config(&cfg.embedding),
    )))
}

pub fn build_generator(cfg: &Config) -> Result<AnswerGenerator> {
    let client = BedrockClient::new(
        &cfg.generation_url()?,
        Duration::from_secs(cfg.generation.timeout_secs),
        signer(cfg, "bedrock")?,
    )?;
    Ok(AnswerGenerator::new(
        Arc::new(BedrockGeneration::new(client)),
        resilience(cfg, "generation"),
        GenerationOptions::from_config(&cfg.generation),
    ))
}

fn print_report(report: &StatusReport) {
    println!("  status: {}", report.status);
    println!("  file: {}", report.file_name);
    println!("  uploaded: {}", report.uploaded_at.to_rfc3339());
    if let Some(processed) = report.processed_at {
        println!("  processed: {}", processed.to_rfc3339());
    }
    println!(
        "  chunks: {} total, {} with embeddings",
        report.total_chunks, report.chunks_with_embeddings
    );
    if let Some(ref message) = report.error_message {
        println!("  error: {}", message);
    }
}

pub async fn run_upload(cfg: &Config, path: &Path) -> Result<()> {
    let store = FsDocumentStore::new(&cfg.store.root);
    let document = store.upload(path).await?;
    println!("upload {}", path.display());
    println!("  id: {}", document.id);
    println!("  media type: {}", document.media_type);
    println!("  size: {} bytes", document.size_bytes);
    println!("ok");
    Ok(())
}

pub async fn run_index_init(cfg: &Config) -> Result<()> {
    let spec = cfg.vector_spec()?;
    let index = build_index(cfg)?;
    let outcome = index
        .ensure_index(&spec)
        .await
        .with_context(|| format!("Failed to initialize index '{}'", cfg.index.name))?;
    match outcome {
        EnsureOutcome::Created => println!("index {} created", cfg.index.name),
        EnsureOutcome::AlreadyExists => println!("index {} already exists", cfg.index.name),
    }
    println!("  dimension: {}", spec.dimension);
    println!("  space type: {}", spec.metric.space_type());
    Ok(())
}

pub async fn run_ingest(cfg: &Config, document_id: &str) -> Result<()> {
    let index: Arc<dyn VectorIndex> = build_index(cfg)?;
    let pipeline = IngestionPipeline::new(
        Arc::new(FsDocumentStore::new(&cfg.store.root)),
        TextExtractor::with_default_parsers(),
        build_embedder(cfg)?,
        index,
        cfg.chunking.max_chunk_size,
        Duration::from_secs(cfg.ingest.deadline_secs),
    );

    let document = pipeline.run(document_id).await?;
    println!("ingest {}", document_id);
    print_report(&document.report());
    Ok(())
}

pub async fn run_query(cfg: &Config, question: &str, k: i64) -> Result<()> {
    let index: Arc<dyn VectorIndex> = build_index(cfg)?;
    let pipeline = QueryPipeline::new(
        build_embedder(cfg)?,
        index,
        resilience(cfg, "search"),
        build_generator(cfg)?,
        &cfg.query,
    );

    let response = pipeline.ask(question, k).await;
    println!("{}", response.answer);
    if !response.sources.is_empty() {
        println!();
        println!("sources:");
        for (i, source) in response.sources.iter().enumerate() {
            println!(
                "  {}. [{:.3}] {} ({})",
                i + 1,
                source.score,
                source.chunk_id,
                source.document_id
            );
        }
    }
    Ok(())
}

pub async fn run_status(cfg: &Config, document_id: &str) -> Result<()> {
    let store = FsDocumentStore::new(&cfg.store.root);
    let document = store.document(document_id).await?;
    println!("document {}", document_id);
    print_report(&document.report());

    let indexed = match build_index(cfg) {
        Ok(index) => index.count_chunks(document_id).await.ok(),
        Err(_) => None,
    };
    match indexed {
        Some(count) => println!("  indexed chunks: {}", count),
        None => println!("  indexed chunks: unavailable"),
    }
    Ok(())
}

pub async fn run_delete(cfg: &Config, document_id: &str) -> Result<()> {
    let index = build_index(cfg)?;
    let removed = index.delete_document(document_id).await?;
    println!("delete {}", document_id);
    println!("  chunks removed: {}", removed);
    println!("ok");
    Ok(())
}
