//! # ragline
//!
//! A retrieval-augmented generation pipeline: uploaded documents are
//! extracted, chunked, embedded and written to a k-NN index; questions are
//! embedded, matched against the index, and answered by a text generation
//! model using only the retrieved chunks as context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────┐   ┌───────────┐   ┌────────────┐
//! │  Store   │──▶│ Extract  │──▶│  Chunk  │──▶│   Embed   │──▶│ OpenSearch │
//! │ (fs)     │   │ txt/pdf… │   │         │   │ (bounded) │   │   k-NN     │
//! └──────────┘   └──────────┘   └─────────┘   └───────────┘   └─────┬──────┘
//!                                                                   │
//!                  question ──▶ embed ──▶ search ──▶ generate ◀──────┘
//! ```
//!
//! Every provider call runs through [`resilience`]: retries with
//! exponential backoff inside a per-service circuit breaker, all under a
//! request deadline.
//!
//! Domain types, the chunker, the breaker state machine and the capability
//! traits live in the runtime-free `ragline-core` crate.
//!
//! ## Quick Start
//!
//! ```bash
//! ragline index init
//! ragline upload ./handbook.pdf        # prints the document id
//! ragline ingest <document-id>
//! ragline query "What is the refund policy?" --k 5
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`extract`] | Text extraction by media type |
//! | [`sigv4`] | AWS SigV4 request signing |
//! | [`resilience`] | Retry policy, breaker guard, deadlines |
//! | [`bedrock`] | HTTP embedding and generation providers |
//! | [`opensearch`] | HTTP k-NN index client |
//! | [`store`] | Filesystem document store |
//! | [`embedding`] | Embedding client with fallback and batching |
//! | [`generation`] | Grounded answer generation |
//! | [`ingest`] | Ingestion pipeline |
//! | [`query`] | Query pipeline |
//! | [`app`] | CLI command implementations |

pub mod app;
pub mod bedrock;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod logging;
pub mod opensearch;
pub mod query;
pub mod resilience;
pub mod sigv4;
pub mod store;

pub use ragline_core::RagError;
