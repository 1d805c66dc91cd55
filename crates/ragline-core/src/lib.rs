//! # ragline core
//!
//! Runtime-free logic for ragline: data models, the error taxonomy,
//! sentence chunking, vector similarity, the circuit breaker state machine,
//! and the capability traits (embedding, generation, vector index,
//! document store) that the application crate implements over HTTP.
//!
//! This crate contains no tokio, reqwest, or filesystem I/O. The in-memory
//! [`index::memory::InMemoryIndex`] and [`store::memory::InMemoryDocumentStore`]
//! back the pipeline tests.

pub mod breaker;
pub mod chunk;
pub mod error;
pub mod index;
pub mod models;
pub mod provider;
pub mod store;
pub mod vector;

pub use error::RagError;
