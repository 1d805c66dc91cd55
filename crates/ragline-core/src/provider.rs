//! Capability traits for the model providers.
//!
//! The pipelines only see these traits; the application crate provides
//! HTTP implementations and the tests provide counting mocks.

use async_trait::async_trait;

use crate::error::RagError;

/// Turns one text into one embedding vector.
///
/// Implementations classify failures: throttling, 5xx and network errors
/// as [`RagError::ProviderTransient`], refusals (unknown model, access
/// denied) as [`RagError::ProviderRejected`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn invoke(&self, model_id: &str, text: &str) -> Result<Vec<f32>, RagError>;
}

/// Parameters of one text generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model_id: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop_sequences: Vec<String>,
}

/// Produces completions for a prompt. The first completion is used.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn invoke(&self, request: &GenerationRequest) -> Result<Vec<String>, RagError>;
}
