//! Grounded answer generation.
//!
//! [`AnswerGenerator`] turns a question plus retrieved [`Source`]s into a
//! prompt that restricts the model to the supplied context, then calls the
//! generation provider through the resilience layer.
//!
//! With no sources the provider is not called at all; the caller gets
//! [`NO_CONTEXT_ANSWER`] instead.

use std::fmt::Write as _;
use std::sync::Arc;

use ragline_core::models::Source;
use ragline_core::provider::{GenerationProvider, GenerationRequest};
use ragline_core::RagError;

use crate::config::GenerationConfig;
use crate::resilience::Resilience;

/// Answer returned when retrieval found nothing to ground on.
pub const NO_CONTEXT_ANSWER: &str =
    "No relevant information was found in the indexed documents to answer this question.";

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop_sequences: Vec<String>,
}

impl GenerationOptions {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            stop_sequences: config.stop_sequences.clone(),
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

pub struct AnswerGenerator {
    provider: Arc<dyn GenerationProvider>,
    resilience: Resilience,
    options: GenerationOptions,
}

impl AnswerGenerator {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        resilience: Resilience,
        options: GenerationOptions,
    ) -> Self {
        Self {
            provider,
            resilience,
            options,
        }
    }

    pub async fn answer(&self, question: &str, sources: &[Source]) -> Result<String, RagError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidInput("question is empty".to_string()));
        }
        if sources.is_empty() {
            tracing::info!("no sources retrieved, skipping generation");
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }

        let request = GenerationRequest {
            model_id: self.options.model.clone(),
            prompt: build_prompt(question, sources),
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
            top_p: self.options.top_p,
            stop_sequences: self.options.stop_sequences.clone(),
        };

        let completions = self
            .resilience
            .call("generate", || self.provider.invoke(&request))
            .await?;

        let first = completions
            .into_iter()
            .next()
            .ok_or_else(|| RagError::GenerationFailed("provider returned no completions".into()))?;
        let answer = first.trim();
        if answer.is_empty() {
            return Err(RagError::GenerationFailed(
                "provider returned an empty completion".into(),
            ));
        }
        Ok(answer.to_string())
    }
}

/// Grounding prompt: instructions, numbered sources, then the question.
pub fn build_prompt(question: &str, sources: &[Source]) -> String {
    let mut prompt = String::from(
        "You are a helpful assistant. Answer the question using ONLY the information \
         in the context below. If the context does not contain enough information to \
         answer, say that you cannot answer from the provided documents. Do not use \
         outside knowledge.\n\nContext:\n",
    );
    for (i, source) in sources.iter().enumerate() {
        let _ = write!(
            prompt,
            "\nSource {} (Score: {:.3}):\n{}\n",
            i + 1,
            source.score,
            source.content.trim()
        );
    }
    let _ = write!(prompt, "\nQuestion: {}\n\nAnswer:", question);
    prompt
}
