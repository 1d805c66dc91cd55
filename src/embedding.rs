//! Embedding client: single texts and bounded-concurrency batches.
//!
//! Every provider call goes through [`Resilience`] (retry inside the
//! breaker). If the provider rejects the primary model, the client switches
//! to the configured fallback model, retries that text once with it, and
//! keeps using the fallback for the rest of its lifetime.
//!
//! [`EmbeddingClient::embed_batch`] spreads a document's chunks over a
//! fixed pool of `concurrency` workers that pull from a shared queue, so
//! the number of spawned tasks never grows with the batch. Results come
//! back in input order. The first chunk that fails aborts
//! the remaining workers and fails the batch with
//! [`RagError::PartialBatchFailure`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ragline_core::models::{Chunk, VectorSpec};
use ragline_core::provider::EmbeddingProvider;
use ragline_core::RagError;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::config::EmbeddingConfig;
use crate::resilience::Resilience;

#[derive(Debug, Clone)]
pub struct EmbeddingOptions {
    pub model: String,
    pub fallback_model: Option<String>,
    pub concurrency: usize,
}

impl EmbeddingOptions {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            model: config.model.clone(),
            fallback_model: config
                .fallback_model
                .clone()
                .filter(|m| !m.trim().is_empty()),
            concurrency: config.concurrency.max(1),
        }
    }
}

pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    resilience: Resilience,
    spec: VectorSpec,
    options: EmbeddingOptions,
    on_fallback: AtomicBool,
}

impl EmbeddingClient {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        resilience: Resilience,
        spec: VectorSpec,
        options: EmbeddingOptions,
    ) -> Self {
        Self {
            provider,
            resilience,
            spec,
            options,
            on_fallback: AtomicBool::new(false),
        }
    }

    /// Model id the next call will use.
    pub fn active_model(&self) -> &str {
        match &self.options.fallback_model {
            Some(fallback) if self.on_fallback.load(Ordering::SeqCst) => fallback,
            _ => &self.options.model,
        }
    }

    pub fn spec(&self) -> &VectorSpec {
        &self.spec
    }

    pub fn concurrency(&self) -> usize {
        self.options.concurrency
    }

    /// Embed one text. Blank text never reaches the provider.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        if text.trim().is_empty() {
            return Err(RagError::InvalidInput("text to embed is empty".to_string()));
        }

        let model = self.active_model().to_string();
        let vector = match self.invoke(&model, text).await {
            Err(RagError::ProviderRejected(reason)) => match self.switch_to_fallback(&model) {
                Some(fallback) => {
                    tracing::warn!(
                        model = %model,
                        fallback = %fallback,
                        reason = %reason,
                        "embedding model rejected, switching to fallback"
                    );
                    self.invoke(&fallback, text).await?
                }
                None => return Err(RagError::ProviderRejected(reason)),
            },
            other => other?,
        };

        self.spec.check(&vector)?;
        Ok(vector)
    }

    async fn invoke(&self, model: &str, text: &str) -> Result<Vec<f32>, RagError> {
        self.resilience
            .call("embed", || self.provider.invoke(model, text))
            .await
    }

    /// Returns the fallback model if `rejected` was the primary and a
    /// fallback is configured.
    fn switch_to_fallback(&self, rejected: &str) -> Option<String> {
        let fallback = self.options.fallback_model.as_ref()?;
        if rejected == fallback {
            return None;
        }
        self.on_fallback.store(true, Ordering::SeqCst);
        Some(fallback.clone())
    }

    /// Embed every chunk, returning one vector per chunk in input order.
    pub async fn embed_batch(self: &Arc<Self>, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, RagError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let jobs: Vec<(usize, String)> = chunks
            .iter()
            .map(|chunk| chunk.content.clone())
            .enumerate()
            .collect();
        let queue = Arc::new(Mutex::new(jobs.into_iter()));
        let pool_size = self.options.concurrency.min(chunks.len());
        let mut workers = JoinSet::new();

        for _ in 0..pool_size {
            let client = Arc::clone(self);
            let queue = Arc::clone(&queue);
            workers.spawn(async move {
                let mut done = Vec::new();
                loop {
                    let next = queue.lock().await.next();
                    let Some((position, text)) = next else {
                        return Ok(done);
                    };
                    match client.embed(&text).await {
                        Ok(vector) => done.push((position, vector)),
                        Err(e) => return Err((position, e)),
                    }
                }
            });
        }

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
        while let Some(joined) = workers.join_next().await {
            let finished = joined
                .map_err(|e| RagError::ProviderTransient(format!("embedding worker failed: {}", e)))?;
            match finished {
                Ok(done) => {
                    for (position, vector) in done {
                        vectors[position] = Some(vector);
                    }
                }
                Err((position, e)) => {
                    workers.abort_all();
                    let ordinal = chunks[position].ordinal;
                    tracing::error!(ordinal, error = %e, "embedding batch failed");
                    return Err(RagError::PartialBatchFailure {
                        ordinal,
                        source: Box::new(e),
                    });
                }
            }
        }

        vectors
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| RagError::ProviderTransient("embedding batch incomplete".to_string()))
    }
}
