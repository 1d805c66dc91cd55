//! Query pipeline: embed the question, retrieve, answer.
//!
//! The question is validated before any provider is contacted. Embedding,
//! search and generation share one [`Deadline`]. Callers that face end
//! users should go through [`QueryPipeline::ask`], which logs the cause
//! of a failure and returns only a generic message.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ragline_core::index::VectorIndex;
use ragline_core::models::QueryResponse;
use ragline_core::RagError;

use crate::config::QueryConfig;
use crate::embedding::EmbeddingClient;
use crate::generation::AnswerGenerator;
use crate::resilience::{Deadline, Resilience};

pub struct QueryPipeline {
    embedder: Arc<EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    search: Resilience,
    generator: AnswerGenerator,
    default_k: usize,
    max_k: usize,
    deadline: Duration,
}

impl QueryPipeline {
    pub fn new(
        embedder: Arc<EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        search: Resilience,
        generator: AnswerGenerator,
        config: &QueryConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            search,
            generator,
            default_k: config.default_k,
            max_k: config.max_k,
            deadline: Duration::from_secs(config.deadline_secs),
        }
    }

    /// Non-positive `k` selects the default; larger values are capped.
    pub fn resolve_k(&self, k: i64) -> usize {
        if k <= 0 {
            self.default_k.min(self.max_k)
        } else {
            (k as u64).min(self.max_k as u64) as usize
        }
    }

    pub async fn run(&self, question: &str, k: i64) -> Result<QueryResponse, RagError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidInput("question must not be empty".to_string()));
        }
        let k = self.resolve_k(k);

        Deadline::after(self.deadline)
            .run(async {
                let vector = self.embedder.embed(question).await?;
                let sources = self
                    .search
                    .call("search", || self.index.search(&vector, k))
                    .await?;
                tracing::debug!(k, hits = sources.len(), "retrieved sources");

                let answer = self.generator.answer(question, &sources).await?;
                Ok(QueryResponse {
                    answer,
                    sources,
                    query_time: Utc::now().to_rfc3339(),
                })
            })
            .await
    }

    /// Like [`run`](Self::run), but failures become a response carrying a
    /// user-safe message and no sources.
    pub async fn ask(&self, question: &str, k: i64) -> QueryResponse {
        match self.run(question, k).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "query failed");
                QueryResponse {
                    answer: e.user_message(),
                    sources: Vec::new(),
                    query_time: Utc::now().to_rfc3339(),
                }
            }
        }
    }
}
