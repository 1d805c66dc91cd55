//! Error taxonomy shared by every pipeline stage.
//!
//! Each variant carries enough classification for the resilience layer to
//! decide whether to retry ([`RagError::is_retryable`]) and whether the
//! outcome should move a circuit breaker ([`RagError::counts_toward_breaker`]).

use std::time::Duration;

use thiserror::Error;

/// Main error type for ragline operations.
#[derive(Error, Debug)]
pub enum RagError {
    /// Caller supplied an empty or malformed value.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No extractor is registered for the declared media type.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Bytes declared as text are not valid UTF-8.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// A registered parser failed on a corrupt or truncated file.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Throttling, timeouts, 5xx responses, and network failures.
    #[error("transient provider error: {0}")]
    ProviderTransient(String),

    /// The provider refused the request (access denied, unknown model, bad payload).
    #[error("provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An existing index was built for another similarity metric.
    #[error("metric mismatch: expected space type {expected}, index has {actual}")]
    MetricMismatch { expected: String, actual: String },

    /// The named circuit breaker is open and short-circuited the call.
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    /// One chunk of an embedding batch failed; the whole batch is discarded.
    #[error("embedding failed for chunk {ordinal}: {source}")]
    PartialBatchFailure {
        ordinal: usize,
        #[source]
        source: Box<RagError>,
    },

    #[error("search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("not found: {0}")]
    NotFound(String),

    /// Document store or index write failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Message returned to query callers for any failure that is not their fault.
pub const GENERIC_QUERY_FAILURE: &str =
    "Sorry, the question could not be answered right now. Please try again later.";

impl RagError {
    /// Only transient provider failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::ProviderTransient(_))
    }

    /// Whether a call ending in this error counts as a breaker failure.
    ///
    /// Caller mistakes and deadline expiry say nothing about the health of
    /// the downstream service and leave the breaker untouched.
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(
            self,
            RagError::ProviderTransient(_) | RagError::SearchUnavailable(_)
        )
    }

    /// Text safe to show an end user of the query pipeline.
    pub fn user_message(&self) -> String {
        match self {
            RagError::InvalidInput(msg) => msg.clone(),
            _ => GENERIC_QUERY_FAILURE.to_string(),
        }
    }

    /// Short description recorded on a failed document.
    pub fn status_message(&self) -> String {
        match self {
            RagError::UnsupportedMediaType(mt) => format!("unsupported media type: {mt}"),
            RagError::InvalidEncoding(_) => "document is not valid UTF-8".to_string(),
            RagError::Extraction(_) => "text extraction failed".to_string(),
            RagError::PartialBatchFailure { ordinal, .. } => {
                format!("embedding failed for chunk {ordinal}")
            }
            RagError::CircuitOpen(name) => format!("{name} unavailable (circuit open)"),
            RagError::ProviderTransient(_) => "provider unavailable".to_string(),
            RagError::ProviderRejected(_) => "provider rejected request".to_string(),
            RagError::DimensionMismatch { expected, actual } => {
                format!("vector dimension {actual} does not match index dimension {expected}")
            }
            RagError::MetricMismatch { expected, actual } => {
                format!("index space type {actual} does not match configured {expected}")
            }
            RagError::DeadlineExceeded(_) => "processing deadline exceeded".to_string(),
            other => {
                let text = other.to_string();
                text.chars().take(200).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(RagError::ProviderTransient("429".into()).is_retryable());
        assert!(!RagError::ProviderRejected("403".into()).is_retryable());
        assert!(!RagError::InvalidInput("empty".into()).is_retryable());
        assert!(!RagError::DimensionMismatch {
            expected: 3,
            actual: 2
        }
        .is_retryable());
        assert!(!RagError::UnsupportedMediaType("image/png".into()).is_retryable());
    }

    #[test]
    fn test_breaker_classification() {
        assert!(RagError::ProviderTransient("503".into()).counts_toward_breaker());
        assert!(!RagError::InvalidInput("empty".into()).counts_toward_breaker());
        assert!(!RagError::DeadlineExceeded(Duration::from_secs(1)).counts_toward_breaker());
    }

    #[test]
    fn test_partial_batch_display_names_ordinal() {
        let err = RagError::PartialBatchFailure {
            ordinal: 7,
            source: Box::new(RagError::ProviderTransient("boom".into())),
        };
        assert_eq!(
            err.to_string(),
            "embedding failed for chunk 7: transient provider error: boom"
        );
        assert_eq!(err.status_message(), "embedding failed for chunk 7");
    }

    #[test]
    fn test_user_message_hides_internals() {
        let err = RagError::SearchUnavailable("connection refused 10.0.0.4:9200".into());
        assert_eq!(err.user_message(), GENERIC_QUERY_FAILURE);

        let err = RagError::InvalidInput("question must not be empty".into());
        assert_eq!(err.user_message(), "question must not be empty");
    }
}
