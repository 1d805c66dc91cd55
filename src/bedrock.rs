//! HTTP model runtime providers (Bedrock `InvokeModel` wire format).
//!
//! Both providers POST JSON to `{base_url}/model/{model_id}/invoke`,
//! optionally SigV4-signed for the `bedrock` service.
//!
//! | Provider | Request | Response |
//! |----------|---------|----------|
//! | [`BedrockEmbeddings`] | `{"inputText": "..."}` | `{"embedding": [..]}` |
//! | [`BedrockGeneration`] | `{"inputText": "...", "textGenerationConfig": {..}}` | `{"results": [{"outputText": "..."}]}` |
//!
//! # Error classification
//!
//! - HTTP 408, 429 and 5xx, timeouts, connection errors → `ProviderTransient`
//! - any other non-success status → `ProviderRejected`
//!
//! Retrying is left to the resilience layer.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ragline_core::provider::{EmbeddingProvider, GenerationProvider, GenerationRequest};
use ragline_core::RagError;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::sigv4::{uri_encode, SigV4Signer};

/// Thin JSON client for the model runtime.
#[derive(Debug, Clone)]
pub struct BedrockClient {
    http: reqwest::Client,
    base_url: String,
    signer: Option<SigV4Signer>,
}

impl BedrockClient {
    pub fn new(base_url: &str, timeout: Duration, signer: Option<SigV4Signer>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
        })
    }

    async fn invoke_model<B, R>(&self, model_id: &str, body: &B) -> Result<R, RagError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let raw = format!("{}/model/{}/invoke", self.base_url, uri_encode(model_id));
        let url = Url::parse(&raw).map_err(|e| RagError::InvalidInput(format!("{}: {}", raw, e)))?;
        let payload = serde_json::to_vec(body)
            .map_err(|e| RagError::InvalidInput(format!("unserializable request: {}", e)))?;

        let mut req = self
            .http
            .post(url.clone())
            .header("content-type", "application/json")
            .header("accept", "application/json");
        if let Some(signer) = &self.signer {
            for (name, value) in signer.sign("POST", &url, &payload, chrono::Utc::now())? {
                req = req.header(name, value);
            }
        }

        tracing::debug!(model = model_id, bytes = payload.len(), "invoking model");
        let response = req
            .body(payload)
            .send()
            .await
            .map_err(|e| RagError::ProviderTransient(format!("request to {} failed: {}", model_id, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| RagError::ProviderTransient(format!("unreadable response from {}: {}", model_id, e)))
    }
}

/// Map a non-success HTTP status to the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> RagError {
    let snippet: String = body.chars().take(300).collect();
    let message = format!("HTTP {}: {}", status.as_u16(), snippet);
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        RagError::ProviderTransient(message)
    } else {
        RagError::ProviderRejected(message)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddingRequest<'a> {
    input_text: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Option<Vec<f32>>,
}

/// Embedding provider speaking the Titan embedding format.
#[derive(Debug, Clone)]
pub struct BedrockEmbeddings {
    client: BedrockClient,
}

impl BedrockEmbeddings {
    pub fn new(client: BedrockClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EmbeddingProvider for BedrockEmbeddings {
    async fn invoke(&self, model_id: &str, text: &str) -> Result<Vec<f32>, RagError> {
        let response: EmbeddingResponse = self
            .client
            .invoke_model(model_id, &EmbeddingRequest { input_text: text })
            .await?;
        match response.embedding {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(RagError::ProviderRejected(format!(
                "{} returned no embedding",
                model_id
            ))),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextGenerationRequest<'a> {
    input_text: &'a str,
    text_generation_config: TextGenerationConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextGenerationConfig<'a> {
    max_token_count: u32,
    temperature: f32,
    top_p: f32,
    stop_sequences: &'a [String],
}

#[derive(Deserialize)]
struct TextGenerationResponse {
    #[serde(default)]
    results: Vec<TextGenerationResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextGenerationResult {
    #[serde(default)]
    output_text: String,
}

/// Generation provider speaking the Titan text format.
#[derive(Debug, Clone)]
pub struct BedrockGeneration {
    client: BedrockClient,
}

impl BedrockGeneration {
    pub fn new(client: BedrockClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GenerationProvider for BedrockGeneration {
    async fn invoke(&self, request: &GenerationRequest) -> Result<Vec<String>, RagError> {
        let body = TextGenerationRequest {
            input_text: &request.prompt,
            text_generation_config: TextGenerationConfig {
                max_token_count: request.max_tokens,
                temperature: request.temperature,
                top_p: request.top_p,
                stop_sequences: &request.stop_sequences,
            },
        };
        let response: TextGenerationResponse =
            self.client.invoke_model(&request.model_id, &body).await?;
        Ok(response
            .results
            .into_iter()
            .map(|r| r.output_text)
            .collect())
    }
}
