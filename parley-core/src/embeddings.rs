//! Multi-backend embedding support.
//!
//! Provides an `EmbeddingBackend` trait with implementations for:
//! - **Remote** (OpenAI-compatible `/embeddings` endpoint)
//! - **ONNX** (local `all-MiniLM-L6-v2`, 384-dim)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// Default ONNX (all-MiniLM-L6-v2) embedding dimensions
pub const ONNX_DIMENSIONS: usize = 384;

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

/// Abstraction over embedding providers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of texts, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a search query. Backends that distinguish query and document
    /// embeddings can override this. Defaults to calling `embed()`.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(text).await
    }

    /// Returns the embedding dimension (e.g., 1536 or 384).
    fn dimensions(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

/// Embedding generation errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Response contained {actual} embeddings for {expected} inputs")]
    MissingEmbedding { expected: usize, actual: usize },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },

    #[error("ONNX model not found at {path}")]
    ModelNotFound { path: String },

    #[error("ONNX inference error: {0}")]
    OnnxInference(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
}

// ============================================================================
// Config types
// ============================================================================

/// Remote embedding client configuration
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl RemoteConfig {
    pub fn new(api_key: Option<String>, model: String, dimensions: usize) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model,
            dimensions,
            batch_size: 100,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// ONNX backend configuration
#[derive(Debug, Clone)]
pub struct OnnxConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimensions: usize,
}

/// Configuration union for the backend factory.
pub enum BackendConfig {
    Remote(RemoteConfig),
    Onnx(OnnxConfig),
}

/// Create the appropriate backend from configuration.
pub fn create_backend(config: BackendConfig) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
    match config {
        BackendConfig::Remote(c) => Ok(Box::new(RemoteEmbeddingClient::new(c)?)),
        BackendConfig::Onnx(c) => {
            Ok(Box::new(crate::onnx_embedder::OnnxEmbeddingClient::new(c)?))
        }
    }
}

// ============================================================================
// Remote API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// RemoteEmbeddingClient
// ============================================================================

/// Embedding client for OpenAI-compatible `/embeddings` endpoints.
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingClient {
    client: Client,
    config: RemoteConfig,
    base_url: String,
}

impl RemoteEmbeddingClient {
    pub fn new(config: RemoteConfig) -> Result<Self, EmbeddingError> {
        Self::with_base_url(config, "https://api.openai.com/v1".to_string())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        config: RemoteConfig,
        base_url: String,
    ) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Embed a batch of texts, splitting into chunks of `batch_size` requests.
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let chunk_size = self.config.batch_size.max(1);
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(chunk_size) {
            out.extend(self.embed_chunk_with_retry(chunk).await?);
        }
        Ok(out)
    }

    async fn embed_chunk_with_retry(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = Retry::spawn(retry_strategy, || self.embed_once(texts)).await;

        match result {
            Ok(vecs) => Ok(vecs),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All embedding retry attempts failed"
                );
                Err(EmbeddingError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingsRequest {
            model: self.config.model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "Embeddings API error");

            return Err(EmbeddingError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: EmbeddingsResponse = response.json().await?;

        if body.data.len() != texts.len() {
            return Err(EmbeddingError::MissingEmbedding {
                expected: texts.len(),
                actual: body.data.len(),
            });
        }

        // The API documents per-item indices; order by them rather than
        // trusting response order.
        let mut data = body.data;
        data.sort_by_key(|d| d.index);

        let mut out = Vec::with_capacity(data.len());
        for datum in data {
            if datum.embedding.len() != self.config.dimensions {
                return Err(EmbeddingError::InvalidDimensions {
                    expected: self.config.dimensions,
                    actual: datum.embedding.len(),
                });
            }
            out.push(datum.embedding);
        }

        Ok(out)
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vecs = self.embed_many(&[text.to_string()]).await?;
        vecs.pop().ok_or(EmbeddingError::MissingEmbedding {
            expected: 1,
            actual: 0,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_many(texts).await
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn name(&self) -> &str {
        "remote"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str) -> RemoteConfig {
        RemoteConfig {
            api_key: api_key.to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 8,
            batch_size: 100,
            max_retries: 3,
            retry_delay_ms: 10,
        }
    }

    fn mock_response(count: usize, dims: usize) -> serde_json::Value {
        let data: Vec<serde_json::Value> = (0..count)
            .map(|i| {
                let values: Vec<f32> = (0..dims).map(|j| (i * dims + j) as f32).collect();
                serde_json::json!({ "index": i, "embedding": values })
            })
            .collect();
        serde_json::json!({ "data": data })
    }

    #[tokio::test]
    async fn test_embed_calls_api_and_returns_vector() {
        let mock_server = MockServer::start().await;
        let client =
            RemoteEmbeddingClient::with_base_url(test_config("test-key"), mock_server.uri())
                .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": ["hello world"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_response(1, 8)))
            .mount(&mock_server)
            .await;

        let result = client.embed("hello world").await;

        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result.err());
        assert_eq!(result.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_embed_batch_chunks_requests() {
        let mock_server = MockServer::start().await;
        let mut config = test_config("test-key");
        config.batch_size = 2;
        let client = RemoteEmbeddingClient::with_base_url(config, mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": ["a", "b"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_response(2, 8)))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": ["c"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_response(1, 8)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let texts: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let result = client.embed_batch(&texts).await;

        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result.err());
        assert_eq!(result.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_embed_orders_by_response_index() {
        let mock_server = MockServer::start().await;
        let client =
            RemoteEmbeddingClient::with_base_url(test_config("test-key"), mock_server.uri())
                .expect("Failed to create client");

        // Response deliberately out of order.
        let shuffled = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0] },
                { "index": 0, "embedding": [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0] }
            ]
        });

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(shuffled))
            .mount(&mock_server)
            .await;

        let texts: Vec<String> = ["zero", "one"].iter().map(|s| s.to_string()).collect();
        let result = client.embed_batch(&texts).await.unwrap();

        assert_eq!(result[0][0], 0.0);
        assert_eq!(result[1][0], 1.0);
    }

    #[tokio::test]
    async fn test_embed_returns_error_on_api_500() {
        let mock_server = MockServer::start().await;
        let client =
            RemoteEmbeddingClient::with_base_url(test_config("test-key"), mock_server.uri())
                .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "message": "Internal server error" }
            })))
            .mount(&mock_server)
            .await;

        let result = client.embed("hello world").await;

        assert!(result.is_err(), "Expected error on 500 response");
        match result {
            Err(EmbeddingError::RetryExhausted { attempts }) => {
                assert_eq!(attempts, 3, "Expected 3 retry attempts");
            }
            _ => panic!("Expected RetryExhausted error"),
        }
    }

    #[tokio::test]
    async fn test_embed_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client =
            RemoteEmbeddingClient::with_base_url(test_config("test-key"), mock_server.uri())
                .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_response(1, 8)))
            .mount(&mock_server)
            .await;

        let result = client.embed("hello world").await;

        assert!(result.is_ok(), "Expected success after retry");
        assert_eq!(result.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_client_fails_with_missing_api_key() {
        let result = RemoteEmbeddingClient::new(test_config(""));

        assert!(result.is_err(), "Expected error with missing API key");
        match result {
            Err(EmbeddingError::MissingApiKey) => {}
            _ => panic!("Expected MissingApiKey error"),
        }
    }

    #[tokio::test]
    async fn test_embed_returns_error_on_wrong_dimensions() {
        let mock_server = MockServer::start().await;
        let client =
            RemoteEmbeddingClient::with_base_url(test_config("test-key"), mock_server.uri())
                .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "index": 0, "embedding": [0.1, 0.2, 0.3] }]
            })))
            .mount(&mock_server)
            .await;

        let result = client.embed("hello world").await;

        assert!(result.is_err(), "Expected error on wrong dimensions");
        match result {
            Err(EmbeddingError::InvalidDimensions { expected, actual }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 3);
            }
            Err(EmbeddingError::RetryExhausted { .. }) => {
                // Also acceptable
            }
            _ => panic!("Expected InvalidDimensions or RetryExhausted error"),
        }
    }

    #[tokio::test]
    async fn test_backend_trait_dispatch() {
        let mock_server = MockServer::start().await;
        let backend: Box<dyn EmbeddingBackend> = Box::new(
            RemoteEmbeddingClient::with_base_url(test_config("test-key"), mock_server.uri())
                .unwrap(),
        );

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_response(1, 8)))
            .mount(&mock_server)
            .await;

        let result = backend.embed_query("hello").await.unwrap();
        assert_eq!(result.len(), 8);
        assert_eq!(backend.dimensions(), 8);
        assert_eq!(backend.name(), "remote");
    }
}
