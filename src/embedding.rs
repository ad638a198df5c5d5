//! Embedding providers.
//!
//! Implements the core [`EmbeddingProvider`] trait for the configured
//! backends:
//! - **[`DisabledProvider`]**: refuses every request; the default when no
//!   provider is configured.
//! - **[`OpenAIProvider`]**: `POST {base_url}/embeddings` with a bearer key.
//! - **[`AzureOpenAIProvider`]**: the per-deployment Azure OpenAI endpoint
//!   with an `api-key` header.
//!
//! Both HTTP providers send a whole batch as one request (`"input"` is an
//! array) and return the vectors in input order. They make exactly one
//! request per call and only *classify* failures; retrying is the
//! caller's job (see [`crate::retry`]):
//! - HTTP 429 and 5xx, timeouts, connection errors → transient
//! - other HTTP 4xx, malformed bodies, wrong vector length → permanent
//!
//! Input text longer than `embedding.max_input_chars` is truncated on a
//! character boundary before it is sent.

use std::sync::Arc;

use anyhow::{bail, Result as AnyResult};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use change_indexer_core::embedding::{check_dims, EmbeddingProvider};
use change_indexer_core::error::{IndexerError, Result};

use crate::config::EmbeddingConfig;
use crate::http;

/// Provider used when `embedding.provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(IndexerError::embedding_permanent(
            "embedding provider is disabled",
        ))
    }
}

/// Embedding provider using the OpenAI API (or any compatible server).
pub struct OpenAIProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
    max_input_chars: usize,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is unset or the API key
    /// variable is missing from the environment.
    pub fn new(config: &EmbeddingConfig) -> AnyResult<Self> {
        let (model, dims) = model_and_dims(config)?;
        let key_env = config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key: http::api_key_from_env(key_env)?,
            model,
            dims,
            max_input_chars: config.max_input_chars,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        single(self.embed_batch(&[text]).await?)
    }
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": truncate_all(texts, self.max_input_chars),
        });
        let request = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);
        send_embedding_request(request, "OpenAI", texts.len(), self.dims).await
    }
}

/// Embedding provider for an Azure OpenAI deployment.
pub struct AzureOpenAIProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
    max_input_chars: usize,
}

impl AzureOpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> AnyResult<Self> {
        let (model, dims) = model_and_dims(config)?;
        let azure = config
            .azure
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("[embedding.azure] section required for azure_openai"))?;
        let key_env = config
            .api_key_env
            .as_deref()
            .unwrap_or("AZURE_OPENAI_API_KEY");
        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            azure.endpoint.trim_end_matches('/'),
            azure.deployment,
            azure.api_version
        );
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url,
            api_key: http::api_key_from_env(key_env)?,
            model,
            dims,
            max_input_chars: config.max_input_chars,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for AzureOpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        single(self.embed_batch(&[text]).await?)
    }
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "input": truncate_all(texts, self.max_input_chars) });
        let request = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&body);
        send_embedding_request(request, "Azure OpenAI", texts.len(), self.dims).await
    }
}

fn model_and_dims(config: &EmbeddingConfig) -> AnyResult<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {}", config.provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {}", config.provider))?;
    Ok((model, dims))
}

fn single(mut vectors: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    vectors
        .pop()
        .ok_or_else(|| IndexerError::embedding_permanent("empty embeddings response"))
}

fn truncate_all<'a>(texts: &[&'a str], max_chars: usize) -> Vec<&'a str> {
    texts.iter().map(|&t| truncate_chars(t, max_chars)).collect()
}

/// Send one request and classify whatever comes back.
async fn send_embedding_request(
    request: reqwest::RequestBuilder,
    service: &str,
    expected: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>> {
    let response = request.send().await.map_err(|e| IndexerError::EmbeddingProvider {
        kind: http::transport_kind(&e),
        message: format!("{} request failed: {}", service, e),
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(IndexerError::EmbeddingProvider {
            kind: http::status_kind(status),
            message: format!("{} API error {}: {}", service, status, body),
        });
    }

    let json: Value = response.json().await.map_err(|e| {
        IndexerError::embedding_permanent(format!("{} returned invalid JSON: {}", service, e))
    })?;
    let vectors = parse_openai_response(&json, expected)?;
    for vector in &vectors {
        check_dims(vector, dims)?;
    }
    Ok(vectors)
}

/// Extract `data[].embedding` from an embeddings response, placed by each
/// entry's `index` so the result lines up with the request's inputs.
fn parse_openai_response(json: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            IndexerError::embedding_permanent("invalid embeddings response: missing data array")
        })?;
    if data.len() != expected {
        return Err(IndexerError::embedding_permanent(format!(
            "invalid embeddings response: {} inputs, {} embeddings",
            expected,
            data.len()
        )));
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                IndexerError::embedding_permanent("invalid embeddings response: missing embedding")
            })?;
        let vector = embedding
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    IndexerError::embedding_permanent("invalid embeddings response: non-numeric value")
                })
            })
            .collect::<Result<Vec<f32>>>()?;
        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(vector),
            _ => {
                return Err(IndexerError::embedding_permanent(format!(
                    "invalid embeddings response: bad index {}",
                    index
                )))
            }
        }
    }
    // Every slot is filled: `expected` entries landed on distinct indices.
    Ok(slots.into_iter().flatten().collect())
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            debug!(max_chars, "truncating embedding input");
            &text[..byte_idx]
        }
        None => text,
    }
}

/// Create the configured [`EmbeddingProvider`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"azure_openai"` | [`AzureOpenAIProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> AnyResult<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "azure_openai" => Ok(Arc::new(AzureOpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_embeddings_in_input_order() {
        let json = json!({
            "object": "list",
            "data": [
                { "object": "embedding", "index": 1, "embedding": [2.0, 2.5] },
                { "object": "embedding", "index": 0, "embedding": [0.5, -1.0] }
            ],
            "model": "text-embedding-3-small"
        });
        assert_eq!(
            parse_openai_response(&json, 2).unwrap(),
            vec![vec![0.5, -1.0], vec![2.0, 2.5]]
        );
    }

    #[test]
    fn malformed_response_is_permanent() {
        let err = parse_openai_response(&json!({ "data": [] }), 1).unwrap_err();
        assert!(!err.is_transient());
        let err = parse_openai_response(&json!({ "data": [{ "embedding": ["x"] }] }), 1).unwrap_err();
        assert!(!err.is_transient());
        let dup = json!({ "data": [
            { "index": 0, "embedding": [1.0] },
            { "index": 0, "embedding": [2.0] }
        ] });
        assert!(!parse_openai_response(&dup, 2).unwrap_err().is_transient());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
    }

    #[tokio::test]
    async fn disabled_provider_refuses() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert!(provider.embed("anything").await.is_err());
    }

    #[test]
    fn openai_requires_key() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            model: Some("text-embedding-3-small".into()),
            dims: Some(1536),
            api_key_env: Some("CHIX_TEST_KEY_THAT_IS_NEVER_SET".into()),
            ..EmbeddingConfig::default()
        };
        let err = create_provider(&config).err().unwrap();
        assert!(err.to_string().contains("CHIX_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
