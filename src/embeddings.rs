//! Embedding gateway - provider-agnostic vector generation
//!
//! One HTTP client speaking to any of the supported providers. Response
//! decoding tolerates every known payload shape; a provider failure is a
//! structured `Embedding` error the caller may degrade on (semantic search
//! falls back to text search, ingestion skips vectors for affected rows).

use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{CieError, Result};

/// Supported embedding providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Ollama,
    OpenAi,
    Nomic,
    LlamaCpp,
    /// Deterministic vectors for tests and offline runs
    Mock,
}

impl EmbeddingProvider {
    pub fn name(&self) -> &'static str {
        match self {
            EmbeddingProvider::Ollama => "ollama",
            EmbeddingProvider::OpenAi => "openai",
            EmbeddingProvider::Nomic => "nomic",
            EmbeddingProvider::LlamaCpp => "llamacpp",
            EmbeddingProvider::Mock => "mock",
        }
    }
}

/// Configuration for one embedding endpoint
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub url: String,
    pub model: String,
    pub dimension: usize,
}

impl EmbeddingConfig {
    pub fn mock(dimension: usize) -> Self {
        Self {
            provider: EmbeddingProvider::Mock,
            url: String::new(),
            model: "mock".to_string(),
            dimension,
        }
    }
}

/// Client for embedding generation
pub struct EmbeddingClient {
    config: EmbeddingConfig,
    http: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| CieError::Embedding {
                provider: config.provider.name().to_string(),
                status: None,
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    /// Prefix a search query according to the model family. Document-side
    /// text is embedded raw.
    pub fn preprocess_query(&self, query: &str) -> String {
        let model = self.config.model.to_lowercase();
        if model.contains("qodo") {
            format!("Instruct: {query}")
        } else if model.contains("nomic") || model.contains("text-embedding") {
            format!("search_query: {query}")
        } else {
            query.to_string()
        }
    }

    /// Generate one embedding vector
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.config.provider == EmbeddingProvider::Mock {
            return Ok(mock_vector(text, self.config.dimension));
        }

        let (endpoint, body) = self.request_parts(text);
        let response = self
            .http
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.error(None, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(self.error(
                Some(status.as_u16()),
                format!("provider returned {status}: {message}"),
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| self.error(Some(status.as_u16()), format!("invalid json: {e}")))?;
        parse_embedding_response(&payload)
            .ok_or_else(|| self.error(Some(status.as_u16()), "unrecognized response shape".into()))
    }

    /// Embed many texts, tolerating per-item failures. Used by ingestion,
    /// which persists metadata even when vectors are unavailable.
    pub async fn embed_batch(&self, texts: &[(String, String)]) -> Vec<(String, Vec<f32>)> {
        let mut out = Vec::with_capacity(texts.len());
        for (id, text) in texts {
            match self.embed(text).await {
                Ok(vector) => out.push((id.clone(), vector)),
                Err(e) => debug!(id, error = %e, "skipping embedding for row"),
            }
        }
        out
    }

    fn request_parts(&self, text: &str) -> (String, Value) {
        let base = self.config.url.trim_end_matches('/');
        match self.config.provider {
            EmbeddingProvider::Ollama => (
                format!("{base}/api/embeddings"),
                json!({ "model": self.config.model, "prompt": text }),
            ),
            EmbeddingProvider::OpenAi | EmbeddingProvider::Nomic => (
                format!("{base}/v1/embeddings"),
                json!({ "model": self.config.model, "input": [text] }),
            ),
            EmbeddingProvider::LlamaCpp => (
                format!("{base}/embedding"),
                json!({ "content": text }),
            ),
            EmbeddingProvider::Mock => unreachable!("mock short-circuits before http"),
        }
    }

    fn error(&self, status: Option<u16>, message: String) -> CieError {
        CieError::Embedding {
            provider: self.config.provider.name().to_string(),
            status,
            message,
        }
    }
}

/// Decode any of the three known response shapes:
/// `{embedding: [...]}`, `{data: [{embedding: [...]}]}`, and
/// `[{embedding: [[...]]}]`.
pub fn parse_embedding_response(payload: &Value) -> Option<Vec<f32>> {
    if let Some(embedding) = payload.get("embedding") {
        return float_vec(embedding);
    }
    if let Some(first) = payload
        .get("data")
        .and_then(Value::as_array)
        .and_then(|data| data.first())
    {
        return first.get("embedding").and_then(float_vec);
    }
    if let Some(first) = payload.as_array().and_then(|items| items.first()) {
        let embedding = first.get("embedding")?;
        // This shape nests the vector one level deeper
        if let Some(inner) = embedding.as_array().and_then(|rows| rows.first()) {
            if inner.is_array() {
                return float_vec(inner);
            }
        }
        return float_vec(embedding);
    }
    None
}

fn float_vec(value: &Value) -> Option<Vec<f32>> {
    let items = value.as_array()?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(item.as_f64()? as f32);
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Deterministic pseudo-embedding: stable per input text, unit-normalized
fn mock_vector(text: &str, dimension: usize) -> Vec<f32> {
    let mut state: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.bytes() {
        state ^= byte as u64;
        state = state.wrapping_mul(0x1000_0000_01b3);
    }
    let mut out = Vec::with_capacity(dimension);
    for i in 0..dimension {
        let x = state.wrapping_add((i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        out.push(((x % 2000) as f32 / 1000.0) - 1.0);
    }
    let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut out {
            *x /= norm;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_flat_embedding_shape() {
        let payload = json!({ "embedding": [0.1, 0.2, 0.3] });
        assert_eq!(
            parse_embedding_response(&payload),
            Some(vec![0.1, 0.2, 0.3])
        );
    }

    #[test]
    fn parses_openai_data_shape() {
        let payload = json!({ "data": [ { "embedding": [1.0, 2.0] } ], "model": "x" });
        assert_eq!(parse_embedding_response(&payload), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn parses_llamacpp_nested_array_shape() {
        let payload = json!([ { "embedding": [[0.5, 0.6]] } ]);
        assert_eq!(parse_embedding_response(&payload), Some(vec![0.5, 0.6]));
    }

    #[test]
    fn rejects_unknown_shapes() {
        assert_eq!(parse_embedding_response(&json!({ "vectors": [1.0] })), None);
        assert_eq!(parse_embedding_response(&json!({ "embedding": [] })), None);
        assert_eq!(parse_embedding_response(&json!("nope")), None);
    }

    #[test]
    fn mock_vectors_are_deterministic_and_sized() {
        let a = mock_vector("func main()", 8);
        let b = mock_vector("func main()", 8);
        let c = mock_vector("def main():", 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn mock_provider_embeds_without_network() {
        let client = EmbeddingClient::new(EmbeddingConfig::mock(16)).unwrap();
        let vector = client.embed("hello").await.unwrap();
        assert_eq!(vector.len(), 16);
    }

    #[test]
    fn query_prefixes_follow_model_family() {
        let qodo = EmbeddingClient::new(EmbeddingConfig {
            provider: EmbeddingProvider::Ollama,
            url: "http://localhost:11434".into(),
            model: "Qodo-Embed-1".into(),
            dimension: 768,
        })
        .unwrap();
        assert_eq!(qodo.preprocess_query("find auth"), "Instruct: find auth");

        let nomic = EmbeddingClient::new(EmbeddingConfig {
            provider: EmbeddingProvider::Nomic,
            url: "http://localhost".into(),
            model: "nomic-embed-text".into(),
            dimension: 768,
        })
        .unwrap();
        assert_eq!(
            nomic.preprocess_query("find auth"),
            "search_query: find auth"
        );

        let mock = EmbeddingClient::new(EmbeddingConfig::mock(4)).unwrap();
        assert_eq!(mock.preprocess_query("find auth"), "find auth");
    }
}
