//! OpenAI-compatible embeddings client.

use super::{Embedder, normalize};
use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Embedder backed by a remote `/v1/embeddings` endpoint.
///
/// Output vectors are L2-normalized.
#[derive(Clone)]
pub struct ApiEmbedder {
    client: Client,
    config: EmbeddingConfig,
}

impl ApiEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{}/v1/embeddings", base)
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(RagError::Embedding(format!(
                "Request failed ({}): {}",
                status, body
            )));
        }

        let mut parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| RagError::Embedding(format!("Malformed embedding response: {}", e)))?;

        if parsed.data.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // The API may return items out of order; `index` restores input order.
        parsed.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));

        Ok(parsed
            .data
            .into_iter()
            .map(|d| {
                let mut v = d.embedding;
                normalize(&mut v);
                v
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_construction() {
        let embedder = ApiEmbedder::new(EmbeddingConfig {
            api_base: "https://api.example.com/".to_string(),
            ..Default::default()
        });
        assert_eq!(embedder.endpoint(), "https://api.example.com/v1/embeddings");
    }

    #[test]
    fn test_parse_response_shape() {
        let body = r#"{"data": [{"embedding": [0.1, 0.2], "index": 0}], "model": "m"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2]);
    }
}
