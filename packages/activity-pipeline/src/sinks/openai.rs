//! OpenAI embeddings adapter.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::classify_status;
use crate::error::{CollaboratorError, CollaboratorResult};
use crate::traits::sink::EmbeddingService;

pub const DEFAULT_MODEL: &str = "text-embedding-ada-002";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_INPUTS_PER_REQUEST: usize = 100;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    /// Vectors in input order; the API may answer out of order.
    fn into_vectors(mut self) -> Vec<Vec<f32>> {
        self.data.sort_by_key(|d| d.index);
        self.data.into_iter().map(|d| d.embedding).collect()
    }
}

pub struct OpenAiEmbedder {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>) -> CollaboratorResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CollaboratorError::Rejected(format!("invalid HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn embed_chunk(&self, texts: &[String]) -> CollaboratorResult<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .http_client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Embedding request failed");
                CollaboratorError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), error = %body, "OpenAI embedding error");
            return Err(classify_status(status, body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("unreadable embedding response: {e}")))?;

        Ok(parsed.into_vectors())
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> CollaboratorResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_INPUTS_PER_REQUEST) {
            vectors.extend(self.embed_chunk(chunk).await?);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_is_reordered_by_index() {
        let parsed: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"index":2,"embedding":[3.0]},{"index":0,"embedding":[1.0]},{"index":1,"embedding":[2.0]}],"model":"m"}"#,
        )
        .unwrap();
        assert_eq!(parsed.into_vectors(), vec![vec![1.0], vec![2.0], vec![3.0]]);
    }

    #[test]
    fn test_request_body() {
        let input = vec!["a".to_string(), "b".to_string()];
        let body = serde_json::to_value(EmbeddingRequest {
            model: DEFAULT_MODEL,
            input: &input,
        })
        .unwrap();
        assert_eq!(body["model"], "text-embedding-ada-002");
        assert_eq!(body["input"][1], "b");
    }
}
