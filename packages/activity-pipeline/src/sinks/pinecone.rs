//! Pinecone vector store adapter.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use super::classify_status;
use crate::error::{CollaboratorError, CollaboratorResult};
use crate::traits::sink::{VectorRecord, VectorStore};

const MAX_VECTORS_PER_UPSERT: usize = 100;

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    namespace: &'a str,
}

/// Upserts into one Pinecone index through its data-plane host.
pub struct PineconeStore {
    http_client: reqwest::Client,
    api_key: String,
    /// Index host, e.g. `https://activities-abc123.svc.us-east1-gcp.pinecone.io`
    host: String,
}

impl PineconeStore {
    pub fn new(api_key: impl Into<String>, host: impl Into<String>) -> CollaboratorResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CollaboratorError::Rejected(format!("invalid HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            host: host.into().trim_end_matches('/').to_string(),
        })
    }

    async fn upsert_chunk(&self, namespace: &str, vectors: &[VectorRecord]) -> CollaboratorResult<()> {
        let response = self
            .http_client
            .post(format!("{}/vectors/upsert", self.host))
            .header("Api-Key", &self.api_key)
            .json(&UpsertRequest { vectors, namespace })
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, namespace, "Pinecone upsert request failed");
                CollaboratorError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), namespace, error = %body, "Pinecone upsert error");
            return Err(classify_status(status, body));
        }

        Ok(())
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn upsert(&self, namespace: &str, vectors: &[VectorRecord]) -> CollaboratorResult<()> {
        for chunk in vectors.chunks(MAX_VECTORS_PER_UPSERT) {
            self.upsert_chunk(namespace, chunk).await?;
        }
        tracing::debug!(namespace, vectors = vectors.len(), "Upserted vectors");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;

    #[test]
    fn test_upsert_body() {
        let mut metadata = Map::new();
        metadata.insert("city".into(), "Lisbon".into());
        let vectors = vec![VectorRecord {
            id: "ext:tripadvisor:1".into(),
            values: vec![0.5, -0.5],
            metadata,
        }];

        let body = serde_json::to_value(UpsertRequest {
            vectors: &vectors,
            namespace: "lisbon-portugal",
        })
        .unwrap();

        assert_eq!(body["namespace"], "lisbon-portugal");
        assert_eq!(body["vectors"][0]["id"], "ext:tripadvisor:1");
        assert_eq!(body["vectors"][0]["metadata"]["city"], "Lisbon");
    }

    #[test]
    fn test_host_trailing_slash_is_trimmed() {
        let store = PineconeStore::new("key", "https://index.example.io/").unwrap();
        assert_eq!(store.host, "https://index.example.io");
    }
}
