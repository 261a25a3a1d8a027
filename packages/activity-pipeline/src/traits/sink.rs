//! External storage collaborators fed by the sink adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CollaboratorResult;
use crate::types::record::CanonicalRecord;

/// Text embedding service.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed each text, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> CollaboratorResult<Vec<Vec<f32>>>;
}

/// One vector-store entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Map<String, Value>,
}

/// Similarity index with upsert semantics: writing an existing id overwrites it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, namespace: &str, vectors: &[VectorRecord]) -> CollaboratorResult<()>;
}

/// Durable archive of sunk batches.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn archive(&self, name: &str, records: &[CanonicalRecord]) -> CollaboratorResult<()>;
}
