//! In-memory collaborators for dry runs and tests.
//!
//! Nothing here survives the process.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::CollaboratorResult;
use crate::traits::sink::{BackupStore, EmbeddingService, VectorRecord, VectorStore};
use crate::types::record::CanonicalRecord;

/// Deterministic embedder: vectors are derived from a SHA-256 of the text.
pub struct MemoryEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl Default for MemoryEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

impl MemoryEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn embedding_for(&self, text: &str) -> Vec<f32> {
        let hash = Sha256::digest(text.as_bytes());
        (0..self.dimension)
            .map(|i| (hash[i % 32] as f32 / 127.5) - 1.0)
            .collect()
    }
}

#[async_trait]
impl EmbeddingService for MemoryEmbedder {
    async fn embed(&self, texts: &[String]) -> CollaboratorResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.embedding_for(t)).collect())
    }
}

/// Vector store keyed by namespace, then id. Upserts overwrite.
#[derive(Default)]
pub struct MemoryVectorStore {
    namespaces: RwLock<BTreeMap<String, BTreeMap<String, VectorRecord>>>,
    upserts: AtomicUsize,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total vectors across namespaces.
    pub fn len(&self) -> usize {
        self.read(|ns| ns.values().map(BTreeMap::len).sum())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, namespace: &str, id: &str) -> Option<VectorRecord> {
        self.read(|ns| ns.get(namespace).and_then(|v| v.get(id)).cloned())
    }

    /// All ids, as "namespace/id".
    pub fn ids(&self) -> Vec<String> {
        self.read(|ns| {
            ns.iter()
                .flat_map(|(name, vectors)| vectors.keys().map(move |id| format!("{name}/{id}")))
                .collect()
        })
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.read(|ns| ns.keys().cloned().collect())
    }

    /// Number of upsert calls received.
    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    fn read<T>(&self, f: impl FnOnce(&BTreeMap<String, BTreeMap<String, VectorRecord>>) -> T) -> T {
        let guard = self.namespaces.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, namespace: &str, vectors: &[VectorRecord]) -> CollaboratorResult<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        let space = guard.entry(namespace.to_string()).or_default();
        for vector in vectors {
            space.insert(vector.id.clone(), vector.clone());
        }
        Ok(())
    }
}

/// Backup store that keeps every archived batch.
#[derive(Default)]
pub struct MemoryBackupStore {
    archives: RwLock<Vec<(String, Vec<CanonicalRecord>)>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn archive_names(&self) -> Vec<String> {
        self.archives
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Total records archived across batches.
    pub fn record_count(&self) -> usize {
        self.archives
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, records)| records.len())
            .sum()
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn archive(&self, name: &str, records: &[CanonicalRecord]) -> CollaboratorResult<()> {
        self.archives
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_string(), records.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let store = MemoryVectorStore::new();
        let vector = |v: f32| VectorRecord {
            id: "ext:tripadvisor:1".into(),
            values: vec![v],
            metadata: Map::new(),
        };

        store.upsert("lisbon", &[vector(1.0)]).await.unwrap();
        store.upsert("lisbon", &[vector(2.0)]).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("lisbon", "ext:tripadvisor:1").unwrap().values, vec![2.0]);
        assert_eq!(store.upsert_calls(), 2);
    }

    #[tokio::test]
    async fn test_embedder_is_deterministic() {
        let embedder = MemoryEmbedder::new(4);
        let texts = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[2]);
        assert_ne!(vectors[0], vectors[1]);
        assert_eq!(vectors[0].len(), 4);
    }
}
