//! Sink adapter: hands canonical batches to the embedding service, the vector
//! store and the backup store.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{CollaboratorError, SinkError};
use crate::traits::sink::{BackupStore, EmbeddingService, VectorRecord, VectorStore};
use crate::types::config::{MetadataDefaults, RetryPolicy};
use crate::types::record::CanonicalRecord;

/// Acknowledgement of a sunk batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ack {
    pub records: usize,
    pub namespaces: usize,
}

/// What happened to a batch after retries.
#[derive(Debug, Clone, PartialEq)]
pub enum EmitOutcome {
    Sunk(Ack),
    /// Retries exhausted; the records should be re-emitted later
    Pending(SinkError),
    /// Retrying cannot help; the run must stop
    Fatal(SinkError),
}

/// Result of delivering a batch to every collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub outcome: EmitOutcome,
    pub backup_failed: bool,
}

pub struct SinkAdapter {
    embedder: Arc<dyn EmbeddingService>,
    vectors: Arc<dyn VectorStore>,
    backup: Arc<dyn BackupStore>,
    retry: RetryPolicy,
    defaults: MetadataDefaults,
}

impl SinkAdapter {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        vectors: Arc<dyn VectorStore>,
        backup: Arc<dyn BackupStore>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            backup,
            retry: RetryPolicy::default(),
            defaults: MetadataDefaults::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metadata_defaults(mut self, defaults: MetadataDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Embed the batch and upsert it, one upsert per namespace.
    ///
    /// Embedding failures are always retryable. Vector-store failures are
    /// retryable unless the store rejected the request.
    pub async fn emit(&self, batch: &[CanonicalRecord]) -> Result<Ack, SinkError> {
        if batch.is_empty() {
            return Ok(Ack::default());
        }

        let texts: Vec<String> = batch.iter().map(CanonicalRecord::embedding_text).collect();
        let embeddings = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| SinkError::Retryable(format!("embedding failed: {e}")))?;

        if embeddings.len() != batch.len() {
            return Err(SinkError::Retryable(format!(
                "embedding service returned {} vectors for {} records",
                embeddings.len(),
                batch.len()
            )));
        }

        let mut by_namespace: BTreeMap<&str, Vec<VectorRecord>> = BTreeMap::new();
        for (record, values) in batch.iter().zip(embeddings) {
            by_namespace
                .entry(record.record.namespace.as_str())
                .or_default()
                .push(VectorRecord {
                    id: record.key.to_string(),
                    values,
                    metadata: self.metadata(record),
                });
        }

        for (namespace, vectors) in &by_namespace {
            self.vectors
                .upsert(namespace, vectors)
                .await
                .map_err(|e| match e {
                    CollaboratorError::Unavailable(msg) => {
                        SinkError::Retryable(format!("vector store unavailable ({namespace}): {msg}"))
                    }
                    CollaboratorError::Rejected(msg) => {
                        SinkError::Fatal(format!("vector store rejected batch ({namespace}): {msg}"))
                    }
                })?;
        }

        Ok(Ack {
            records: batch.len(),
            namespaces: by_namespace.len(),
        })
    }

    /// [`Self::emit`] with batch-level retries and backoff.
    pub async fn emit_with_retry(&self, name: &str, batch: &[CanonicalRecord]) -> EmitOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.emit(batch).await {
                Ok(ack) => {
                    tracing::debug!(batch = name, records = ack.records, attempt, "Batch sunk");
                    return EmitOutcome::Sunk(ack);
                }
                Err(fatal @ SinkError::Fatal(_)) => {
                    tracing::error!(batch = name, error = %fatal, "Batch rejected");
                    return EmitOutcome::Fatal(fatal);
                }
                Err(err) if attempt >= self.retry.max_attempts => {
                    tracing::warn!(
                        batch = name,
                        records = batch.len(),
                        attempts = attempt,
                        error = %err,
                        "Sink retries exhausted, batch left pending"
                    );
                    return EmitOutcome::Pending(err);
                }
                Err(err) => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        batch = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retryable sink error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Archive the batch and emit it. The backup runs alongside emission and
    /// its failure only gets logged.
    pub async fn deliver(&self, name: &str, batch: &[CanonicalRecord]) -> Delivery {
        let (archived, outcome) =
            tokio::join!(self.backup.archive(name, batch), self.emit_with_retry(name, batch));

        let backup_failed = match archived {
            Ok(()) => false,
            Err(e) => {
                tracing::warn!(batch = name, records = batch.len(), error = %e, "Backup failed");
                true
            }
        };

        Delivery {
            outcome,
            backup_failed,
        }
    }

    /// Flattened record fields for the vector store. Unset optional fields are
    /// omitted, except rating, duration and review count which fall back to
    /// the configured defaults.
    pub fn metadata(&self, canonical: &CanonicalRecord) -> Map<String, Value> {
        let r = &canonical.record;
        let mut meta = Map::new();

        meta.insert("key".into(), canonical.key.to_string().into());
        meta.insert("source".into(), r.source.clone().into());
        meta.insert("name".into(), r.title.clone().into());
        meta.insert("description".into(), r.description().into());
        meta.insert("city".into(), r.city.clone().into());
        meta.insert("country".into(), r.country.clone().into());
        meta.insert("category".into(), r.category.clone().into());
        meta.insert("tags".into(), r.tags.clone().into());
        meta.insert("rating".into(), r.rating.unwrap_or(self.defaults.rating).into());
        meta.insert(
            "review_count".into(),
            r.review_count.unwrap_or(self.defaults.review_count).into(),
        );
        meta.insert(
            "duration".into(),
            r.duration_minutes.unwrap_or(self.defaults.duration_minutes).into(),
        );

        let location = r.location();
        if let Some((lat, lng)) = location.coordinates() {
            meta.insert("latitude".into(), lat.into());
            meta.insert("longitude".into(), lng.into());
        }

        let optional = [
            ("external_id", r.external_id.as_deref()),
            ("address", location.address()),
            ("zip_code", location.postal_code.as_deref()),
            ("type", r.kind.as_deref()),
            ("website", r.website.as_deref()),
            ("url", r.source_url.as_deref()),
            ("image_url", r.image_url.as_deref()),
            ("hours", r.hours.as_deref()),
        ];
        for (field, value) in optional {
            if let Some(value) = value {
                meta.insert(field.into(), value.into());
            }
        }

        meta
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::sinks::memory::{MemoryBackupStore, MemoryEmbedder, MemoryVectorStore};
    use crate::testing::{canonical, FailingBackupStore, FlakyEmbedder};
    use crate::traits::sink::MockVectorStore;

    fn adapter(vectors: Arc<dyn VectorStore>) -> SinkAdapter {
        SinkAdapter::new(
            Arc::new(MemoryEmbedder::default()),
            vectors,
            Arc::new(MemoryBackupStore::new()),
        )
        .with_retry(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn test_batch_is_grouped_by_namespace() {
        let store = Arc::new(MemoryVectorStore::new());
        let sink = adapter(store.clone());

        let batch = vec![
            canonical("1", "Lisbon"),
            canonical("2", "Porto"),
            canonical("3", "Lisbon"),
        ];
        let ack = sink.emit(&batch).await.unwrap();

        assert_eq!(ack, Ack { records: 3, namespaces: 2 });
        assert_eq!(store.upsert_calls(), 2);
        assert_eq!(store.namespaces(), vec!["lisbon-portugal", "porto-portugal"]);
        assert!(store.get("lisbon-portugal", "ext:tripadvisor:3").is_some());
    }

    #[tokio::test]
    async fn test_rejection_is_fatal_without_retry() {
        let mut store = MockVectorStore::new();
        store
            .expect_upsert()
            .times(1)
            .returning(|_, _| Err(CollaboratorError::Rejected("bad dimension".into())));
        let sink = adapter(Arc::new(store));

        let outcome = sink.emit_with_retry("b1", &[canonical("1", "Lisbon")]).await;
        assert!(matches!(outcome, EmitOutcome::Fatal(SinkError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_unavailable_store_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut store = MockVectorStore::new();
        store.expect_upsert().times(2).returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CollaboratorError::Unavailable("503".into()))
            } else {
                Ok(())
            }
        });
        let sink = adapter(Arc::new(store));

        let outcome = sink.emit_with_retry("b1", &[canonical("1", "Lisbon")]).await;
        assert_eq!(outcome, EmitOutcome::Sunk(Ack { records: 1, namespaces: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_embedding_failures_exhaust_into_pending() {
        let store = Arc::new(MemoryVectorStore::new());
        let sink = SinkAdapter::new(
            Arc::new(FlakyEmbedder::failing(usize::MAX)),
            store.clone(),
            Arc::new(MemoryBackupStore::new()),
        )
        .with_retry(RetryPolicy::immediate(2));

        let outcome = sink.emit_with_retry("b1", &[canonical("1", "Lisbon")]).await;
        assert!(matches!(outcome, EmitOutcome::Pending(SinkError::Retryable(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_backup_failure_does_not_block_emission() {
        let store = Arc::new(MemoryVectorStore::new());
        let sink = SinkAdapter::new(
            Arc::new(MemoryEmbedder::default()),
            store.clone(),
            Arc::new(FailingBackupStore),
        );

        let delivery = sink.deliver("b1", &[canonical("1", "Lisbon")]).await;
        assert!(delivery.backup_failed);
        assert!(matches!(delivery.outcome, EmitOutcome::Sunk(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_metadata_applies_defaults_and_omits_unset() {
        let sink = adapter(Arc::new(MemoryVectorStore::new()));
        let meta = sink.metadata(&canonical("9", "Lisbon"));

        assert_eq!(meta["rating"], 2.5);
        assert_eq!(meta["duration"], 45);
        assert_eq!(meta["review_count"], 0);
        assert_eq!(meta["city"], "Lisbon");
        assert!(!meta.contains_key("website"));
        assert!(meta.values().all(|v| !v.is_null()));
    }
}
