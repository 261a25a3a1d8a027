//! Testing utilities: scripted upstream, failing collaborators and fixtures.
//!
//! Useful for exercising the pipeline without network access.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{
    CheckpointResult, CollaboratorError, CollaboratorResult, FetchError, FetchResult, PermanentKind,
};
use crate::pipeline::validate::validate;
use crate::sinks::memory::{MemoryEmbedder, MemoryVectorStore};
use crate::traits::checkpoint::CheckpointStore;
use crate::traits::sink::{BackupStore, EmbeddingService, VectorRecord, VectorStore};
use crate::traits::upstream::Upstream;
use crate::types::checkpoint::Checkpoint;
use crate::types::record::{CandidateRecord, CanonicalRecord, Location};
use crate::types::target::CrawlTarget;

#[derive(Debug, Clone)]
enum Scripted {
    Body(String),
    Failure(FetchError),
}

/// Record of a request made to the mock upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub target: String,
    pub cursor: Option<String>,
}

/// Upstream that answers from scripted responses.
///
/// Responses are keyed by target label ("city/category") and cursor. Each
/// request consumes the next scripted response for its key; the last one is
/// repeated once the queue is down to it. Unscripted requests get a 404.
///
/// Clones share state, so a test can keep a handle after moving the mock
/// into a pipeline.
#[derive(Clone, Default)]
pub struct MockUpstream {
    scripts: Arc<RwLock<HashMap<(String, Option<String>), VecDeque<Scripted>>>>,
    delay: Option<Duration>,
    offset_cursors: bool,
    cancel_after: Option<(usize, CancellationToken)>,
    calls: Arc<RwLock<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(self, label: &str, cursor: Option<&str>, response: Scripted) -> Self {
        self.scripts
            .write()
            .unwrap()
            .entry((label.to_string(), cursor.map(String::from)))
            .or_default()
            .push_back(response);
        self
    }

    /// Script a response body.
    pub fn with_body(self, label: &str, cursor: Option<&str>, body: impl Into<String>) -> Self {
        self.script(label, cursor, Scripted::Body(body.into()))
    }

    /// Script a page built with [`listing`].
    pub fn with_page(self, label: &str, cursor: Option<&str>, body: String) -> Self {
        self.with_body(label, cursor, body)
    }

    /// Script a failure.
    pub fn with_failure(self, label: &str, cursor: Option<&str>, error: FetchError) -> Self {
        self.script(label, cursor, Scripted::Failure(error))
    }

    /// Delay every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Treat cursors as numeric offsets so failed pages can be stepped over.
    pub fn with_offset_cursors(mut self) -> Self {
        self.offset_cursors = true;
        self
    }

    /// Cancel `token` once `calls` requests have been answered.
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    /// All requests made so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.read().unwrap().clone()
    }

    /// Requests made for one target.
    pub fn calls_for(&self, label: &str) -> usize {
        self.calls().iter().filter(|c| c.target == label).count()
    }

    /// Highest number of concurrent requests observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, label: &str, cursor: Option<&str>) -> Option<Scripted> {
        let mut scripts = self.scripts.write().unwrap();
        let queue = scripts.get_mut(&(label.to_string(), cursor.map(String::from)))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn request_page(
        &self,
        target: &CrawlTarget,
        cursor: Option<&str>,
        _page_size: u32,
    ) -> FetchResult<String> {
        let label = target.label();
        self.calls.write().unwrap().push(MockCall {
            target: label.clone(),
            cursor: cursor.map(String::from),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some((after, token)) = &self.cancel_after {
            if self.calls.read().unwrap().len() >= *after {
                token.cancel();
            }
        }

        match self.next_response(&label, cursor) {
            Some(Scripted::Body(body)) => Ok(body),
            Some(Scripted::Failure(error)) => Err(error),
            None => Err(FetchError::Permanent(PermanentKind::ClientError { status: 404 })),
        }
    }

    fn skip_cursor(&self, cursor: Option<&str>, page_size: u32, total: Option<u64>) -> Option<String> {
        if !self.offset_cursors {
            return None;
        }
        let offset: u64 = cursor.map_or(Some(0), |c| c.parse().ok())?;
        let next = offset + u64::from(page_size);
        match total {
            Some(total) if next >= total => None,
            _ => Some(next.to_string()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Embedder that fails its first `n` calls as unavailable.
pub struct FlakyEmbedder {
    inner: MemoryEmbedder,
    failures_left: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn failing(n: usize) -> Self {
        Self {
            inner: MemoryEmbedder::default(),
            failures_left: AtomicUsize::new(n),
        }
    }
}

#[async_trait]
impl EmbeddingService for FlakyEmbedder {
    async fn embed(&self, texts: &[String]) -> CollaboratorResult<Vec<Vec<f32>>> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CollaboratorError::Unavailable("embedding service overloaded".into()));
        }
        self.inner.embed(texts).await
    }
}

/// Vector store that fails its first `n` upserts with a given error.
pub struct FlakyVectorStore {
    pub inner: MemoryVectorStore,
    failures_left: AtomicUsize,
    error: CollaboratorError,
}

impl FlakyVectorStore {
    pub fn unavailable(n: usize) -> Self {
        Self {
            inner: MemoryVectorStore::new(),
            failures_left: AtomicUsize::new(n),
            error: CollaboratorError::Unavailable("vector store unavailable".into()),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            inner: MemoryVectorStore::new(),
            failures_left: AtomicUsize::new(usize::MAX),
            error: CollaboratorError::Rejected("metadata schema violation".into()),
        }
    }
}

#[async_trait]
impl VectorStore for FlakyVectorStore {
    async fn upsert(&self, namespace: &str, vectors: &[VectorRecord]) -> CollaboratorResult<()> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self.error.clone());
        }
        self.inner.upsert(namespace, vectors).await
    }
}

/// Backup store that always fails.
pub struct FailingBackupStore;

#[async_trait]
impl BackupStore for FailingBackupStore {
    async fn archive(&self, _name: &str, _records: &[CanonicalRecord]) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unavailable("disk full".into()))
    }
}

/// Checkpoint store whose saves fail.
pub struct FailingCheckpointStore;

#[async_trait]
impl CheckpointStore for FailingCheckpointStore {
    async fn load(&self) -> CheckpointResult<Option<Checkpoint>> {
        Ok(None)
    }

    async fn save(&self, _checkpoint: &Checkpoint) -> CheckpointResult<()> {
        Err(std::io::Error::other("read-only filesystem").into())
    }
}

/// An upstream activity entry with every required field.
pub fn activity(id: u64, name: &str, latitude: f64, longitude: f64) -> Value {
    json!({
        "locationId": id,
        "name": name,
        "description": format!("{name} is worth a visit."),
        "latitude": latitude,
        "longitude": longitude,
        "tags": "Sights • Landmarks",
    })
}

/// A response body holding `items`, continuing at `next_cursor` if given.
pub fn listing(items: Vec<Value>, next_cursor: Option<&str>) -> String {
    json!({
        "data": {
            "activities": {
                "items": items,
                "pageInfo": {
                    "nextCursor": next_cursor,
                    "hasNextPage": next_cursor.is_some(),
                }
            }
        }
    })
    .to_string()
}

/// A canonical record for `city` with external id `id`.
pub fn canonical(id: &str, city: &str) -> CanonicalRecord {
    let record = validate(CandidateRecord {
        source: "tripadvisor".into(),
        external_id: Some(id.into()),
        title: format!("Activity {id}"),
        description: Some(format!("Activity {id} in {city}")),
        location: Some(Location::from_coordinates(38.7, -9.1)),
        city: city.into(),
        country: "Portugal".into(),
        namespace: format!("{}-portugal", city.to_lowercase()),
        category: "attractions".into(),
        ..Default::default()
    })
    .unwrap();

    CanonicalRecord {
        key: record.identity_key(),
        record,
    }
}
