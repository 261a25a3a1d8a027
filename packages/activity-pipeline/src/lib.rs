//! Activity Listing Pipeline
//!
//! Crawls a third-party listing provider for every (city, category) target,
//! normalizes the entries into canonical records, removes duplicates across
//! targets and hands the survivors to an embedding + vector store sink.
//!
//! # Usage
//!
//! ```rust,ignore
//! use activity_pipeline::{Pipeline, PipelineConfig, RunMode, SinkAdapter, TargetEnumerator};
//! use activity_pipeline::sinks::{MemoryBackupStore, MemoryEmbedder, MemoryVectorStore};
//! use activity_pipeline::stores::MemoryCheckpointStore;
//!
//! let cities = load_catalogue("cities.json").await?;
//! let targets = TargetEnumerator::new(cities, ["attractions"]);
//! let sink = SinkAdapter::new(
//!     Arc::new(MemoryEmbedder::default()),
//!     Arc::new(MemoryVectorStore::new()),
//!     Arc::new(MemoryBackupStore::new()),
//! );
//! let pipeline = Pipeline::new(
//!     targets,
//!     upstream,
//!     sink,
//!     Arc::new(MemoryCheckpointStore::new()),
//!     PipelineConfig::default(),
//! );
//!
//! let summary = pipeline.run(RunMode::Fresh, CancellationToken::new()).await?;
//! ```
//!
//! # Modules
//!
//! - [`types`] - Targets, pages, records, config, checkpoint and run summary
//! - [`traits`] - Seams for the upstream, the sink collaborators and checkpoint storage
//! - [`pipeline`] - Fetch, parse, validate, dedup, sink and the coordinator
//! - [`upstream`] - TripAdvisor upstream
//! - [`sinks`] - OpenAI embeddings, Pinecone, filesystem backup and in-memory doubles
//! - [`stores`] - File and in-memory checkpoint stores
//! - [`testing`] - Scripted upstream, failing collaborators and fixtures

pub mod error;
pub mod pipeline;
pub mod sinks;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;
pub mod upstream;

pub use error::{
    CheckpointError, CollaboratorError, ConfigError, FetchError, ParseError, PermanentKind,
    PipelineError, Result, SinkError, TransientKind, ValidationError,
};
pub use pipeline::{
    load_catalogue, FetchClient, Pipeline, RunMode, SinkAdapter, TargetEnumerator,
};
pub use traits::{
    checkpoint::CheckpointStore,
    sink::{BackupStore, EmbeddingService, VectorRecord, VectorStore},
    upstream::Upstream,
};
pub use types::{
    checkpoint::{Checkpoint, ProgressStatus, ResumePoint, TargetProgress},
    config::{MetadataDefaults, PipelineConfig, RetryPolicy},
    page::RawPage,
    record::{CandidateRecord, CanonicalRecord, IdentityKey, Location, ValidRecord},
    summary::{FailureReason, RunSummary, TargetCounts, TargetReport, TargetStatus},
    target::{City, CrawlTarget},
};
