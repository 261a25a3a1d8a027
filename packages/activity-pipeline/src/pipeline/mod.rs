//! The crawl pipeline.
//!
//! Stages, in order: enumerate targets, fetch pages, parse entries, validate
//! records, deduplicate across targets, emit batches to the sink.

pub mod collector;
pub mod coordinator;
pub mod dedup;
pub mod fetch;
pub mod parse;
pub mod schema;
pub mod sink;
pub mod targets;
pub mod validate;

pub use collector::{Collector, CollectorOutcome, WorkerMessage};
pub use coordinator::{Pipeline, RunMode};
pub use dedup::{Deduplicator, Ingested};
pub use fetch::{FetchClient, PageOutcome, TargetPages};
pub use parse::{parse, parse_duration_minutes};
pub use sink::{Ack, Delivery, EmitOutcome, SinkAdapter};
pub use targets::{load_catalogue, TargetEnumerator, Targets};
pub use validate::validate;
