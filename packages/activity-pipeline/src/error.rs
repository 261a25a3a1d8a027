//! Typed errors for the activity pipeline.
//!
//! Per-page and per-record failures ([`FetchError`], [`ParseError`],
//! [`ValidationError`]) are counted and logged. Only [`PipelineError`] halts a
//! run.

use std::time::Duration;

use thiserror::Error;

use crate::types::summary::RunSummary;

/// Failure fetching a single page from the upstream.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// A later attempt may succeed
    #[error("transient fetch failure: {0}")]
    Transient(TransientKind),

    /// The page is skipped
    #[error("permanent fetch failure: {0}")]
    Permanent(PermanentKind),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransientKind {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error {status}")]
    ServerError { status: u16 },

    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PermanentKind {
    #[error("client error {status}")]
    ClientError { status: u16 },

    #[error("malformed response envelope: {0}")]
    MalformedEnvelope(String),

    #[error("gave up after {attempts} attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: TransientKind },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The admission pool was closed while waiting for a permit
    #[error("admission closed")]
    AdmissionClosed,
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    /// Upstream-provided delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Transient(TransientKind::RateLimited { retry_after }) => *retry_after,
            _ => None,
        }
    }
}

/// A page that could not be decoded. Non-fatal; counted as a parse error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    /// Payload does not have the expected top-level shape
    #[error("unexpected envelope: {0}")]
    Envelope(String),

    /// Envelope is fine but the activity list is not decodable
    #[error("schema mismatch: {0}")]
    Schema(String),
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing description")]
    MissingDescription,

    #[error("missing location")]
    MissingLocation,
}

/// Failure reported by an external collaborator (embedding, vector, backup).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    /// Service unreachable, overloaded or timing out
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// Request understood and refused
    #[error("collaborator rejected request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SinkError {
    #[error("retryable sink error: {0}")]
    Retryable(String),

    #[error("fatal sink error: {0}")]
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {field} {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read catalogue {path}: {source}")]
    Catalogue {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalogue: {0}")]
    CatalogueFormat(#[from] serde_json::Error),
}

/// Errors that halt a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Cancellation was requested; everything already validated was flushed
    #[error("run cancelled")]
    RunCancelled { summary: Box<RunSummary> },

    /// A batch was rejected in a way retrying cannot fix
    #[error("sink rejected batch: {source}")]
    SinkFatal {
        #[source]
        source: SinkError,
        summary: Box<RunSummary>,
    },

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Summary of the work done before the run halted, if it got that far.
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            PipelineError::RunCancelled { summary } | PipelineError::SinkFatal { summary, .. } => {
                Some(summary)
            }
            _ => None,
        }
    }
}

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for collaborator calls.
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Result type alias for checkpoint operations.
pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

/// Result type alias for pipeline runs.
pub type Result<T> = std::result::Result<T, PipelineError>;
