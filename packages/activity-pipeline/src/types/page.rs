//! Raw upstream pages.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::target::CrawlTarget;

/// One successfully fetched page, before parsing.
///
/// Owned by the worker that fetched it and dropped once parsed.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// Name of the upstream that produced the page
    pub source: String,

    pub target: CrawlTarget,

    /// Zero-based position of the page within the target
    pub page_index: u32,

    /// Cursor the page was requested with
    pub cursor: Option<String>,

    /// Decoded response envelope
    pub payload: Value,

    /// Cursor of the following page, if the upstream reported one
    pub next_cursor: Option<String>,

    /// Whether the upstream reported more pages
    pub has_next_page: bool,

    pub total_results: Option<u64>,

    pub fetched_at: DateTime<Utc>,
}

impl RawPage {
    pub fn new(source: impl Into<String>, target: CrawlTarget, page_index: u32, payload: Value) -> Self {
        Self {
            source: source.into(),
            target,
            page_index,
            cursor: None,
            payload,
            next_cursor: None,
            has_next_page: false,
            total_results: None,
            fetched_at: Utc::now(),
        }
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_next_cursor(mut self, next_cursor: Option<String>) -> Self {
        self.has_next_page = next_cursor.is_some();
        self.next_cursor = next_cursor;
        self
    }
}
