//! Persisted run state used to resume an interrupted or partially failed run.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{CanonicalRecord, IdentityKey};
use super::summary::TargetStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    Done,
    Failed,
}

/// Where a target's pages resume from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    /// Cursor of the next page to fetch. `None` with `exhausted` set means
    /// there is nothing left to fetch.
    pub cursor: Option<String>,
    pub next_page: u32,
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetProgress {
    pub status: ProgressStatus,
    /// Last cursor whose records were sunk
    pub last_cursor: Option<String>,
    pub resume: ResumePoint,
    pub pages_fetched: u32,
}

impl Default for TargetProgress {
    fn default() -> Self {
        Self {
            status: ProgressStatus::InProgress,
            last_cursor: None,
            resume: ResumePoint::default(),
            pages_fetched: 0,
        }
    }
}

/// Resumable state of a run.
///
/// Only written after a batch flush, so a recorded cursor never runs ahead of
/// the records actually sunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub targets: BTreeMap<usize, TargetProgress>,
    #[serde(default)]
    pub sunk_keys: BTreeSet<IdentityKey>,
    /// Records whose batch exhausted its sink retries
    #[serde(default)]
    pub pending: Vec<CanonicalRecord>,
}

impl Checkpoint {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            updated_at: Utc::now(),
            targets: BTreeMap::new(),
            sunk_keys: BTreeSet::new(),
            pending: Vec::new(),
        }
    }

    pub fn progress(&self, index: usize) -> Option<&TargetProgress> {
        self.targets.get(&index)
    }

    pub fn is_done(&self, index: usize) -> bool {
        matches!(self.progress(index), Some(p) if p.status == ProgressStatus::Done)
    }

    pub fn is_failed(&self, index: usize) -> bool {
        matches!(self.progress(index), Some(p) if p.status == ProgressStatus::Failed)
    }

    /// Record that a page's records have been sunk.
    pub fn advance(&mut self, index: usize, page_cursor: Option<String>, resume: ResumePoint) {
        let progress = self.targets.entry(index).or_default();
        progress.last_cursor = page_cursor;
        progress.resume = resume;
        progress.pages_fetched += 1;
    }

    pub fn finish(&mut self, index: usize, status: &TargetStatus) {
        let progress = self.targets.entry(index).or_default();
        progress.status = if status.is_done() {
            ProgressStatus::Done
        } else {
            ProgressStatus::Failed
        };
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::summary::FailureReason;

    #[test]
    fn test_checkpoint_json_shape() {
        let mut checkpoint = Checkpoint::new("run-1");
        checkpoint.advance(
            4,
            None,
            ResumePoint {
                cursor: Some("30".into()),
                next_page: 1,
                exhausted: false,
            },
        );
        checkpoint.finish(
            5,
            &TargetStatus::Failed {
                reason: FailureReason::Cancelled,
            },
        );
        checkpoint.sunk_keys.insert(IdentityKey::Composite("ab".into()));

        let json = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(json["targets"]["4"]["resume"]["cursor"], "30");
        assert_eq!(json["targets"]["5"]["status"], "failed");
        assert_eq!(json["sunk_keys"][0], "cmp:ab");

        let back: Checkpoint = serde_json::from_value(json).unwrap();
        assert_eq!(back, checkpoint);
        assert!(back.is_failed(5));
        assert!(!back.is_done(4));
    }
}
