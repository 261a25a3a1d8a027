//! Per-target outcomes and run-level totals.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a target is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetPhase {
    Pending,
    Fetching,
    Parsing,
    Validating,
    Done,
    Failed,
}

impl TargetPhase {
    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_advance_to(self, next: TargetPhase) -> bool {
        use TargetPhase::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Pending, Failed)
                | (Fetching, Parsing)
                | (Fetching, Failed)
                | (Fetching, Done)
                | (Parsing, Validating)
                | (Parsing, Fetching)
                | (Validating, Fetching)
                | (Validating, Done)
                | (Validating, Failed)
                | (Parsing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TargetPhase::Done | TargetPhase::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The first page failed permanently; the target contributed nothing
    FirstPageRejected { error: String },

    /// No page of the target could be fetched
    AllPagesFailed { error: String },

    /// Wall-clock budget ran out; pages fetched so far are kept
    BudgetExhausted,

    /// Run was cancelled while the target was in progress
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::FirstPageRejected { error } => write!(f, "first page rejected: {error}"),
            FailureReason::AllPagesFailed { error } => write!(f, "all pages failed: {error}"),
            FailureReason::BudgetExhausted => write!(f, "time budget exhausted"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStatus {
    Done,
    Failed { reason: FailureReason },
}

impl TargetStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, TargetStatus::Done)
    }
}

/// Counts recorded for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCounts {
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub parse_errors: u32,
    pub records_parsed: u64,
    pub records_validated: u64,
    pub missing_description: u64,
    pub missing_location: u64,
    /// Records that survived deduplication
    pub records_deduplicated: u64,
    pub records_suppressed: u64,
}

impl TargetCounts {
    pub fn records_rejected(&self) -> u64 {
        self.missing_description + self.missing_location
    }
}

/// Final report of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub index: usize,
    pub label: String,
    pub status: TargetStatus,
    pub counts: TargetCounts,
    /// Cursor of the last page whose records were handed to the collector
    pub last_cursor: Option<String>,
}

/// A target that ended Failed, kept for a later retry pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTarget {
    pub index: usize,
    pub label: String,
    pub reason: FailureReason,
}

/// Totals of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub targets_planned: usize,
    pub targets_done: usize,
    pub targets_failed: usize,
    /// Targets skipped because a previous run completed them
    pub targets_skipped: usize,
    pub pages_fetched: u64,
    pub pages_failed: u64,
    pub parse_errors: u64,
    pub records_parsed: u64,
    pub records_validated: u64,
    pub records_rejected: u64,
    pub records_deduplicated: u64,
    pub records_suppressed: u64,
    pub batches_sunk: u64,
    pub batches_pending: u64,
    pub records_sunk: u64,
    pub records_pending: u64,
    pub backup_failures: u64,
    pub failed_targets: Vec<FailedTarget>,
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Default::default()
        }
    }

    /// Fold a finished target into the totals.
    pub fn absorb(&mut self, report: &TargetReport) {
        let counts = &report.counts;
        self.pages_fetched += u64::from(counts.pages_fetched);
        self.pages_failed += u64::from(counts.pages_failed);
        self.parse_errors += u64::from(counts.parse_errors);
        self.records_parsed += counts.records_parsed;
        self.records_validated += counts.records_validated;
        self.records_rejected += counts.records_rejected();
        self.records_deduplicated += counts.records_deduplicated;
        self.records_suppressed += counts.records_suppressed;

        match &report.status {
            TargetStatus::Done => self.targets_done += 1,
            TargetStatus::Failed { reason } => {
                self.targets_failed += 1;
                self.failed_targets.push(FailedTarget {
                    index: report.index,
                    label: report.label.clone(),
                    reason: reason.clone(),
                });
            }
        }
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Nothing was planned or emitted, i.e. the catalogue is already complete.
    pub fn is_noop(&self) -> bool {
        self.targets_planned == 0 && self.batches_sunk == 0 && self.batches_pending == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {}", self.run_id)?;
        writeln!(
            f,
            "  targets: {} planned, {} done, {} failed, {} skipped",
            self.targets_planned, self.targets_done, self.targets_failed, self.targets_skipped
        )?;
        writeln!(
            f,
            "  pages: {} fetched, {} failed, {} parse errors",
            self.pages_fetched, self.pages_failed, self.parse_errors
        )?;
        writeln!(
            f,
            "  records: {} parsed, {} validated, {} rejected, {} deduplicated, {} suppressed",
            self.records_parsed,
            self.records_validated,
            self.records_rejected,
            self.records_deduplicated,
            self.records_suppressed
        )?;
        write!(
            f,
            "  batches: {} sunk ({} records), {} pending ({} records)",
            self.batches_sunk, self.records_sunk, self.batches_pending, self.records_pending
        )?;

        for failed in &self.failed_targets {
            write!(f, "\n  failed target #{} {}: {}", failed.index, failed.label, failed.reason)?;
        }
        for warning in &self.warnings {
            write!(f, "\n  warning: {warning}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_tracks_failed_targets() {
        let mut summary = RunSummary::new("run");
        summary.absorb(&TargetReport {
            index: 3,
            label: "Lisbon/attractions".into(),
            status: TargetStatus::Failed {
                reason: FailureReason::BudgetExhausted,
            },
            counts: TargetCounts {
                pages_fetched: 2,
                records_parsed: 10,
                missing_description: 1,
                missing_location: 2,
                ..Default::default()
            },
            last_cursor: Some("30".into()),
        });

        assert_eq!(summary.targets_failed, 1);
        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(summary.records_rejected, 3);
        assert_eq!(summary.failed_targets[0].index, 3);
        assert!(summary.to_string().contains("failed target #3"));
    }

    #[test]
    fn test_phase_transitions() {
        assert!(TargetPhase::Pending.can_advance_to(TargetPhase::Fetching));
        assert!(TargetPhase::Fetching.can_advance_to(TargetPhase::Failed));
        assert!(TargetPhase::Validating.can_advance_to(TargetPhase::Done));
        assert!(!TargetPhase::Pending.can_advance_to(TargetPhase::Done));
        assert!(!TargetPhase::Done.can_advance_to(TargetPhase::Fetching));
    }
}
