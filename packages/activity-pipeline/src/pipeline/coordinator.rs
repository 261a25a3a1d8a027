//! Pipeline coordinator.
//!
//! Dispatches targets to a bounded pool of workers. Each worker runs
//! fetch, parse and validate for its target, page by page in cursor order,
//! and sends the surviving records to the collector, which deduplicates them
//! and feeds the sink. A target's failure never affects another target.

use std::sync::Arc;

use futures::future;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::collector::{Collector, CollectorOutcome, WorkerMessage};
use super::fetch::{FetchClient, PageOutcome};
use super::parse::parse;
use super::sink::SinkAdapter;
use super::targets::TargetEnumerator;
use super::validate::validate;
use crate::error::{FetchError, PermanentKind, PipelineError, Result, ValidationError};
use crate::traits::checkpoint::CheckpointStore;
use crate::traits::upstream::Upstream;
use crate::types::checkpoint::{Checkpoint, ResumePoint};
use crate::types::config::PipelineConfig;
use crate::types::summary::{
    FailureReason, RunSummary, TargetCounts, TargetPhase, TargetReport, TargetStatus,
};
use crate::types::target::CrawlTarget;

/// How a run chooses its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Every target from the beginning; any saved state is replaced
    Fresh,
    /// Continue a previous run: skip Done targets, resume the rest from their cursor
    Resume,
    /// Only targets a previous run recorded as Failed
    RetryFailed,
}

pub struct Pipeline<U: Upstream> {
    enumerator: TargetEnumerator,
    fetch: FetchClient<U>,
    sink: SinkAdapter,
    checkpoints: Arc<dyn CheckpointStore>,
    config: PipelineConfig,
}

impl<U: Upstream> Pipeline<U> {
    /// The sink's retry policy and metadata defaults are taken from `config`.
    pub fn new(
        enumerator: TargetEnumerator,
        upstream: U,
        sink: SinkAdapter,
        checkpoints: Arc<dyn CheckpointStore>,
        config: PipelineConfig,
    ) -> Self {
        let fetch = FetchClient::new(upstream, &config);
        let sink = sink
            .with_retry(config.sink_retry.clone())
            .with_metadata_defaults(config.metadata_defaults.clone());

        Self {
            enumerator,
            fetch,
            sink,
            checkpoints,
            config,
        }
    }

    pub fn fetch_client(&self) -> &FetchClient<U> {
        &self.fetch
    }

    /// Run until every planned target is Done or Failed.
    ///
    /// Returns [`PipelineError::RunCancelled`] when `cancel` fires, after
    /// in-flight pages have been flushed, and [`PipelineError::SinkFatal`]
    /// when the sink rejects a batch. Both carry the summary so far.
    pub async fn run(&self, mode: RunMode, cancel: CancellationToken) -> Result<RunSummary> {
        self.config.validate()?;

        let run_id = Uuid::now_v7().to_string();
        let previous = match mode {
            RunMode::Fresh => None,
            RunMode::Resume | RunMode::RetryFailed => self.checkpoints.load().await?,
        };

        let mut summary = RunSummary::new(&run_id);
        let plan = self.plan(mode, previous.as_ref(), &mut summary);
        summary.targets_planned = plan.len();

        let has_pending = previous.as_ref().is_some_and(|c| !c.pending.is_empty());
        if plan.is_empty() && !has_pending {
            info!(run_id = %run_id, mode = ?mode, "Nothing to do");
            return Ok(summary);
        }

        info!(
            run_id = %run_id,
            mode = ?mode,
            targets = plan.len(),
            skipped = summary.targets_skipped,
            concurrency = self.config.concurrency,
            "Starting run"
        );

        let checkpoint = previous.unwrap_or_else(|| Checkpoint::new(&run_id));
        let run_token = cancel.child_token();
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let collector = Collector::new(
            &self.sink,
            self.checkpoints.as_ref(),
            checkpoint,
            summary,
            self.config.sink_batch_size,
            run_token.clone(),
        );

        let dispatch = async {
            stream::iter(plan)
                .take_while(|_| future::ready(!run_token.is_cancelled()))
                .map(|(target, resume)| self.process_target(target, resume, tx.clone(), &run_token))
                .buffer_unordered(self.config.concurrency)
                .for_each(|_| future::ready(()))
                .await;
            drop(tx);
        };

        let ((), outcome) = tokio::join!(dispatch, collector.run(rx));
        let CollectorOutcome { summary, halted } = outcome;

        if let Some(source) = halted {
            return Err(PipelineError::SinkFatal {
                source,
                summary: Box::new(summary),
            });
        }
        if cancel.is_cancelled() {
            warn!(run_id = %summary.run_id, "Run cancelled");
            return Err(PipelineError::RunCancelled {
                summary: Box::new(summary),
            });
        }

        info!(
            run_id = %summary.run_id,
            done = summary.targets_done,
            failed = summary.targets_failed,
            records = summary.records_sunk,
            "Run complete"
        );
        Ok(summary)
    }

    /// Targets to dispatch, each with the position to resume from.
    fn plan(
        &self,
        mode: RunMode,
        previous: Option<&Checkpoint>,
        summary: &mut RunSummary,
    ) -> Vec<(CrawlTarget, Option<ResumePoint>)> {
        let mut plan = Vec::new();

        for target in self.enumerator.enumerate() {
            let index = target.index;
            let selected = match (mode, previous) {
                (RunMode::Fresh, _) | (_, None) => true,
                (RunMode::Resume, Some(c)) => !c.is_done(index),
                (RunMode::RetryFailed, Some(c)) => c.is_failed(index),
            };
            if !selected {
                summary.targets_skipped += 1;
                continue;
            }

            let resume = match mode {
                RunMode::Fresh => None,
                _ => previous
                    .and_then(|c| c.progress(index))
                    .map(|p| p.resume.clone()),
            };
            plan.push((target, resume));
        }

        if let Some(max) = self.config.max_targets_per_run {
            plan.truncate(max);
        }
        plan
    }

    /// One worker: fetch, parse and validate every page of `target`.
    async fn process_target(
        &self,
        target: CrawlTarget,
        resume: Option<ResumePoint>,
        tx: mpsc::Sender<WorkerMessage>,
        run_token: &CancellationToken,
    ) {
        let index = target.index;
        let label = target.label();
        let deadline = Instant::now() + self.config.target_budget();

        let target = match &resume {
            Some(point) => target.resume_from(point.cursor.clone()),
            None => target,
        };
        let mut pages = self.fetch.pages(target);
        if let Some(point) = &resume {
            pages = pages.resume(point);
        }

        let mut phase = TargetPhase::Pending;
        let mut counts = TargetCounts::default();
        let mut last_cursor = None;
        let mut last_error: Option<FetchError> = None;

        info!(target_index = index, target = %label, resumed = resume.is_some(), "Target started");

        let failure = loop {
            if run_token.is_cancelled() {
                break Some(FailureReason::Cancelled);
            }
            advance(&mut phase, TargetPhase::Fetching, index);

            let outcome = match tokio::time::timeout_at(deadline, pages.next_page()).await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => break None,
                Err(_) => {
                    warn!(target_index = index, target = %label, pages = counts.pages_fetched, "Target budget exhausted");
                    break Some(FailureReason::BudgetExhausted);
                }
            };

            let page = match outcome {
                PageOutcome::Fetched(page) => page,
                PageOutcome::Failed {
                    page_index,
                    cursor,
                    error,
                } => {
                    counts.pages_failed += 1;
                    warn!(
                        target_index = index,
                        target = %label,
                        page = page_index,
                        cursor = ?cursor,
                        error = %error,
                        "Page skipped"
                    );
                    if is_first_page_rejection(&counts, &error) {
                        break Some(FailureReason::FirstPageRejected {
                            error: error.to_string(),
                        });
                    }
                    last_error = Some(error);
                    continue;
                }
            };

            counts.pages_fetched += 1;
            advance(&mut phase, TargetPhase::Parsing, index);
            let candidates = match parse(&page) {
                Ok(candidates) => candidates,
                Err(e) => {
                    counts.parse_errors += 1;
                    warn!(
                        target_index = index,
                        target = %label,
                        page = page.page_index,
                        cursor = ?page.cursor,
                        error = %e,
                        "Unparseable page"
                    );
                    Vec::new()
                }
            };
            counts.records_parsed += candidates.len() as u64;

            advance(&mut phase, TargetPhase::Validating, index);
            let mut records = Vec::with_capacity(candidates.len());
            for candidate in candidates {
                let external_id = candidate.external_id.clone();
                match validate(candidate) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        match e {
                            ValidationError::MissingDescription => counts.missing_description += 1,
                            ValidationError::MissingLocation => counts.missing_location += 1,
                        }
                        debug!(
                            target_index = index,
                            page = page.page_index,
                            external_id = ?external_id,
                            reason = %e,
                            "Record rejected"
                        );
                    }
                }
            }
            counts.records_validated += records.len() as u64;

            last_cursor = page.cursor.clone();
            let message = WorkerMessage::Page {
                target_index: index,
                page_cursor: page.cursor,
                records,
                resume: pages.resume_point(),
            };
            if tx.send(message).await.is_err() {
                break Some(FailureReason::Cancelled);
            }
        };

        let status = match failure {
            Some(reason) => TargetStatus::Failed { reason },
            None => match last_error {
                Some(error) if counts.pages_fetched == 0 => TargetStatus::Failed {
                    reason: FailureReason::AllPagesFailed {
                        error: error.to_string(),
                    },
                },
                _ => TargetStatus::Done,
            },
        };
        let terminal = if status.is_done() {
            TargetPhase::Done
        } else {
            TargetPhase::Failed
        };
        advance(&mut phase, terminal, index);

        let report = TargetReport {
            index,
            label,
            status,
            counts,
            last_cursor,
        };
        // A closed channel means the collector is gone and nothing is listening.
        let _ = tx.send(WorkerMessage::Finished(report)).await;
    }
}

/// A permanent failure of the target's first page, other than running out
/// of retries, means the target has nothing to offer.
fn is_first_page_rejection(counts: &TargetCounts, error: &FetchError) -> bool {
    counts.pages_fetched == 0
        && counts.pages_failed == 1
        && matches!(
            error,
            FetchError::Permanent(kind) if !matches!(kind, PermanentKind::RetriesExhausted { .. })
        )
}

fn advance(phase: &mut TargetPhase, next: TargetPhase, target_index: usize) {
    if *phase == next {
        return;
    }
    debug_assert!(
        phase.can_advance_to(next),
        "illegal target transition {phase:?} -> {next:?}"
    );
    tracing::trace!(target_index, from = ?*phase, to = ?next, "Target phase");
    *phase = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransientKind;
    use crate::sinks::memory::{MemoryBackupStore, MemoryEmbedder, MemoryVectorStore};
    use crate::stores::memory::MemoryCheckpointStore;
    use crate::testing::MockUpstream;
    use crate::types::checkpoint::{ProgressStatus, TargetProgress};
    use crate::types::target::City;

    fn pipeline(checkpoints: MemoryCheckpointStore, config: PipelineConfig) -> Pipeline<MockUpstream> {
        let enumerator = TargetEnumerator::new(
            vec![City::new("Lisbon", "Portugal"), City::new("Porto", "Portugal")],
            ["attractions", "tours"],
        );
        let sink = SinkAdapter::new(
            Arc::new(MemoryEmbedder::default()),
            Arc::new(MemoryVectorStore::new()),
            Arc::new(MemoryBackupStore::new()),
        );
        Pipeline::new(enumerator, MockUpstream::new(), sink, Arc::new(checkpoints), config)
    }

    fn previous() -> Checkpoint {
        let mut checkpoint = Checkpoint::new("earlier");
        checkpoint.targets.insert(
            0,
            TargetProgress {
                status: ProgressStatus::Done,
                ..Default::default()
            },
        );
        checkpoint.targets.insert(
            1,
            TargetProgress {
                resume: ResumePoint {
                    cursor: Some("60".into()),
                    next_page: 2,
                    exhausted: false,
                },
                ..Default::default()
            },
        );
        checkpoint.targets.insert(
            2,
            TargetProgress {
                status: ProgressStatus::Failed,
                ..Default::default()
            },
        );
        checkpoint
    }

    #[test]
    fn test_plan_resume_skips_done_and_keeps_cursor() {
        let pipeline = pipeline(MemoryCheckpointStore::new(), PipelineConfig::default());
        let previous = previous();
        let mut summary = RunSummary::new("run");

        let plan = pipeline.plan(RunMode::Resume, Some(&previous), &mut summary);

        assert_eq!(summary.targets_skipped, 1);
        let indices: Vec<usize> = plan.iter().map(|(t, _)| t.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(plan[0].1.as_ref().and_then(|r| r.cursor.as_deref()), Some("60"));
        assert!(plan[2].1.is_none());
    }

    #[test]
    fn test_plan_retry_failed_and_target_limit() {
        let pipeline = pipeline(
            MemoryCheckpointStore::new(),
            PipelineConfig::default().with_max_targets_per_run(1),
        );
        let previous = previous();

        let mut summary = RunSummary::new("run");
        let plan = pipeline.plan(RunMode::RetryFailed, Some(&previous), &mut summary);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].0.index, 2);
        assert_eq!(summary.targets_skipped, 3);

        let mut summary = RunSummary::new("run");
        let plan = pipeline.plan(RunMode::Fresh, Some(&previous), &mut summary);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].0.index, 0);
        assert!(plan[0].1.is_none());
    }

    #[test]
    fn test_first_page_rejection() {
        let first = TargetCounts {
            pages_failed: 1,
            ..Default::default()
        };
        let not_found = FetchError::Permanent(PermanentKind::ClientError { status: 404 });
        let exhausted = FetchError::Permanent(PermanentKind::RetriesExhausted {
            attempts: 3,
            last: TransientKind::Timeout,
        });

        assert!(is_first_page_rejection(&first, &not_found));
        assert!(!is_first_page_rejection(&first, &exhausted));

        let later = TargetCounts {
            pages_fetched: 1,
            pages_failed: 1,
            ..Default::default()
        };
        assert!(!is_first_page_rejection(&later, &not_found));
    }
}
