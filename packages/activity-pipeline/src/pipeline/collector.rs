//! The collector task: single owner of the deduplicator, the sink buffer, the
//! checkpoint and the run summary.
//!
//! Workers never touch any of that state. They send [`WorkerMessage`]s over a
//! bounded channel and the collector applies them one at a time.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::dedup::{Deduplicator, Ingested};
use super::sink::{EmitOutcome, SinkAdapter};
use crate::error::SinkError;
use crate::traits::checkpoint::CheckpointStore;
use crate::types::checkpoint::{Checkpoint, ResumePoint};
use crate::types::record::{CanonicalRecord, ValidRecord};
use crate::types::summary::{RunSummary, TargetReport, TargetStatus};

/// Sent by a worker to the collector.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Validated records of one page, in cursor order within the target
    Page {
        target_index: usize,
        page_cursor: Option<String>,
        records: Vec<ValidRecord>,
        resume: ResumePoint,
    },

    /// The target reached Done or Failed; always the target's last message
    Finished(TargetReport),
}

/// What the collector hands back once the channel closes.
#[derive(Debug)]
pub struct CollectorOutcome {
    pub summary: RunSummary,
    /// Set when a batch was rejected fatally
    pub halted: Option<SinkError>,
}

#[derive(Debug, Default, Clone, Copy)]
struct DedupCounts {
    emitted: u64,
    suppressed: u64,
}

enum Staged {
    Page {
        target_index: usize,
        page_cursor: Option<String>,
        resume: ResumePoint,
    },
    Finished {
        target_index: usize,
        status: TargetStatus,
    },
}

pub struct Collector<'a> {
    sink: &'a SinkAdapter,
    checkpoints: &'a dyn CheckpointStore,
    dedup: Deduplicator,
    checkpoint: Checkpoint,
    summary: RunSummary,
    buffer: Vec<CanonicalRecord>,
    /// Progress that becomes durable with the next flush
    staged: Vec<Staged>,
    counts: HashMap<usize, DedupCounts>,
    batch_size: usize,
    batch_seq: u64,
    run_token: CancellationToken,
    halted: Option<SinkError>,
}

impl<'a> Collector<'a> {
    /// `checkpoint` is the state carried over from earlier runs; its sunk and
    /// pending keys seed the deduplicator.
    pub fn new(
        sink: &'a SinkAdapter,
        checkpoints: &'a dyn CheckpointStore,
        checkpoint: Checkpoint,
        summary: RunSummary,
        batch_size: usize,
        run_token: CancellationToken,
    ) -> Self {
        let seen = checkpoint
            .sunk_keys
            .iter()
            .cloned()
            .chain(checkpoint.pending.iter().map(|r| r.key.clone()));

        Self {
            sink,
            checkpoints,
            dedup: Deduplicator::with_seen_keys(seen),
            checkpoint,
            summary,
            buffer: Vec::with_capacity(batch_size),
            staged: Vec::new(),
            counts: HashMap::new(),
            batch_size: batch_size.max(1),
            batch_seq: 0,
            run_token,
            halted: None,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<WorkerMessage>) -> CollectorOutcome {
        self.reemit_pending().await;

        while let Some(message) = rx.recv().await {
            match message {
                WorkerMessage::Page {
                    target_index,
                    page_cursor,
                    records,
                    resume,
                } => {
                    if self.halted.is_some() {
                        continue;
                    }
                    for record in records {
                        self.ingest(target_index, record);
                        if self.buffer.len() >= self.batch_size {
                            self.flush().await;
                        }
                    }
                    self.staged.push(Staged::Page {
                        target_index,
                        page_cursor,
                        resume,
                    });
                }
                WorkerMessage::Finished(mut report) => {
                    let counts = self.counts.remove(&report.index).unwrap_or_default();
                    report.counts.records_deduplicated = counts.emitted;
                    report.counts.records_suppressed = counts.suppressed;

                    tracing::info!(
                        target_index = report.index,
                        target = %report.label,
                        status = ?report.status,
                        pages = report.counts.pages_fetched,
                        parsed = report.counts.records_parsed,
                        validated = report.counts.records_validated,
                        deduplicated = counts.emitted,
                        "Target finished"
                    );

                    self.summary.absorb(&report);
                    self.staged.push(Staged::Finished {
                        target_index: report.index,
                        status: report.status,
                    });
                }
            }
        }

        if self.halted.is_none() {
            self.flush().await;
        }

        CollectorOutcome {
            summary: self.summary,
            halted: self.halted,
        }
    }

    fn ingest(&mut self, target_index: usize, record: ValidRecord) {
        let counts = self.counts.entry(target_index).or_default();
        match self.dedup.ingest(record) {
            Ingested::Emitted(canonical) => {
                counts.emitted += 1;
                self.buffer.push(canonical);
            }
            Ingested::Suppressed { key, first_city } => {
                counts.suppressed += 1;
                tracing::debug!(
                    target_index,
                    key = %key,
                    first_city = first_city.as_deref().unwrap_or("<earlier run>"),
                    "Duplicate suppressed"
                );
            }
        }
    }

    /// Re-emit records an earlier run left pending, before any new batch.
    ///
    /// A chunk rejected fatally stays pending along with every chunk after it.
    async fn reemit_pending(&mut self) {
        if self.checkpoint.pending.is_empty() {
            return;
        }

        let pending = std::mem::take(&mut self.checkpoint.pending);
        tracing::info!(records = pending.len(), "Re-emitting pending records");

        for chunk in pending.chunks(self.batch_size) {
            if self.halted.is_some() {
                self.checkpoint.pending.extend_from_slice(chunk);
                continue;
            }
            self.deliver(chunk.to_vec()).await;
            if self.halted.is_some() {
                self.checkpoint.pending.extend_from_slice(chunk);
            }
        }
        self.persist().await;
    }

    /// Sink the buffer, then make staged progress durable.
    async fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let batch = std::mem::take(&mut self.buffer);
            self.deliver(batch).await;
        }

        if self.halted.is_some() {
            return;
        }

        for staged in self.staged.drain(..) {
            match staged {
                Staged::Page {
                    target_index,
                    page_cursor,
                    resume,
                } => self.checkpoint.advance(target_index, page_cursor, resume),
                Staged::Finished {
                    target_index,
                    status,
                } => self.checkpoint.finish(target_index, &status),
            }
        }
        self.persist().await;
    }

    async fn deliver(&mut self, batch: Vec<CanonicalRecord>) {
        let name = format!("{}/batch-{:05}", self.summary.run_id, self.batch_seq);
        self.batch_seq += 1;

        let delivery = self.sink.deliver(&name, &batch).await;
        if delivery.backup_failed {
            self.summary.backup_failures += 1;
        }

        match delivery.outcome {
            EmitOutcome::Sunk(ack) => {
                self.summary.batches_sunk += 1;
                self.summary.records_sunk += ack.records as u64;
                self.checkpoint
                    .sunk_keys
                    .extend(batch.into_iter().map(|r| r.key));
            }
            EmitOutcome::Pending(err) => {
                self.summary.batches_pending += 1;
                self.summary.records_pending += batch.len() as u64;
                self.summary.warn(format!(
                    "batch {name} ({} records) left pending: {err}",
                    batch.len()
                ));
                self.checkpoint.pending.extend(batch);
            }
            EmitOutcome::Fatal(err) => {
                tracing::error!(batch = %name, error = %err, "Halting run after fatal sink error");
                self.halted = Some(err);
                self.run_token.cancel();
            }
        }
    }

    async fn persist(&mut self) {
        self.checkpoint.run_id = self.summary.run_id.clone();
        self.checkpoint.touch();
        if let Err(e) = self.checkpoints.save(&self.checkpoint).await {
            tracing::warn!(error = %e, "Failed to save checkpoint");
            self.summary.warn(format!("checkpoint not saved: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sinks::memory::{MemoryBackupStore, MemoryEmbedder, MemoryVectorStore};
    use crate::stores::memory::MemoryCheckpointStore;
    use crate::testing::{canonical, FlakyVectorStore};
    use crate::types::config::RetryPolicy;
    use crate::types::summary::TargetCounts;

    fn sink(vectors: Arc<dyn crate::traits::sink::VectorStore>) -> SinkAdapter {
        SinkAdapter::new(
            Arc::new(MemoryEmbedder::default()),
            vectors,
            Arc::new(MemoryBackupStore::new()),
        )
        .with_retry(RetryPolicy::immediate(2))
    }

    fn page(index: usize, records: Vec<ValidRecord>, cursor: &str) -> WorkerMessage {
        WorkerMessage::Page {
            target_index: index,
            page_cursor: None,
            records,
            resume: ResumePoint {
                cursor: Some(cursor.into()),
                next_page: 1,
                exhausted: false,
            },
        }
    }

    fn finished(index: usize) -> WorkerMessage {
        WorkerMessage::Finished(TargetReport {
            index,
            label: format!("target-{index}"),
            status: TargetStatus::Done,
            counts: TargetCounts::default(),
            last_cursor: None,
        })
    }

    async fn run(collector: Collector<'_>, messages: Vec<WorkerMessage>) -> CollectorOutcome {
        let (tx, rx) = mpsc::channel(16);
        for m in messages {
            tx.send(m).await.unwrap();
        }
        drop(tx);
        collector.run(rx).await
    }

    #[tokio::test]
    async fn test_duplicates_across_targets_are_sunk_once() {
        let store = Arc::new(MemoryVectorStore::new());
        let sink = sink(store.clone());
        let checkpoints = MemoryCheckpointStore::new();
        let collector = Collector::new(
            &sink,
            &checkpoints,
            Checkpoint::new("r"),
            RunSummary::new("r"),
            10,
            CancellationToken::new(),
        );

        let a = canonical("1", "Lisbon").record;
        let b = canonical("1", "Porto").record;
        let outcome = run(
            collector,
            vec![page(0, vec![a], "30"), page(1, vec![b], "30"), finished(0), finished(1)],
        )
        .await;

        assert_eq!(store.len(), 1);
        assert_eq!(outcome.summary.records_deduplicated, 1);
        assert_eq!(outcome.summary.records_suppressed, 1);
        assert_eq!(outcome.summary.targets_done, 2);

        let saved = checkpoints.latest().unwrap();
        assert!(saved.is_done(0) && saved.is_done(1));
        assert_eq!(saved.sunk_keys.len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_only_advances_after_flush() {
        let store = Arc::new(FlakyVectorStore::unavailable(usize::MAX));
        let sink = sink(store);
        let checkpoints = MemoryCheckpointStore::new();
        let collector = Collector::new(
            &sink,
            &checkpoints,
            Checkpoint::new("r"),
            RunSummary::new("r"),
            1,
            CancellationToken::new(),
        );

        let outcome = run(collector, vec![page(0, vec![canonical("1", "Lisbon").record], "30")]).await;

        assert_eq!(outcome.summary.batches_pending, 1);
        assert_eq!(outcome.summary.warnings.len(), 1);
        let saved = checkpoints.latest().unwrap();
        assert_eq!(saved.pending.len(), 1);
        assert!(saved.sunk_keys.is_empty());
        assert_eq!(saved.progress(0).unwrap().resume.cursor.as_deref(), Some("30"));
    }

    #[tokio::test]
    async fn test_fatal_rejection_cancels_and_stops_persisting() {
        let sink = sink(Arc::new(FlakyVectorStore::rejecting()));
        let checkpoints = MemoryCheckpointStore::new();
        let token = CancellationToken::new();
        let collector = Collector::new(
            &sink,
            &checkpoints,
            Checkpoint::new("r"),
            RunSummary::new("r"),
            1,
            token.clone(),
        );

        let outcome = run(
            collector,
            vec![
                page(0, vec![canonical("1", "Lisbon").record], "30"),
                page(0, vec![canonical("2", "Lisbon").record], "60"),
                finished(0),
            ],
        )
        .await;

        assert!(matches!(outcome.halted, Some(SinkError::Fatal(_))));
        assert!(token.is_cancelled());
        assert_eq!(checkpoints.save_count(), 0);
        assert_eq!(outcome.summary.targets_done, 1);
    }

    #[tokio::test]
    async fn test_fatal_rejection_keeps_carried_over_records_pending() {
        let sink = sink(Arc::new(FlakyVectorStore::rejecting()));
        let checkpoints = MemoryCheckpointStore::new();
        let mut previous = Checkpoint::new("earlier");
        previous.pending = vec![canonical("1", "Lisbon"), canonical("2", "Lisbon")];
        let collector = Collector::new(
            &sink,
            &checkpoints,
            previous,
            RunSummary::new("r"),
            1,
            CancellationToken::new(),
        );

        let outcome = run(collector, vec![]).await;

        assert!(matches!(outcome.halted, Some(SinkError::Fatal(_))));
        let saved = checkpoints.latest().unwrap();
        assert_eq!(saved.pending.len(), 2);
        assert!(saved.sunk_keys.is_empty());
    }
}
