//! Batch processing with per-batch checkpoints.
//!
//! Items are split into consecutive batches. Within a batch up to
//! `max_concurrent` items run at once; batches run strictly one after the
//! other. Once every item of a batch has a terminal outcome, the successes
//! (including ancestors established on an item's behalf, whether or not the
//! item itself succeeded) are handed to a [`CheckpointSink`] before the next
//! batch starts.

use crate::error::{SyncError, SyncResult};
use crate::report::{AggregateReport, SyncOutcome};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::future::Future;
use tracing::{debug, info, warn};

/// Successful work of one batch, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub batch_index: usize,
    /// One past the last item index of the batch.
    pub cursor: usize,
    /// Successful outcomes of the batch in item order, each preceded by the
    /// ancestors established for it.
    pub committed: Vec<SyncOutcome>,
}

/// Receives checkpoints as batches complete.
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn commit(&self, checkpoint: &Checkpoint) -> SyncResult<()>;
}

/// Checkpoint sink that persists nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoint;

#[async_trait]
impl CheckpointSink for NoCheckpoint {
    async fn commit(&self, _checkpoint: &Checkpoint) -> SyncResult<()> {
        Ok(())
    }
}

/// Per-item outcome table and commit cursor of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLedger {
    outcomes: Vec<Option<SyncOutcome>>,
    cursor: usize,
    committed_batches: Vec<usize>,
}

impl RunLedger {
    fn with_len(len: usize) -> Self {
        Self {
            outcomes: vec![None; len],
            cursor: 0,
            committed_batches: Vec::new(),
        }
    }

    /// Outcome of item `index`, if it ran.
    #[must_use]
    pub fn outcome(&self, index: usize) -> Option<&SyncOutcome> {
        self.outcomes.get(index).and_then(Option::as_ref)
    }

    /// Items `[0, cursor)` are terminal and their successes persisted.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn committed_batches(&self) -> &[usize] {
        &self.committed_batches
    }

    #[must_use]
    pub fn is_committed(&self, batch_index: usize) -> bool {
        self.committed_batches.contains(&batch_index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Runs work items in checkpointed batches.
#[derive(Debug, Clone, Copy)]
pub struct BatchProcessor {
    batch_size: usize,
    max_concurrent: usize,
}

impl BatchProcessor {
    /// Creates a processor. Both sizes must be positive.
    pub fn new(batch_size: usize, max_concurrent: usize) -> SyncResult<Self> {
        if batch_size == 0 {
            return Err(SyncError::Validation("batch size must be positive".into()));
        }
        if max_concurrent == 0 {
            return Err(SyncError::Validation(
                "max concurrency must be positive".into(),
            ));
        }
        Ok(Self {
            batch_size,
            max_concurrent,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of batches `len` items split into.
    #[must_use]
    pub fn batch_count(&self, len: usize) -> usize {
        len.div_ceil(self.batch_size)
    }

    /// Runs `op` over `items` and aggregates the outcomes.
    pub async fn run<'a, T, F, Fut>(
        &self,
        items: &'a [T],
        op: F,
        checkpoint: &dyn CheckpointSink,
    ) -> AggregateReport
    where
        F: Fn(usize, &'a T) -> Fut,
        Fut: Future<Output = SyncOutcome>,
    {
        self.run_with_ledger(items, op, checkpoint).await.0
    }

    /// Like [`run`](Self::run), also returning the per-item ledger.
    pub async fn run_with_ledger<'a, T, F, Fut>(
        &self,
        items: &'a [T],
        op: F,
        checkpoint: &dyn CheckpointSink,
    ) -> (AggregateReport, RunLedger)
    where
        F: Fn(usize, &'a T) -> Fut,
        Fut: Future<Output = SyncOutcome>,
    {
        let mut report = AggregateReport::default();
        let mut ledger = RunLedger::with_len(items.len());
        let mut contiguous = true;
        let total_batches = self.batch_count(items.len());

        for (batch_index, batch) in items.chunks(self.batch_size).enumerate() {
            let offset = batch_index * self.batch_size;
            debug!(
                batch = batch_index + 1,
                total = total_batches,
                items = batch.len(),
                "processing batch"
            );

            let mut results: Vec<(usize, SyncOutcome)> = stream::iter(batch.iter().enumerate())
                .map(|(i, item)| {
                    let index = offset + i;
                    let work = op(index, item);
                    async move { (index, work.await) }
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;
            results.sort_by_key(|(index, _)| *index);
            report.batches += 1;

            let mut committed = Vec::new();
            for (index, outcome) in results {
                report.record(&outcome);
                committed.extend(
                    outcome
                        .established
                        .iter()
                        .filter(|ancestor| ancestor.is_success())
                        .cloned(),
                );
                if outcome.is_success() {
                    committed.push(outcome.clone());
                }
                ledger.outcomes[index] = Some(outcome);
            }

            let cursor = offset + batch.len();
            if committed.is_empty() {
                warn!(batch = batch_index + 1, "batch finished without successes");
            } else {
                let successes = committed.len();
                let cp = Checkpoint {
                    batch_index,
                    cursor,
                    committed,
                };
                match checkpoint.commit(&cp).await {
                    Ok(()) => {
                        report.checkpoints += 1;
                        ledger.committed_batches.push(batch_index);
                        info!(batch = batch_index + 1, successes, cursor, "checkpoint committed");
                    }
                    Err(e) => {
                        warn!(batch = batch_index + 1, error = %e, "checkpoint failed");
                        report
                            .checkpoint_errors
                            .push(format!("batch {}: {e}", batch_index + 1));
                        contiguous = false;
                    }
                }
            }
            if contiguous {
                ledger.cursor = cursor;
            }
        }

        (report, ledger)
    }
}
