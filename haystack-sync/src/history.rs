//! History writer.
//!
//! Splits a point's samples into bounded chunks and writes them to the
//! point's resolved sink handle, one chunk per work item. Chunks are written
//! in order; a failed chunk does not undo the chunks before it.

use crate::batch::{BatchProcessor, NoCheckpoint};
use crate::codec::PreparedEntity;
use crate::error::{SyncError, SyncResult};
use crate::hierarchy::HierarchyBuilder;
use crate::report::{OutcomeKind, SyncOutcome};
use crate::transport::SinkSystem;
use haystack_types::Sample;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Splits time-ordered samples into chunks of at most `chunk_size`.
///
/// A chunk boundary never falls between two samples with the same timestamp.
/// If a single run of equal timestamps is longer than `chunk_size` it forms
/// one oversized chunk.
pub fn chunk_samples(samples: &[Sample], chunk_size: usize) -> SyncResult<Vec<&[Sample]>> {
    if chunk_size == 0 {
        return Err(SyncError::Validation("chunk size must be positive".into()));
    }
    if let Some(pos) = samples.windows(2).position(|w| w[1].ts < w[0].ts) {
        return Err(SyncError::Validation(format!(
            "samples out of order at index {}: {} follows {}",
            pos + 1,
            samples[pos + 1].ts,
            samples[pos].ts
        )));
    }

    let len = samples.len();
    let mut chunks = Vec::with_capacity(len.div_ceil(chunk_size));
    let mut start = 0;
    while start < len {
        let mut end = (start + chunk_size).min(len);
        if end < len {
            let boundary = samples[end].ts;
            let mut cut = end;
            while cut > start && samples[cut - 1].ts == boundary {
                cut -= 1;
            }
            if cut == start {
                cut = end;
                while cut < len && samples[cut].ts == boundary {
                    cut += 1;
                }
            }
            end = cut;
        }
        chunks.push(&samples[start..end]);
        start = end;
    }
    Ok(chunks)
}

/// Writes sample chunks for resolved points.
pub struct HistoryWriter {
    sink: Arc<dyn SinkSystem>,
    processor: BatchProcessor,
    dry_run: bool,
}

impl HistoryWriter {
    /// Creates a writer. Chunks of one point are always written one at a
    /// time; `batch_size` chunks are grouped per batch.
    pub fn new(sink: Arc<dyn SinkSystem>, batch_size: usize, dry_run: bool) -> SyncResult<Self> {
        Ok(Self {
            sink,
            processor: BatchProcessor::new(batch_size, 1)?,
            dry_run,
        })
    }

    /// Writes `samples` for `point`, returning one outcome per chunk.
    ///
    /// Fails without writing anything when the point does not resolve to a
    /// sink entity or the samples are invalid.
    pub async fn write_history(
        &self,
        hierarchy: &HierarchyBuilder,
        point: &PreparedEntity,
        samples: &[Sample],
        chunk_size: usize,
    ) -> SyncResult<Vec<SyncOutcome>> {
        let chunks = chunk_samples(samples, chunk_size)?;
        let sink_id = hierarchy.resolve_handle(point).await?;
        debug!(
            point = %point.key,
            sink_id = %sink_id,
            samples = samples.len(),
            chunks = chunks.len(),
            "writing history"
        );

        let sink = &self.sink;
        let sink_id = &sink_id;
        let key = &point.key;
        let dry_run = self.dry_run;
        let (_, ledger) = self
            .processor
            .run_with_ledger(
                &chunks,
                move |index, chunk| async move {
                    let identity = format!("{key}#{}", index + 1);
                    if dry_run {
                        debug!(chunk = %identity, samples = chunk.len(), "would write chunk");
                        return SyncOutcome::new(identity, OutcomeKind::Created)
                            .with_sink_id(sink_id.clone());
                    }
                    match sink.write_history(sink_id, chunk).await {
                        Ok(()) => SyncOutcome::new(identity, OutcomeKind::Created)
                            .with_sink_id(sink_id.clone()),
                        Err(e) => {
                            warn!(chunk = %identity, error = %e, "chunk write failed");
                            SyncOutcome::failed(identity, &e)
                        }
                    }
                },
                &NoCheckpoint,
            )
            .await;

        let outcomes: Vec<SyncOutcome> = (0..ledger.len())
            .filter_map(|i| ledger.outcome(i).cloned())
            .collect();
        let written = outcomes.iter().filter(|o| o.is_success()).count();
        info!(point = %point.key, chunks = outcomes.len(), written, dry_run, "history written");
        Ok(outcomes)
    }
}
