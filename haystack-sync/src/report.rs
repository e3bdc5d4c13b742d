//! Per-item outcomes and the aggregate run report.

use crate::error::{Failure, SyncError};
use haystack_types::{EntityKind, HaystackRef, SinkId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum number of failures listed in the human summary.
pub const MAX_LISTED_ERRORS: usize = 10;

/// Terminal classification of one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum OutcomeKind {
    Created,
    Updated,
    Unchanged,
    Skipped(String),
    Failed(Failure),
}

impl OutcomeKind {
    /// Created, updated and unchanged items count as successes.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            OutcomeKind::Created | OutcomeKind::Updated | OutcomeKind::Unchanged
        )
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, OutcomeKind::Failed(_))
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeKind::Created => "created",
            OutcomeKind::Updated => "updated",
            OutcomeKind::Unchanged => "unchanged",
            OutcomeKind::Skipped(_) => "skipped",
            OutcomeKind::Failed(_) => "failed",
        }
    }
}

/// Result of processing one entity or history chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Human-readable identity, e.g. `point/sat` or `point/sat#2`.
    pub identity: String,
    pub entity_kind: Option<EntityKind>,
    pub kind: OutcomeKind,
    /// Sink entity the item resolved to.
    pub sink_id: Option<SinkId>,
    /// References to persist to the source when the batch commits.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<HaystackRef>,
    /// Ancestors established on behalf of this item, reported alongside it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub established: Vec<SyncOutcome>,
}

impl SyncOutcome {
    pub fn new(identity: impl Into<String>, kind: OutcomeKind) -> Self {
        Self {
            identity: identity.into(),
            entity_kind: None,
            kind,
            sink_id: None,
            links: Vec::new(),
            established: Vec::new(),
        }
    }

    pub fn skipped(identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(identity, OutcomeKind::Skipped(reason.into()))
    }

    pub fn failed(identity: impl Into<String>, err: &SyncError) -> Self {
        Self::new(identity, OutcomeKind::Failed(err.failure()))
    }

    #[must_use]
    pub fn with_entity_kind(mut self, kind: EntityKind) -> Self {
        self.entity_kind = Some(kind);
        self
    }

    #[must_use]
    pub fn with_sink_id(mut self, id: SinkId) -> Self {
        self.sink_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_links(mut self, links: Vec<HaystackRef>) -> Self {
        self.links.extend(links);
        self
    }

    #[must_use]
    pub fn with_established(mut self, established: Vec<SyncOutcome>) -> Self {
        self.established.extend(established);
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.kind.is_success()
    }
}

/// Counts per outcome kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, kind: &OutcomeKind) {
        match kind {
            OutcomeKind::Created => self.created += 1,
            OutcomeKind::Updated => self.updated += 1,
            OutcomeKind::Unchanged => self.unchanged += 1,
            OutcomeKind::Skipped(_) => self.skipped += 1,
            OutcomeKind::Failed(_) => self.failed += 1,
        }
    }

    pub fn add(&mut self, other: &OutcomeCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    #[must_use]
    pub fn successes(&self) -> usize {
        self.created + self.updated + self.unchanged
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.successes() + self.skipped + self.failed
    }
}

impl fmt::Display for OutcomeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} updated={} unchanged={} skipped={} failed={}",
            self.created, self.updated, self.unchanged, self.skipped, self.failed
        )
    }
}

/// One failed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub identity: String,
    pub failure: Failure,
}

/// Overall classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No failures and nothing created or updated.
    NoChanges,
    /// No failures.
    Success,
    /// Some failures and some successes.
    PartialFailure,
    /// Failures and no successes.
    TotalFailure,
}

impl RunStatus {
    /// Process exit code for the run.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::NoChanges | RunStatus::Success => 0,
            RunStatus::PartialFailure => 1,
            RunStatus::TotalFailure => 2,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::NoChanges => "no changes",
            RunStatus::Success => "success",
            RunStatus::PartialFailure => "partial failure",
            RunStatus::TotalFailure => "total failure",
        })
    }
}

/// Structured summary of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub counts: OutcomeCounts,
    pub by_kind: BTreeMap<EntityKind, OutcomeCounts>,
    pub failures: Vec<FailureRecord>,
    /// Batches processed.
    pub batches: usize,
    /// Checkpoints committed.
    pub checkpoints: usize,
    /// Checkpoint callbacks that failed.
    pub checkpoint_errors: Vec<String>,
    pub dry_run: bool,
}

impl AggregateReport {
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    /// Folds one outcome, and the ancestors established for it, into the
    /// report.
    pub fn record(&mut self, outcome: &SyncOutcome) {
        for ancestor in &outcome.established {
            self.record(ancestor);
        }
        self.counts.record(&outcome.kind);
        if let Some(kind) = outcome.entity_kind {
            self.by_kind.entry(kind).or_default().record(&outcome.kind);
        }
        if let OutcomeKind::Failed(failure) = &outcome.kind {
            self.failures.push(FailureRecord {
                identity: outcome.identity.clone(),
                failure: failure.clone(),
            });
        }
    }

    /// Merges another report into this one.
    pub fn absorb(&mut self, other: AggregateReport) {
        self.counts.add(&other.counts);
        for (kind, counts) in &other.by_kind {
            self.by_kind.entry(*kind).or_default().add(counts);
        }
        self.failures.extend(other.failures);
        self.batches += other.batches;
        self.checkpoints += other.checkpoints;
        self.checkpoint_errors.extend(other.checkpoint_errors);
        self.dry_run |= other.dry_run;
    }

    /// Counts for one entity kind.
    #[must_use]
    pub fn kind_counts(&self, kind: EntityKind) -> OutcomeCounts {
        self.by_kind.get(&kind).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        let failed = self.counts.failed + self.checkpoint_errors.len();
        if failed == 0 {
            if self.counts.created + self.counts.updated == 0 {
                RunStatus::NoChanges
            } else {
                RunStatus::Success
            }
        } else if self.counts.successes() > 0 {
            RunStatus::PartialFailure
        } else {
            RunStatus::TotalFailure
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.status().exit_code()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0 || !self.checkpoint_errors.is_empty()
    }

    /// Pretty-printed JSON form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.dry_run { "[dry run] " } else { "" };
        writeln!(f, "{prefix}{}: {}", self.status(), self.counts)?;
        for (kind, counts) in &self.by_kind {
            writeln!(f, "  {kind}: {counts}")?;
        }
        writeln!(
            f,
            "  batches={} checkpoints={}",
            self.batches, self.checkpoints
        )?;
        for err in &self.checkpoint_errors {
            writeln!(f, "  checkpoint error: {err}")?;
        }
        if !self.failures.is_empty() {
            writeln!(f, "errors ({}):", self.failures.len())?;
            for record in self.failures.iter().take(MAX_LISTED_ERRORS) {
                writeln!(f, "  {}: {}", record.identity, record.failure)?;
            }
            if self.failures.len() > MAX_LISTED_ERRORS {
                writeln!(
                    f,
                    "  ... and {} more",
                    self.failures.len() - MAX_LISTED_ERRORS
                )?;
            }
        }
        Ok(())
    }
}
