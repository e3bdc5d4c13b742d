//! Entity and history reconciliation between a Haystack source and sink.
//!
//! The source owns the building model (sites, equipment, points and their
//! tags). The sink is a Haystack database that mirrors it. A sync makes the
//! sink match the source without duplicating entities and without losing
//! tags the sink added on its own.
//!
//! # Architecture
//!
//! Each source entity is linked to its sink counterpart by a HaystackRef,
//! stored on both sides. The sink copy is authoritative; the source copy is
//! an optimization that may go stale and is repaired on the next run.
//!
//! ## Components
//!
//! - **Codec**: Normalizes source tags into typed tag sets
//! - **Merge**: Computes the minimal tag delta between sink and source
//! - **Resolver**: Finds the sink entity for a source entity
//! - **Hierarchy**: Ensures parents exist before children, once per parent
//! - **Engine**: Reconciles one entity (create, update or link)
//! - **Batch**: Runs work in checkpointed batches with bounded concurrency
//! - **History**: Writes time-series samples in bounded chunks
//! - **Service**: The operations jobs invoke
//!
//! ## Sync Process
//!
//! 1. **Validate**: Encode every input entity, reject bad input up front
//! 2. **Resolve**: Look up each entity by stored reference, then by name
//! 3. **Reconcile**: Create missing entities, apply tag deltas to existing ones
//! 4. **Checkpoint**: After each batch, persist new references to the source
//! 5. **Report**: Aggregate outcomes into a single run report
//!
//! # Example
//!
//! ```
//! use haystack_sync::transport::mock::{MemorySink, MemorySource};
//! use haystack_sync::{SyncConfig, SyncService};
//! use std::sync::Arc;
//!
//! let source = Arc::new(MemorySource::new());
//! let sink = Arc::new(MemorySink::new("demo"));
//! let service = SyncService::new(source, sink, SyncConfig::default()).unwrap();
//! assert_eq!(service.config().batch_size, 100);
//! ```

pub mod batch;
pub mod codec;
pub mod config;
pub mod engine;
mod error;
pub mod hierarchy;
pub mod history;
pub mod job;
pub mod logging;
pub mod merge;
pub mod report;
pub mod resolver;
pub mod service;
pub mod transport;

pub use batch::{BatchProcessor, Checkpoint, CheckpointSink, NoCheckpoint, RunLedger};
pub use codec::PreparedEntity;
pub use config::SyncConfig;
pub use engine::{EntitySyncEngine, Reconciled, Reconciler};
pub use error::{Failure, FailureClass, SyncError, SyncResult};
pub use hierarchy::{Ancestry, HierarchyBuilder, HierarchyMode, SinkHandle};
pub use history::{chunk_samples, HistoryWriter};
pub use job::{JobFile, JobFormat, SyncJob, SyncRefsJob, WriteHistoryJob};
pub use logging::{init_logging, LogConfig};
pub use merge::{ManagedNamespace, TagDelta, TagMergeEngine};
pub use report::{AggregateReport, OutcomeCounts, OutcomeKind, RunStatus, SyncOutcome};
pub use resolver::{LinkState, ParentScope, ReferenceResolver, Resolution};
pub use service::{HistoryOptions, SyncOptions, SyncService};
pub use transport::{SinkSystem, SourceSystem};
