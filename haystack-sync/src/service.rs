//! Sync service: the operations exposed to the job layer.
//!
//! Every operation validates its whole input before touching either system;
//! validation failures abort with `Err`. Once work starts, per-item failures
//! are reported in the returned [`AggregateReport`] instead.

use crate::batch::{BatchProcessor, Checkpoint, CheckpointSink};
use crate::codec::{self, PreparedEntity};
use crate::config::SyncConfig;
use crate::engine::{EntitySyncEngine, Reconciler};
use crate::error::{SyncError, SyncResult};
use crate::hierarchy::{HierarchyBuilder, HierarchyMode};
use crate::history::HistoryWriter;
use crate::merge::TagMergeEngine;
use crate::report::{AggregateReport, SyncOutcome};
use crate::transport::{SinkSystem, SourceSystem};
use async_trait::async_trait;
use haystack_types::{
    EntityKey, EntityKind, RefName, Scalar, SourceEntity, TimeRange, HAYSTACK_REF_TAG,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options of an entity sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub batch_size: usize,
    pub dry_run: bool,
    /// Process only the first N points, sorted by refName.
    pub limit: Option<usize>,
    /// Include points whose collection is disabled.
    pub sync_all: bool,
}

impl SyncOptions {
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            dry_run: config.dry_run,
            limit: None,
            sync_all: config.sync_all,
        }
    }
}

/// Options of a history write run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryOptions {
    pub chunk_size: usize,
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub sync_all: bool,
}

impl HistoryOptions {
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            dry_run: config.dry_run,
            limit: None,
            sync_all: config.sync_all,
        }
    }
}

/// Persists committed HaystackRefs to the source.
struct RefWriteBack {
    source: Arc<dyn SourceSystem>,
    dry_run: bool,
}

#[async_trait]
impl CheckpointSink for RefWriteBack {
    async fn commit(&self, checkpoint: &Checkpoint) -> SyncResult<()> {
        if self.dry_run {
            debug!(batch = checkpoint.batch_index + 1, "dry run: not persisting references");
            return Ok(());
        }

        let mut seen = HashSet::new();
        let mut written = 0usize;
        let mut errors = Vec::new();
        for link in checkpoint.committed.iter().flat_map(|o| o.links.iter()) {
            if !seen.insert(&link.key) {
                continue;
            }
            let EntityKey { kind, ref_name } = &link.key;
            let current = match self.source.read_tags(*kind, ref_name).await {
                Ok(tags) => tags,
                Err(e) => {
                    errors.push(format!("{}: {e}", link.key));
                    continue;
                }
            };
            if current.kv_str(HAYSTACK_REF_TAG) == Some(link.sink_id.as_str()) {
                continue;
            }
            let tags = BTreeMap::from([(
                HAYSTACK_REF_TAG.to_string(),
                Scalar::Str(link.sink_id.to_string()),
            )]);
            match self.source.write_key_value_tags(*kind, ref_name, &tags).await {
                Ok(()) => written += 1,
                Err(e) => errors.push(format!("{}: {e}", link.key)),
            }
        }

        debug!(batch = checkpoint.batch_index + 1, written, "references persisted");
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Remote(format!(
                "{} reference write(s) failed: {}",
                errors.len(),
                errors.join("; ")
            )))
        }
    }
}

/// Runs entity, reference and history syncs between a source and a sink.
pub struct SyncService {
    source: Arc<dyn SourceSystem>,
    sink: Arc<dyn SinkSystem>,
    config: SyncConfig,
}

impl SyncService {
    /// Creates a service after validating `config`.
    pub fn new(
        source: Arc<dyn SourceSystem>,
        sink: Arc<dyn SinkSystem>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            source,
            sink,
            config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn reconciler(&self, dry_run: bool) -> Arc<Reconciler> {
        Arc::new(Reconciler::new(
            Arc::clone(&self.sink),
            TagMergeEngine::new(self.config.managed_namespace()),
            dry_run,
        ))
    }

    fn write_back(&self, dry_run: bool) -> RefWriteBack {
        RefWriteBack {
            source: Arc::clone(&self.source),
            dry_run,
        }
    }

    /// Syncs `entities` to the sink, level by level (sites, equipment,
    /// points). References are persisted to the source after every batch.
    pub async fn sync(
        &self,
        entities: Vec<SourceEntity>,
        options: &SyncOptions,
    ) -> SyncResult<AggregateReport> {
        let processor = BatchProcessor::new(options.batch_size, self.config.max_concurrent)?;
        let prepared = apply_limit(prepare_all(entities)?, options.limit);
        info!(
            entities = prepared.len(),
            batch_size = options.batch_size,
            dry_run = options.dry_run,
            "starting sync"
        );

        let hierarchy = Arc::new(HierarchyBuilder::new(
            self.reconciler(options.dry_run),
            Arc::clone(&self.source),
            prepared.iter().cloned(),
            HierarchyMode::Establish,
        ));
        let engine = EntitySyncEngine::new(hierarchy, options.sync_all);
        let checkpoint = self.write_back(options.dry_run);

        let mut report = AggregateReport::new(options.dry_run);
        for level in levels(&prepared) {
            let level_report = processor
                .run(&level, |_, p| engine.sync_entity(p), &checkpoint)
                .await;
            report.absorb(level_report);
        }

        info!(status = %report.status(), counts = %report.counts, "sync finished");
        Ok(report)
    }

    /// Syncs one site with all its equipment and points.
    pub async fn sync_site(
        &self,
        site: &RefName,
        options: &SyncOptions,
    ) -> SyncResult<AggregateReport> {
        let entities = self.collect_site(site).await?;
        self.sync(entities, options).await
    }

    /// Writes source history in `range` for the points of `site`.
    ///
    /// Points that do not resolve to a sink entity fail; nothing is created.
    pub async fn write_history_for_site(
        &self,
        site: &RefName,
        range: &TimeRange,
        options: &HistoryOptions,
    ) -> SyncResult<AggregateReport> {
        if options.chunk_size == 0 {
            return Err(SyncError::Validation("chunk size must be positive".into()));
        }
        let writer = HistoryWriter::new(
            Arc::clone(&self.sink),
            self.config.batch_size,
            options.dry_run,
        )?;
        let prepared = prepare_all(self.collect_site(site).await?)?;
        let mut points: Vec<&PreparedEntity> = prepared
            .iter()
            .filter(|p| p.key.kind == EntityKind::Point)
            .filter(|p| options.sync_all || p.source.metadata.collect_enabled)
            .collect();
        points.sort_by(|a, b| a.key.ref_name.cmp(&b.key.ref_name));
        if let Some(limit) = options.limit {
            points.truncate(limit);
        }
        info!(
            site = %site,
            points = points.len(),
            start = %range.start,
            end = %range.end,
            dry_run = options.dry_run,
            "writing history"
        );

        let hierarchy = HierarchyBuilder::new(
            self.reconciler(true),
            Arc::clone(&self.source),
            prepared.iter().cloned(),
            HierarchyMode::Resolve,
        );

        let mut report = AggregateReport::new(options.dry_run);
        for point in points {
            let identity = point.key.to_string();
            let samples = match self.source.read_history(&point.key.ref_name, range).await {
                Ok(samples) => samples,
                Err(e) => {
                    warn!(point = %point.key, error = %e, "failed to read history");
                    report.record(&SyncOutcome::failed(identity, &e));
                    continue;
                }
            };
            if samples.is_empty() {
                report.record(&SyncOutcome::skipped(identity, "no samples in range"));
                continue;
            }
            match writer
                .write_history(&hierarchy, point, &samples, options.chunk_size)
                .await
            {
                Ok(outcomes) => {
                    report.batches += 1;
                    for outcome in &outcomes {
                        report.record(outcome);
                    }
                }
                Err(e) => {
                    warn!(point = %point.key, error = %e, "history not written");
                    report.record(&SyncOutcome::failed(identity, &e));
                }
            }
        }

        info!(status = %report.status(), counts = %report.counts, "history finished");
        Ok(report)
    }

    /// Links source entities to sink entities that already exist, writing
    /// the HaystackRef on both sides. Nothing is created in the sink.
    pub async fn sync_refs_from_sink(
        &self,
        site: Option<&RefName>,
        dry_run: bool,
    ) -> SyncResult<AggregateReport> {
        let processor = BatchProcessor::new(self.config.batch_size, self.config.max_concurrent)?;
        let entities = match site {
            Some(site) => self.collect_site(site).await?,
            None => self.collect_all().await?,
        };
        let prepared = prepare_all(entities)?;
        info!(
            site = site.map(RefName::as_str),
            entities = prepared.len(),
            dry_run,
            "syncing references from sink"
        );

        let hierarchy = Arc::new(HierarchyBuilder::new(
            self.reconciler(dry_run),
            Arc::clone(&self.source),
            prepared.iter().cloned(),
            HierarchyMode::Link,
        ));
        let engine = EntitySyncEngine::new(hierarchy, true);
        let checkpoint = self.write_back(dry_run);

        let mut report = AggregateReport::new(dry_run);
        for level in levels(&prepared) {
            let level_report = processor
                .run(&level, |_, p| engine.link_entity(p), &checkpoint)
                .await;
            report.absorb(level_report);
        }

        info!(status = %report.status(), counts = %report.counts, "reference sync finished");
        Ok(report)
    }

    async fn collect_site(&self, site: &RefName) -> SyncResult<Vec<SourceEntity>> {
        let found = self
            .source
            .list_entities(EntityKind::Site, None)
            .await?
            .into_iter()
            .find(|s| &s.ref_name == site)
            .ok_or_else(|| SyncError::NotFound(format!("site {site} not found in source")))?;

        let equipment = self
            .source
            .list_entities(EntityKind::Equipment, Some(site))
            .await?;
        let mut entities = vec![found];
        for equip in &equipment {
            let points = self
                .source
                .list_entities(EntityKind::Point, Some(&equip.ref_name))
                .await?;
            entities.extend(points);
        }
        entities.extend(equipment);
        debug!(site = %site, entities = entities.len(), "collected site hierarchy");
        Ok(entities)
    }

    async fn collect_all(&self) -> SyncResult<Vec<SourceEntity>> {
        let mut entities = Vec::new();
        for kind in EntityKind::ALL {
            entities.extend(self.source.list_entities(kind, None).await?);
        }
        Ok(entities)
    }
}

/// Validates and encodes every entity, rejecting duplicate identities.
fn prepare_all(entities: Vec<SourceEntity>) -> SyncResult<Vec<PreparedEntity>> {
    let mut seen = HashSet::new();
    let mut prepared = Vec::with_capacity(entities.len());
    for entity in entities {
        let entity = codec::prepare(entity)?;
        if !seen.insert(entity.key.clone()) {
            return Err(SyncError::Validation(format!(
                "duplicate identity {} in input",
                entity.key
            )));
        }
        prepared.push(entity);
    }
    prepared.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(prepared)
}

/// Keeps every site and equipment but only the first `limit` points.
fn apply_limit(prepared: Vec<PreparedEntity>, limit: Option<usize>) -> Vec<PreparedEntity> {
    let Some(limit) = limit else {
        return prepared;
    };
    let mut points = 0;
    prepared
        .into_iter()
        .filter(|p| {
            if p.key.kind != EntityKind::Point {
                return true;
            }
            points += 1;
            points <= limit
        })
        .collect()
}

/// Groups prepared entities by level, parents first.
fn levels(prepared: &[PreparedEntity]) -> Vec<Vec<&PreparedEntity>> {
    EntityKind::ALL
        .iter()
        .map(|kind| prepared.iter().filter(|p| p.key.kind == *kind).collect::<Vec<_>>())
        .filter(|level| !level.is_empty())
        .collect()
}
