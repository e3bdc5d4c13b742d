//! Entity sync engine.
//!
//! The [`Reconciler`] brings one prepared entity in line with the sink: it
//! resolves the entity, then either creates it or applies the tag delta. The
//! [`EntitySyncEngine`] wraps it with ancestor establishment and turns every
//! error into a classified [`SyncOutcome`] so one bad entity never stops the
//! run.

use crate::codec::PreparedEntity;
use crate::error::{SyncError, SyncResult};
use crate::hierarchy::{HierarchyBuilder, SinkHandle};
use crate::merge::{TagDelta, TagMergeEngine};
use crate::report::{OutcomeKind, SyncOutcome};
use crate::resolver::{LinkState, ParentScope, ReferenceResolver, Resolution};
use crate::transport::SinkSystem;
use haystack_types::{
    EntityKey, EntityKind, HaystackRef, ParentRefs, Scalar, SinkEntity, TagValue,
    HAYSTACK_REF_TAG, REF_NAME_TAG,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of reconciling one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub outcome: OutcomeKind,
    pub handle: SinkHandle,
    /// Reference to persist to the source, when it changed.
    pub link: Option<HaystackRef>,
}

impl Reconciled {
    /// Turns the result for `key` into a reportable outcome.
    #[must_use]
    pub fn into_outcome(self, key: &EntityKey) -> SyncOutcome {
        let mut outcome = SyncOutcome::new(key.to_string(), self.outcome)
            .with_entity_kind(key.kind)
            .with_links(self.link.into_iter().collect());
        if let SinkHandle::Existing(id) = self.handle {
            outcome = outcome.with_sink_id(id);
        }
        outcome
    }
}

/// Resolves and creates or updates single entities.
pub struct Reconciler {
    resolver: ReferenceResolver,
    merger: TagMergeEngine,
    sink: Arc<dyn SinkSystem>,
    dry_run: bool,
}

impl Reconciler {
    pub fn new(sink: Arc<dyn SinkSystem>, merger: TagMergeEngine, dry_run: bool) -> Self {
        Self {
            resolver: ReferenceResolver::new(Arc::clone(&sink)),
            merger,
            sink,
            dry_run,
        }
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Creates or updates the sink entity for `prepared`.
    ///
    /// In dry-run mode the same resolution and merge run, but nothing is
    /// written and entities that would be created get a planned handle.
    pub async fn reconcile(
        &self,
        prepared: &PreparedEntity,
        parents: &ParentRefs,
        scope: &ParentScope,
    ) -> SyncResult<Reconciled> {
        let resolution = self
            .resolver
            .resolve(&prepared.key, prepared.stored_ref.as_ref(), scope)
            .await?;

        match resolution {
            Resolution::Resolved { entity, link } => {
                if link == LinkState::Adopted {
                    info!(entity = %prepared.key, sink_id = %entity.id, "adopting unlinked sink entity");
                }
                self.update(prepared, entity).await
            }
            Resolution::Orphaned { stale } => {
                info!(entity = %prepared.key, stale = %stale, "recreating orphaned entity");
                self.create(prepared, parents).await
            }
            Resolution::Absent => self.create(prepared, parents).await,
        }
    }

    async fn update(&self, prepared: &PreparedEntity, entity: SinkEntity) -> SyncResult<Reconciled> {
        let key = &prepared.key;
        let existing = self.sink.read_tags(&entity.id).await?;
        let mut delta = self.merger.merge(&existing, &prepared.desired)?;

        let link_tag = TagValue::reference(entity.id.clone());
        match existing.get(HAYSTACK_REF_TAG) {
            Some(current) if *current == link_tag => {}
            Some(_) => {
                delta.to_update.insert(HAYSTACK_REF_TAG, link_tag);
            }
            None => {
                delta.to_add.insert(HAYSTACK_REF_TAG, link_tag);
            }
        }

        let persist = prepared.stored_ref.as_ref() != Some(&entity.id);
        let outcome = if delta.is_empty() && !persist {
            OutcomeKind::Unchanged
        } else {
            OutcomeKind::Updated
        };

        if delta.is_empty() {
            debug!(entity = %key, sink_id = %entity.id, "tags unchanged");
        } else if self.dry_run {
            info!(entity = %key, sink_id = %entity.id, changes = delta.len(), "would update tags");
        } else {
            self.sink.update_tags(&entity.id, &delta).await?;
            info!(entity = %key, sink_id = %entity.id, changes = delta.len(), "updated tags");
        }

        Ok(Reconciled {
            outcome,
            link: persist.then(|| HaystackRef::new(key.clone(), entity.id.clone())),
            handle: SinkHandle::Existing(entity.id),
        })
    }

    async fn create(&self, prepared: &PreparedEntity, parents: &ParentRefs) -> SyncResult<Reconciled> {
        let key = &prepared.key;
        if self.dry_run {
            info!(entity = %key, "would create");
            return Ok(Reconciled {
                outcome: OutcomeKind::Created,
                handle: SinkHandle::Planned,
                link: None,
            });
        }

        let mut tags = prepared.desired.clone();
        tags.insert_scalar(REF_NAME_TAG, Scalar::Str(key.ref_name.to_string()));
        let entity = self.sink.create_entity(key.kind, parents, &tags).await?;

        let mut link_delta = TagDelta::default();
        link_delta
            .to_add
            .insert(HAYSTACK_REF_TAG, TagValue::reference(entity.id.clone()));
        self.sink.update_tags(&entity.id, &link_delta).await?;
        info!(entity = %key, sink_id = %entity.id, "created");

        Ok(Reconciled {
            outcome: OutcomeKind::Created,
            link: Some(HaystackRef::new(key.clone(), entity.id.clone())),
            handle: SinkHandle::Existing(entity.id),
        })
    }

    /// Links `prepared` to an existing sink entity without creating anything
    /// or touching other tags.
    ///
    /// A missing sink-side link tag is written (unless dry run); the source
    /// side is returned as a link for the checkpoint.
    pub async fn link(&self, prepared: &PreparedEntity, scope: &ParentScope) -> SyncResult<Reconciled> {
        let key = &prepared.key;
        let resolution = self
            .resolver
            .resolve(key, prepared.stored_ref.as_ref(), scope)
            .await?;

        let entity = match resolution {
            Resolution::Resolved { entity, .. } => entity,
            Resolution::Orphaned { stale } => {
                return Ok(Reconciled {
                    outcome: OutcomeKind::Skipped(format!("stale reference @{stale}")),
                    handle: SinkHandle::Missing,
                    link: None,
                });
            }
            Resolution::Absent => {
                return Ok(Reconciled {
                    outcome: OutcomeKind::Skipped("not present in sink".into()),
                    handle: SinkHandle::Missing,
                    link: None,
                });
            }
        };

        let link_tag = TagValue::reference(entity.id.clone());
        let tag_missing = entity.tags.get(HAYSTACK_REF_TAG) != Some(&link_tag);
        let persist = prepared.stored_ref.as_ref() != Some(&entity.id);

        if tag_missing && !self.dry_run {
            let mut delta = TagDelta::default();
            if entity.tags.contains(HAYSTACK_REF_TAG) {
                delta.to_update.insert(HAYSTACK_REF_TAG, link_tag);
            } else {
                delta.to_add.insert(HAYSTACK_REF_TAG, link_tag);
            }
            self.sink.update_tags(&entity.id, &delta).await?;
            info!(entity = %key, sink_id = %entity.id, "wrote sink link tag");
        }

        let outcome = if tag_missing || persist {
            OutcomeKind::Updated
        } else {
            OutcomeKind::Unchanged
        };
        Ok(Reconciled {
            outcome,
            link: persist.then(|| HaystackRef::new(key.clone(), entity.id.clone())),
            handle: SinkHandle::Existing(entity.id),
        })
    }
}

/// Per-entity orchestration: ancestors, then the entity itself.
pub struct EntitySyncEngine {
    hierarchy: Arc<HierarchyBuilder>,
    sync_all: bool,
}

impl EntitySyncEngine {
    pub fn new(hierarchy: Arc<HierarchyBuilder>, sync_all: bool) -> Self {
        Self {
            hierarchy,
            sync_all,
        }
    }

    pub fn hierarchy(&self) -> &Arc<HierarchyBuilder> {
        &self.hierarchy
    }

    /// Syncs one entity, creating it and its ancestors as needed.
    ///
    /// Never fails: errors become `Failed` outcomes.
    pub async fn sync_entity(&self, prepared: &PreparedEntity) -> SyncOutcome {
        let key = &prepared.key;

        if key.kind == EntityKind::Point && !prepared.source.metadata.collect_enabled && !self.sync_all {
            debug!(entity = %key, "skipping point with collection disabled");
            return SyncOutcome::skipped(key.to_string(), "collection disabled")
                .with_entity_kind(key.kind);
        }

        let mut established = Vec::new();
        let ancestry = match self
            .hierarchy
            .ensure_ancestors(&prepared.source, &mut established)
            .await
        {
            Ok(ancestry) => ancestry,
            Err(e) => return self.fail(prepared, &e).await.with_established(established),
        };

        let reconciler = self.hierarchy.reconciler();
        let outcome = match reconciler
            .reconcile(prepared, &ancestry.parents, &ancestry.scope)
            .await
        {
            Ok(reconciled) => {
                self.hierarchy.record(key, reconciled.handle.clone()).await;
                reconciled.into_outcome(key)
            }
            Err(e) => self.fail(prepared, &e).await,
        };
        outcome.with_established(established)
    }

    /// Links one entity to its existing sink counterpart. Nothing is created.
    pub async fn link_entity(&self, prepared: &PreparedEntity) -> SyncOutcome {
        let key = &prepared.key;

        let mut established = Vec::new();
        let ancestry = match self
            .hierarchy
            .ensure_ancestors(&prepared.source, &mut established)
            .await
        {
            Ok(ancestry) => ancestry,
            Err(SyncError::Unresolved(reason)) => {
                debug!(entity = %key, %reason, "ancestor not in sink");
                self.hierarchy.record(key, SinkHandle::Missing).await;
                return SyncOutcome::skipped(key.to_string(), "parent not present in sink")
                    .with_entity_kind(key.kind)
                    .with_established(established);
            }
            Err(e) => return self.fail(prepared, &e).await.with_established(established),
        };

        let outcome = match self.hierarchy.reconciler().link(prepared, &ancestry.scope).await {
            Ok(reconciled) => {
                self.hierarchy.record(key, reconciled.handle.clone()).await;
                reconciled.into_outcome(key)
            }
            Err(e) => self.fail(prepared, &e).await,
        };
        outcome.with_established(established)
    }

    async fn fail(&self, prepared: &PreparedEntity, err: &SyncError) -> SyncOutcome {
        warn!(entity = %prepared.key, error = %err, "entity failed");
        self.hierarchy.record_failure(&prepared.key, err.to_string()).await;
        SyncOutcome::failed(prepared.key.to_string(), err).with_entity_kind(prepared.key.kind)
    }
}

