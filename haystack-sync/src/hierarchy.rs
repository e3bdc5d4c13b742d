//! Ancestor establishment.
//!
//! Before a child is reconciled its site (and, for points, its equipment)
//! must exist in the sink. Ancestors are established top-down, once per run:
//! the first task to need an ancestor does the work and every other task
//! waits on the same cell. Failures are cached too, so a broken ancestor
//! fails its whole subtree without being retried.
//!
//! The task that establishes an ancestor also reports it: the ancestor's
//! outcome is handed back to that task's caller so it is counted and its
//! reference checkpointed like any other item.

use crate::codec::{self, PreparedEntity};
use crate::engine::{Reconciled, Reconciler};
use crate::error::{SyncError, SyncResult};
use crate::report::{OutcomeKind, SyncOutcome};
use crate::resolver::{ParentScope, Resolution};
use crate::transport::SourceSystem;
use haystack_types::{EntityKey, EntityKind, ParentRefs, SinkId, SourceEntity};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

/// Where an entity lives, or will live, in the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkHandle {
    Existing(SinkId),
    /// Would be created by a real run.
    Planned,
    /// Not present and not to be created.
    Missing,
}

impl SinkHandle {
    #[must_use]
    pub fn id(&self) -> Option<&SinkId> {
        match self {
            SinkHandle::Existing(id) => Some(id),
            SinkHandle::Planned | SinkHandle::Missing => None,
        }
    }
}

/// What the builder may do to establish an ancestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyMode {
    /// Resolve, creating or updating as needed.
    Establish,
    /// Resolve and repair links, never create.
    Link,
    /// Resolve only, write nothing.
    Resolve,
}

/// Resolved ancestry of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ancestry {
    pub parents: ParentRefs,
    pub scope: ParentScope,
}

type Slot = Arc<OnceCell<Result<SinkHandle, String>>>;

/// Establishes ancestors with single-flight caching.
pub struct HierarchyBuilder {
    reconciler: Arc<Reconciler>,
    source: Arc<dyn SourceSystem>,
    index: HashMap<EntityKey, PreparedEntity>,
    cache: Mutex<HashMap<EntityKey, Slot>>,
    mode: HierarchyMode,
}

impl HierarchyBuilder {
    /// Creates a builder. `known` are the prepared entities of the current
    /// run; ancestors outside that set are fetched from the source.
    pub fn new(
        reconciler: Arc<Reconciler>,
        source: Arc<dyn SourceSystem>,
        known: impl IntoIterator<Item = PreparedEntity>,
        mode: HierarchyMode,
    ) -> Self {
        Self {
            reconciler,
            source,
            index: known.into_iter().map(|p| (p.key.clone(), p)).collect(),
            cache: Mutex::new(HashMap::new()),
            mode,
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn mode(&self) -> HierarchyMode {
        self.mode
    }

    /// Establishes the site and equipment above `entity`.
    ///
    /// Outcomes of ancestors established by this call are pushed to
    /// `established`, also when the call fails further down. Resolve mode
    /// reports nothing.
    ///
    /// Returns `SyncError::Unresolved` when an ancestor is missing from the
    /// sink in a non-creating mode, and `SyncError::Hierarchy` when an
    /// ancestor failed.
    pub async fn ensure_ancestors(
        &self,
        entity: &SourceEntity,
        established: &mut Vec<SyncOutcome>,
    ) -> SyncResult<Ancestry> {
        let mut ancestry = Ancestry {
            parents: ParentRefs::root(),
            scope: ParentScope::Root,
        };

        for key in ancestor_keys(entity) {
            let (handle, outcome) = self.ensure(&key, &ancestry, entity).await;
            established.extend(outcome);
            match handle? {
                SinkHandle::Existing(id) => {
                    match key.kind {
                        EntityKind::Site => ancestry.parents.site = Some(id.clone()),
                        _ => ancestry.parents.equip = Some(id.clone()),
                    }
                    ancestry.scope = ParentScope::Existing(id);
                }
                SinkHandle::Planned => ancestry.scope = ParentScope::Planned,
                SinkHandle::Missing => {
                    return Err(SyncError::Unresolved(format!("{key} not present in sink")));
                }
            }
        }

        Ok(ancestry)
    }

    /// Records the handle an entity was reconciled to, so its descendants
    /// reuse it.
    pub async fn record(&self, key: &EntityKey, handle: SinkHandle) {
        let slot = self.slot(key).await;
        if slot.set(Ok(handle)).is_err() {
            debug!(entity = %key, "handle already cached");
        }
    }

    /// Records that an entity failed, failing its descendants.
    pub async fn record_failure(&self, key: &EntityKey, message: impl Into<String>) {
        let slot = self.slot(key).await;
        if slot.set(Err(message.into())).is_err() {
            debug!(entity = %key, "handle already cached");
        }
    }

    /// Resolves the sink id of an entity without writing anything.
    pub async fn resolve_handle(&self, prepared: &PreparedEntity) -> SyncResult<SinkId> {
        let ancestry = self
            .ensure_ancestors(&prepared.source, &mut Vec::new())
            .await?;
        let resolution = self
            .reconciler
            .resolver()
            .resolve(&prepared.key, prepared.stored_ref.as_ref(), &ancestry.scope)
            .await?;
        match resolution {
            Resolution::Resolved { entity, .. } => Ok(entity.id),
            Resolution::Orphaned { stale } => Err(SyncError::Unresolved(format!(
                "{} has a stale reference @{stale}",
                prepared.key
            ))),
            Resolution::Absent => Err(SyncError::Unresolved(format!(
                "{} not present in sink",
                prepared.key
            ))),
        }
    }

    async fn slot(&self, key: &EntityKey) -> Slot {
        let mut cache = self.cache.lock().await;
        cache.entry(key.clone()).or_default().clone()
    }

    /// Returns the ancestor's handle, plus its outcome when this call was
    /// the one that established it.
    async fn ensure(
        &self,
        key: &EntityKey,
        ancestry: &Ancestry,
        child: &SourceEntity,
    ) -> (SyncResult<SinkHandle>, Option<SyncOutcome>) {
        let slot = self.slot(key).await;
        let mut outcome = None;
        let captured = &mut outcome;
        let result = slot
            .get_or_init(|| async move {
                let result = self.establish(key, ancestry, child).await;
                if self.mode != HierarchyMode::Resolve {
                    *captured = Some(match &result {
                        Ok(reconciled) => reconciled.clone().into_outcome(key),
                        Err(e) => SyncOutcome::failed(key.to_string(), e).with_entity_kind(key.kind),
                    });
                }
                match result {
                    Ok(reconciled) => Ok(reconciled.handle),
                    Err(e) => {
                        warn!(entity = %key, error = %e, "failed to establish ancestor");
                        Err(e.to_string())
                    }
                }
            })
            .await
            .clone();
        let handle = result.map_err(|msg| SyncError::Hierarchy(format!("{key}: {msg}")));
        (handle, outcome)
    }

    async fn establish(
        &self,
        key: &EntityKey,
        ancestry: &Ancestry,
        child: &SourceEntity,
    ) -> SyncResult<Reconciled> {
        let prepared = match self.index.get(key) {
            Some(prepared) => prepared.clone(),
            None => self.fetch(key).await?,
        };
        if key.kind == EntityKind::Equipment && prepared.source.site != child.site {
            return Err(SyncError::Hierarchy(format!(
                "{key} belongs to site {:?}, not {:?}",
                prepared.source.site.as_ref().map(|s| s.as_str()),
                child.site.as_ref().map(|s| s.as_str()),
            )));
        }

        match self.mode {
            HierarchyMode::Establish => {
                self.reconciler
                    .reconcile(&prepared, &ancestry.parents, &ancestry.scope)
                    .await
            }
            HierarchyMode::Link => self.reconciler.link(&prepared, &ancestry.scope).await,
            HierarchyMode::Resolve => {
                let resolution = self
                    .reconciler
                    .resolver()
                    .resolve(key, prepared.stored_ref.as_ref(), &ancestry.scope)
                    .await?;
                let handle = match resolution {
                    Resolution::Resolved { entity, .. } => SinkHandle::Existing(entity.id),
                    Resolution::Orphaned { .. } | Resolution::Absent => SinkHandle::Missing,
                };
                Ok(Reconciled {
                    outcome: OutcomeKind::Unchanged,
                    handle,
                    link: None,
                })
            }
        }
    }

    async fn fetch(&self, key: &EntityKey) -> SyncResult<PreparedEntity> {
        debug!(entity = %key, "fetching ancestor from source");
        let found = self
            .source
            .list_entities(key.kind, None)
            .await?
            .into_iter()
            .find(|e| e.ref_name == key.ref_name)
            .ok_or_else(|| SyncError::NotFound(format!("source {key}")))?;
        codec::prepare(found)
    }
}

fn ancestor_keys(entity: &SourceEntity) -> Vec<EntityKey> {
    let mut keys = Vec::with_capacity(2);
    if entity.kind != EntityKind::Site {
        if let Some(site) = &entity.site {
            keys.push(EntityKey::new(EntityKind::Site, site.clone()));
        }
    }
    if entity.kind == EntityKind::Point {
        if let Some(equip) = &entity.equip {
            keys.push(EntityKey::new(EntityKind::Equipment, equip.clone()));
        }
    }
    keys
}
