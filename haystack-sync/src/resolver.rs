//! Reference resolution.
//!
//! Maps a source identity to the sink entity it corresponds to, using the
//! HaystackRef persisted on both systems first and a refName lookup among
//! siblings second.

use crate::error::SyncResult;
use crate::transport::SinkSystem;
use haystack_types::{EntityKey, EntityKind, SinkEntity, SinkId, TagValue, HAYSTACK_REF_TAG};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where in the sink hierarchy an entity is expected to live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentScope {
    /// No parent (sites).
    Root,
    /// Under an existing sink entity.
    Existing(SinkId),
    /// Under a parent that does not exist yet (dry run).
    Planned,
}

impl ParentScope {
    /// The parent id to scope sibling lookups by.
    #[must_use]
    pub fn parent_id(&self) -> Option<&SinkId> {
        match self {
            ParentScope::Existing(id) => Some(id),
            ParentScope::Root | ParentScope::Planned => None,
        }
    }

    fn admits(&self, entity: &SinkEntity) -> bool {
        match self {
            ParentScope::Root => entity.parent_ref().is_none(),
            ParentScope::Existing(id) => entity.parent_ref() == Some(id),
            ParentScope::Planned => false,
        }
    }
}

/// How a resolved entity was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Through the stored HaystackRef.
    Intact,
    /// Through the refName lookup; the link must be (re)written.
    Adopted,
}

/// Outcome of resolving one source identity.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved { entity: SinkEntity, link: LinkState },
    /// A stored reference points at nothing usable.
    Orphaned { stale: SinkId },
    Absent,
}

impl Resolution {
    #[must_use]
    pub fn sink_id(&self) -> Option<&SinkId> {
        match self {
            Resolution::Resolved { entity, .. } => Some(&entity.id),
            Resolution::Orphaned { .. } | Resolution::Absent => None,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }
}

/// Resolves source identities against the sink.
#[derive(Clone)]
pub struct ReferenceResolver {
    sink: Arc<dyn SinkSystem>,
}

impl ReferenceResolver {
    pub fn new(sink: Arc<dyn SinkSystem>) -> Self {
        Self { sink }
    }

    /// Resolves `key` given the reference stored on the source, if any.
    ///
    /// A stored reference is trusted only when the entity it names still
    /// exists with the expected kind and parent. Otherwise the entity is
    /// looked up by refName among its siblings, and adopted if found there.
    pub async fn resolve(
        &self,
        key: &EntityKey,
        stored: Option<&SinkId>,
        scope: &ParentScope,
    ) -> SyncResult<Resolution> {
        if let Some(id) = stored {
            let link_tag = TagValue::reference(id.clone());
            match self.sink.find_by_tag(HAYSTACK_REF_TAG, &link_tag).await? {
                Some(entity) if matches_key(&entity, key.kind, scope) => {
                    debug!(entity = %key, sink_id = %entity.id, "reference intact");
                    return Ok(Resolution::Resolved {
                        entity,
                        link: LinkState::Intact,
                    });
                }
                Some(entity) => {
                    warn!(
                        entity = %key,
                        sink_id = %entity.id,
                        found_kind = %entity.kind,
                        "stored reference points at a mismatching entity"
                    );
                }
                None => debug!(entity = %key, stale = %id, "stored reference not found"),
            }
        }

        if *scope != ParentScope::Planned {
            let found = self
                .sink
                .find_by_ref_name(key.kind, scope.parent_id(), &key.ref_name)
                .await?;
            if let Some(entity) = found.filter(|e| matches_key(e, key.kind, scope)) {
                debug!(entity = %key, sink_id = %entity.id, "adopting entity found by refName");
                return Ok(Resolution::Resolved {
                    entity,
                    link: LinkState::Adopted,
                });
            }
        }

        match stored {
            Some(stale) => {
                warn!(entity = %key, stale = %stale, "reference orphaned");
                Ok(Resolution::Orphaned {
                    stale: stale.clone(),
                })
            }
            None => Ok(Resolution::Absent),
        }
    }
}

fn matches_key(entity: &SinkEntity, kind: EntityKind, scope: &ParentScope) -> bool {
    entity.kind == kind && scope.admits(entity)
}
