//! Collaborator abstraction.
//!
//! Defines the traits the engine uses to talk to the source system and the
//! Haystack sink, allowing the reconciliation logic to work against any
//! backend (HTTP clients in production, in-memory systems in tests).

use crate::error::SyncResult;
use crate::merge::TagDelta;
use async_trait::async_trait;
use haystack_types::{
    EntityKind, ParentRefs, RawTags, RefName, Sample, Scalar, SinkEntity, SinkId, SourceEntity,
    TagSet, TagValue, TimeRange,
};
use std::collections::BTreeMap;

/// The record system supplying canonical entities, tags and samples.
#[async_trait]
pub trait SourceSystem: Send + Sync {
    /// Lists entities of `kind`, optionally restricted to the children of
    /// `parent` (a site for equipment, an equipment for points).
    async fn list_entities(
        &self,
        kind: EntityKind,
        parent: Option<&RefName>,
    ) -> SyncResult<Vec<SourceEntity>>;

    /// Reads the current raw tags of one entity.
    async fn read_tags(&self, kind: EntityKind, ref_name: &RefName) -> SyncResult<RawTags>;

    /// Writes key-value tags onto one entity, replacing existing values.
    async fn write_key_value_tags(
        &self,
        kind: EntityKind,
        ref_name: &RefName,
        tags: &BTreeMap<String, Scalar>,
    ) -> SyncResult<()>;

    /// Reads the recorded samples of a point inside `range`, oldest first.
    async fn read_history(&self, point: &RefName, range: &TimeRange) -> SyncResult<Vec<Sample>>;
}

/// The Haystack record system receiving entities, tags and history.
#[async_trait]
pub trait SinkSystem: Send + Sync {
    /// Finds an entity carrying tag `name` with exactly `value`.
    async fn find_by_tag(&self, name: &str, value: &TagValue) -> SyncResult<Option<SinkEntity>>;

    /// Finds an entity of `kind` named `ref_name` among the children of
    /// `parent` (`None` for sites).
    async fn find_by_ref_name(
        &self,
        kind: EntityKind,
        parent: Option<&SinkId>,
        ref_name: &RefName,
    ) -> SyncResult<Option<SinkEntity>>;

    /// Creates an entity and returns it with its assigned id.
    async fn create_entity(
        &self,
        kind: EntityKind,
        parents: &ParentRefs,
        tags: &TagSet,
    ) -> SyncResult<SinkEntity>;

    /// Applies a tag delta to an existing entity.
    async fn update_tags(&self, id: &SinkId, delta: &TagDelta) -> SyncResult<()>;

    /// Reads the current tags of an entity.
    async fn read_tags(&self, id: &SinkId) -> SyncResult<TagSet>;

    /// Appends samples to a point's history.
    async fn write_history(&self, id: &SinkId, samples: &[Sample]) -> SyncResult<()>;
}

/// In-memory systems for testing.
pub mod mock {
    use super::*;
    use crate::codec::scalar_to_json;
    use crate::error::SyncError;
    use haystack_types::{EntityKey, REF_NAME_TAG};
    use std::collections::{HashMap, HashSet};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn offline_error(system: &str) -> SyncError {
        SyncError::Transient(format!("{system} unreachable"))
    }

    #[derive(Default)]
    struct SinkState {
        entities: BTreeMap<SinkId, SinkEntity>,
        history: HashMap<SinkId, Vec<Sample>>,
        mutations: usize,
        history_calls: usize,
        failing_creates: HashSet<String>,
        failing_updates: HashSet<SinkId>,
        failing_history_calls: HashSet<usize>,
        offline: bool,
    }

    /// A Haystack sink held in memory.
    ///
    /// Every mutating call (create, update, history write) increments a
    /// mutation counter so tests can assert that a run touched nothing.
    pub struct MemorySink {
        project: String,
        state: Mutex<SinkState>,
    }

    impl MemorySink {
        /// Creates an empty sink assigning ids in `project`.
        pub fn new(project: impl Into<String>) -> Self {
            Self {
                project: project.into(),
                state: Mutex::new(SinkState::default()),
            }
        }

        /// Generates a fresh id in this sink's project.
        pub fn next_id(&self) -> SyncResult<SinkId> {
            let raw = format!("p:{}:r:{}", self.project, uuid::Uuid::new_v4());
            Ok(SinkId::parse(&raw)?)
        }

        /// Inserts an entity directly, bypassing the mutation counter.
        pub fn insert(&self, entity: SinkEntity) {
            lock(&self.state).entities.insert(entity.id.clone(), entity);
        }

        /// Deletes an entity directly, simulating an external removal.
        pub fn remove(&self, id: &SinkId) -> Option<SinkEntity> {
            lock(&self.state).entities.remove(id)
        }

        /// Sets a tag directly, simulating an operator edit.
        pub fn set_tag(&self, id: &SinkId, name: &str, value: TagValue) {
            if let Some(entity) = lock(&self.state).entities.get_mut(id) {
                entity.tags.insert(name, value);
            }
        }

        pub fn entity(&self, id: &SinkId) -> Option<SinkEntity> {
            lock(&self.state).entities.get(id).cloned()
        }

        pub fn entities(&self) -> Vec<SinkEntity> {
            lock(&self.state).entities.values().cloned().collect()
        }

        /// All entities of `kind` whose refName tag is `name`.
        pub fn named(&self, kind: EntityKind, name: &str) -> Vec<SinkEntity> {
            lock(&self.state)
                .entities
                .values()
                .filter(|e| e.kind == kind && e.ref_name() == Some(name))
                .cloned()
                .collect()
        }

        pub fn len(&self) -> usize {
            lock(&self.state).entities.len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn count(&self, kind: EntityKind) -> usize {
            lock(&self.state)
                .entities
                .values()
                .filter(|e| e.kind == kind)
                .count()
        }

        /// Samples written for a point, in write order.
        pub fn history(&self, id: &SinkId) -> Vec<Sample> {
            lock(&self.state).history.get(id).cloned().unwrap_or_default()
        }

        /// Number of history write calls received, including failed ones.
        pub fn history_calls(&self) -> usize {
            lock(&self.state).history_calls
        }

        /// Number of mutating calls that succeeded.
        pub fn mutations(&self) -> usize {
            lock(&self.state).mutations
        }

        pub fn reset_mutations(&self) {
            lock(&self.state).mutations = 0;
        }

        /// Makes `create_entity` fail transiently for entities named `ref_name`.
        pub fn fail_create_for(&self, ref_name: &str) {
            lock(&self.state).failing_creates.insert(ref_name.to_string());
        }

        /// Makes `update_tags` fail transiently for `id`.
        pub fn fail_update_for(&self, id: &SinkId) {
            lock(&self.state).failing_updates.insert(id.clone());
        }

        /// Makes the `call`-th history write (1-based) fail transiently.
        pub fn fail_history_call(&self, call: usize) {
            lock(&self.state).failing_history_calls.insert(call);
        }

        /// When offline every call fails transiently.
        pub fn set_offline(&self, offline: bool) {
            lock(&self.state).offline = offline;
        }

        /// Clears all injected failures.
        pub fn clear_faults(&self) {
            let mut state = lock(&self.state);
            state.failing_creates.clear();
            state.failing_updates.clear();
            state.failing_history_calls.clear();
            state.offline = false;
        }

        fn check_online(state: &SinkState) -> SyncResult<()> {
            if state.offline {
                Err(offline_error("sink"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SinkSystem for MemorySink {
        async fn find_by_tag(
            &self,
            name: &str,
            value: &TagValue,
        ) -> SyncResult<Option<SinkEntity>> {
            tokio::task::yield_now().await;
            let state = lock(&self.state);
            Self::check_online(&state)?;
            Ok(state
                .entities
                .values()
                .find(|e| e.tags.get(name) == Some(value))
                .cloned())
        }

        async fn find_by_ref_name(
            &self,
            kind: EntityKind,
            parent: Option<&SinkId>,
            ref_name: &RefName,
        ) -> SyncResult<Option<SinkEntity>> {
            tokio::task::yield_now().await;
            let state = lock(&self.state);
            Self::check_online(&state)?;
            Ok(state
                .entities
                .values()
                .find(|e| {
                    e.kind == kind
                        && e.parent_ref() == parent
                        && e.ref_name() == Some(ref_name.as_str())
                })
                .cloned())
        }

        async fn create_entity(
            &self,
            kind: EntityKind,
            parents: &ParentRefs,
            tags: &TagSet,
        ) -> SyncResult<SinkEntity> {
            tokio::task::yield_now().await;
            let id = self.next_id()?;
            let mut state = lock(&self.state);
            Self::check_online(&state)?;
            if let Some(Scalar::Str(name)) = tags.scalar(REF_NAME_TAG) {
                if state.failing_creates.contains(name) {
                    return Err(SyncError::Transient(format!("create {kind} {name} timed out")));
                }
            }
            let entity = SinkEntity {
                id: id.clone(),
                kind,
                site_ref: parents.site.clone(),
                equip_ref: parents.equip.clone(),
                tags: tags.clone(),
            };
            state.entities.insert(id, entity.clone());
            state.mutations += 1;
            Ok(entity)
        }

        async fn update_tags(&self, id: &SinkId, delta: &TagDelta) -> SyncResult<()> {
            tokio::task::yield_now().await;
            let mut state = lock(&self.state);
            Self::check_online(&state)?;
            if state.failing_updates.contains(id) {
                return Err(SyncError::Transient(format!("update {id} timed out")));
            }
            let entity = state
                .entities
                .get_mut(id)
                .ok_or_else(|| SyncError::NotFound(format!("sink entity {id}")))?;
            delta.apply(&mut entity.tags);
            state.mutations += 1;
            Ok(())
        }

        async fn read_tags(&self, id: &SinkId) -> SyncResult<TagSet> {
            tokio::task::yield_now().await;
            let state = lock(&self.state);
            Self::check_online(&state)?;
            state
                .entities
                .get(id)
                .map(|e| e.tags.clone())
                .ok_or_else(|| SyncError::NotFound(format!("sink entity {id}")))
        }

        async fn write_history(&self, id: &SinkId, samples: &[Sample]) -> SyncResult<()> {
            tokio::task::yield_now().await;
            let mut state = lock(&self.state);
            Self::check_online(&state)?;
            state.history_calls += 1;
            let call = state.history_calls;
            if state.failing_history_calls.contains(&call) {
                return Err(SyncError::Transient(format!("history write {call} for {id} timed out")));
            }
            if !state.entities.contains_key(id) {
                return Err(SyncError::NotFound(format!("sink point {id}")));
            }
            state
                .history
                .entry(id.clone())
                .or_default()
                .extend_from_slice(samples);
            state.mutations += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct SourceState {
        entities: BTreeMap<EntityKey, SourceEntity>,
        history: HashMap<RefName, Vec<Sample>>,
        writes: usize,
        failing_writes: HashSet<RefName>,
        offline: bool,
    }

    /// A source system held in memory.
    #[derive(Default)]
    pub struct MemorySource {
        state: Mutex<SourceState>,
    }

    impl MemorySource {
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates a source holding `entities`.
        pub fn with_entities(entities: impl IntoIterator<Item = SourceEntity>) -> Self {
            let source = Self::new();
            for entity in entities {
                source.insert(entity);
            }
            source
        }

        /// Inserts or replaces an entity.
        pub fn insert(&self, entity: SourceEntity) {
            lock(&self.state).entities.insert(entity.key(), entity);
        }

        pub fn entity(&self, kind: EntityKind, ref_name: &RefName) -> Option<SourceEntity> {
            lock(&self.state)
                .entities
                .get(&EntityKey::new(kind, ref_name.clone()))
                .cloned()
        }

        /// All entities, ordered by kind then refName.
        pub fn entities(&self) -> Vec<SourceEntity> {
            lock(&self.state).entities.values().cloned().collect()
        }

        /// The HaystackRef stored on an entity, as written.
        pub fn stored_ref(&self, kind: EntityKind, ref_name: &RefName) -> Option<String> {
            lock(&self.state)
                .entities
                .get(&EntityKey::new(kind, ref_name.clone()))
                .and_then(|e| e.tags.kv_str(haystack_types::HAYSTACK_REF_TAG).map(str::to_string))
        }

        /// Replaces the recorded samples of a point.
        pub fn set_history(&self, point: &RefName, samples: Vec<Sample>) {
            lock(&self.state).history.insert(point.clone(), samples);
        }

        /// Number of successful tag writes.
        pub fn writes(&self) -> usize {
            lock(&self.state).writes
        }

        /// Makes tag writes to `ref_name` fail transiently.
        pub fn fail_writes_for(&self, ref_name: &RefName) {
            lock(&self.state).failing_writes.insert(ref_name.clone());
        }

        pub fn set_offline(&self, offline: bool) {
            lock(&self.state).offline = offline;
        }

        fn check_online(state: &SourceState) -> SyncResult<()> {
            if state.offline {
                Err(offline_error("source"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SourceSystem for MemorySource {
        async fn list_entities(
            &self,
            kind: EntityKind,
            parent: Option<&RefName>,
        ) -> SyncResult<Vec<SourceEntity>> {
            tokio::task::yield_now().await;
            let state = lock(&self.state);
            Self::check_online(&state)?;
            Ok(state
                .entities
                .values()
                .filter(|e| e.kind == kind)
                .filter(|e| parent.is_none() || e.parent() == parent)
                .cloned()
                .collect())
        }

        async fn read_tags(&self, kind: EntityKind, ref_name: &RefName) -> SyncResult<RawTags> {
            tokio::task::yield_now().await;
            let state = lock(&self.state);
            Self::check_online(&state)?;
            state
                .entities
                .get(&EntityKey::new(kind, ref_name.clone()))
                .map(|e| e.tags.clone())
                .ok_or_else(|| SyncError::NotFound(format!("source {kind} {ref_name}")))
        }

        async fn write_key_value_tags(
            &self,
            kind: EntityKind,
            ref_name: &RefName,
            tags: &BTreeMap<String, Scalar>,
        ) -> SyncResult<()> {
            tokio::task::yield_now().await;
            let mut state = lock(&self.state);
            Self::check_online(&state)?;
            if state.failing_writes.contains(ref_name) {
                return Err(SyncError::Transient(format!("tag write to {ref_name} timed out")));
            }
            let entity = state
                .entities
                .get_mut(&EntityKey::new(kind, ref_name.clone()))
                .ok_or_else(|| SyncError::NotFound(format!("source {kind} {ref_name}")))?;
            for (name, value) in tags {
                entity.tags.kv_tags.insert(name.clone(), scalar_to_json(value));
            }
            state.writes += 1;
            Ok(())
        }

        async fn read_history(
            &self,
            point: &RefName,
            range: &TimeRange,
        ) -> SyncResult<Vec<Sample>> {
            tokio::task::yield_now().await;
            let state = lock(&self.state);
            Self::check_online(&state)?;
            Ok(state
                .history
                .get(point)
                .map(|samples| {
                    samples
                        .iter()
                        .filter(|s| range.contains(&s.ts))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }
    }
}
