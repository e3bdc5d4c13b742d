#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use haystack_sync::transport::mock::{MemorySink, MemorySource};
use haystack_sync::{SyncConfig, SyncOptions, SyncService};
use haystack_types::{
    EntityKind, RefName, Sample, Scalar, SinkEntity, SinkId, SourceEntity, TagSet, TagValue,
    HAYSTACK_REF_TAG, REF_NAME_TAG,
};
use std::sync::Arc;

pub fn name(s: &str) -> RefName {
    RefName::parse(s).unwrap()
}

pub fn site(n: &str) -> SourceEntity {
    SourceEntity::site(name(n)).with_marker("geoAddr").with_dis(n.to_uppercase())
}

pub fn equip(n: &str, site: &str) -> SourceEntity {
    SourceEntity::equipment(name(n), name(site)).with_marker("ahu")
}

pub fn point(n: &str, site: &str, equip: &str) -> SourceEntity {
    SourceEntity::point(name(n), name(site), name(equip))
        .with_marker("sensor")
        .with_unit("°F")
        .with_kv("precision", serde_json::json!(1))
}

/// One site `bldg`, one equipment `ahu1`, and points `p1..=p{points}`.
pub fn building(points: usize) -> Vec<SourceEntity> {
    let mut entities = vec![site("bldg"), equip("ahu1", "bldg")];
    entities.extend((1..=points).map(|i| point(&format!("p{i}"), "bldg", "ahu1")));
    entities
}

pub fn systems(entities: Vec<SourceEntity>) -> (Arc<MemorySource>, Arc<MemorySink>) {
    (
        Arc::new(MemorySource::with_entities(entities)),
        Arc::new(MemorySink::new("demo")),
    )
}

pub fn service(source: &Arc<MemorySource>, sink: &Arc<MemorySink>, config: SyncConfig) -> SyncService {
    SyncService::new(source.clone(), sink.clone(), config).unwrap()
}

pub fn options(batch_size: usize) -> SyncOptions {
    SyncOptions {
        batch_size,
        dry_run: false,
        limit: None,
        sync_all: false,
    }
}

/// Inserts a sink entity directly, optionally carrying its own HaystackRef.
pub fn seed(
    sink: &MemorySink,
    kind: EntityKind,
    parent: Option<&SinkId>,
    ref_name: &str,
    linked: bool,
) -> SinkId {
    let id = sink.next_id().unwrap();
    let mut tags = TagSet::new()
        .with_marker(kind.marker())
        .with_scalar(REF_NAME_TAG, Scalar::Str(ref_name.into()));
    if linked {
        tags.insert(HAYSTACK_REF_TAG, TagValue::reference(id.clone()));
    }
    let (site_ref, equip_ref) = match kind {
        EntityKind::Site => (None, None),
        EntityKind::Equipment => (parent.cloned(), None),
        EntityKind::Point => (None, parent.cloned()),
    };
    sink.insert(SinkEntity {
        id: id.clone(),
        kind,
        site_ref,
        equip_ref,
        tags,
    });
    id
}

/// The single sink entity of `kind` named `n`.
pub fn only(sink: &MemorySink, kind: EntityKind, n: &str) -> SinkEntity {
    let mut found = sink.named(kind, n);
    assert_eq!(found.len(), 1, "expected exactly one {kind} named {n}");
    found.remove(0)
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_761_955_200 + secs, 0).unwrap()
}

/// `count` samples one minute apart starting at `at(0)`.
pub fn samples(count: usize) -> Vec<Sample> {
    (0..count)
        .map(|i| Sample::number(at(i as i64 * 60), i as f64))
        .collect()
}
