mod common;

use common::{
    at, building, equip, name, only, options, point, samples, seed, service, site, systems,
};
use haystack_sync::transport::mock::MemorySource;
use haystack_sync::{
    FailureClass, HistoryOptions, RunStatus, SyncConfig, SyncError, SyncOptions,
};
use haystack_types::{EntityKind, Sample, Scalar, TagValue, TimeRange, HAYSTACK_REF_TAG};
use pretty_assertions::assert_eq;
use serde_json::json;

fn stored(source: &MemorySource, kind: EntityKind, n: &str) -> Option<String> {
    source.stored_ref(kind, &name(n))
}

fn history_options() -> HistoryOptions {
    HistoryOptions {
        chunk_size: 1000,
        dry_run: false,
        limit: None,
        sync_all: false,
    }
}

fn november() -> TimeRange {
    TimeRange::parse("2025-11-01", "2025-11-03").unwrap()
}

// ── Entity sync ───────────────────────────────────────────────────

#[tokio::test]
async fn first_sync_creates_and_links_everything() {
    let (source, sink) = systems(building(3));
    let svc = service(&source, &sink, SyncConfig::default());

    let report = svc.sync(source.entities(), &options(100)).await.unwrap();

    assert_eq!(report.counts.created, 5);
    assert_eq!(report.kind_counts(EntityKind::Point).created, 3);
    assert_eq!(report.batches, 3);
    assert_eq!(report.checkpoints, 3);
    assert_eq!(report.status(), RunStatus::Success);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(sink.len(), 5);

    for (kind, n) in [
        (EntityKind::Site, "bldg"),
        (EntityKind::Equipment, "ahu1"),
        (EntityKind::Point, "p1"),
        (EntityKind::Point, "p3"),
    ] {
        let entity = only(&sink, kind, n);
        assert_eq!(stored(&source, kind, n).as_deref(), Some(entity.id.as_str()));
        assert_eq!(
            entity.tags.get(HAYSTACK_REF_TAG),
            Some(&TagValue::reference(entity.id.clone()))
        );
    }
    assert_eq!(source.writes(), 5);
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let (source, sink) = systems(building(3));
    let svc = service(&source, &sink, SyncConfig::default());
    svc.sync(source.entities(), &options(2)).await.unwrap();
    sink.reset_mutations();
    let writes = source.writes();

    let report = svc.sync(source.entities(), &options(2)).await.unwrap();

    assert_eq!(report.counts.unchanged, 5);
    assert_eq!(report.counts.total(), 5);
    assert_eq!(report.status(), RunStatus::NoChanges);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(sink.mutations(), 0);
    assert_eq!(source.writes(), writes);
    assert_eq!(sink.len(), 5);
}

#[tokio::test]
async fn interrupted_run_resumes_without_duplicates() {
    let (source, sink) = systems(building(4));
    let svc = service(&source, &sink, SyncConfig::default());
    sink.fail_create_for("p3");
    sink.fail_create_for("p4");

    let first = svc.sync(source.entities(), &options(2)).await.unwrap();
    assert_eq!(first.status(), RunStatus::PartialFailure);
    assert_eq!(first.kind_counts(EntityKind::Point).failed, 2);
    assert!(stored(&source, EntityKind::Point, "p1").is_some());
    assert!(stored(&source, EntityKind::Point, "p3").is_none());

    sink.clear_faults();
    let second = svc.sync(source.entities(), &options(2)).await.unwrap();

    assert_eq!(second.kind_counts(EntityKind::Point).created, 2);
    assert_eq!(second.kind_counts(EntityKind::Point).unchanged, 2);
    assert_eq!(sink.count(EntityKind::Point), 4);
    for n in ["p1", "p2", "p3", "p4"] {
        let entity = only(&sink, EntityKind::Point, n);
        assert_eq!(stored(&source, EntityKind::Point, n).as_deref(), Some(entity.id.as_str()));
    }
}

#[tokio::test]
async fn lost_reference_is_recovered_by_name() {
    let (source, sink) = systems(building(2));
    let svc = service(&source, &sink, SyncConfig::default());
    source.fail_writes_for(&name("p1"));

    let first = svc.sync(source.entities(), &options(100)).await.unwrap();
    assert_eq!(first.checkpoint_errors.len(), 1);
    assert_eq!(first.status(), RunStatus::PartialFailure);
    assert!(stored(&source, EntityKind::Point, "p1").is_none());
    assert!(stored(&source, EntityKind::Point, "p2").is_some());

    let second = svc.sync(source.entities(), &options(100)).await.unwrap();

    assert_eq!(second.checkpoint_errors.len(), 1);
    assert_eq!(sink.count(EntityKind::Point), 2);
    assert_eq!(second.kind_counts(EntityKind::Point).updated, 1);
    assert_eq!(second.kind_counts(EntityKind::Point).created, 0);
}

#[tokio::test]
async fn deleted_sink_entity_is_recreated() {
    let (source, sink) = systems(building(2));
    let svc = service(&source, &sink, SyncConfig::default());
    svc.sync(source.entities(), &options(100)).await.unwrap();
    let old = only(&sink, EntityKind::Point, "p1").id;
    sink.remove(&old);

    let report = svc.sync(source.entities(), &options(100)).await.unwrap();

    assert_eq!(report.counts.created, 1);
    assert_eq!(report.counts.unchanged, 3);
    let new = only(&sink, EntityKind::Point, "p1").id;
    assert_ne!(new, old);
    assert_eq!(stored(&source, EntityKind::Point, "p1").as_deref(), Some(new.as_str()));
}

#[tokio::test]
async fn sink_tags_survive_and_source_wins_conflicts() {
    let (source, sink) = systems(building(1));
    let svc = service(&source, &sink, SyncConfig::default());
    svc.sync(source.entities(), &options(100)).await.unwrap();
    let id = only(&sink, EntityKind::Point, "p1").id;
    sink.set_tag(&id, "operatorNote", TagValue::str("checked"));
    sink.set_tag(&id, "precision", TagValue::Scalar(Scalar::Number(3.0)));

    let mut p1 = source.entity(EntityKind::Point, &name("p1")).unwrap();
    p1.metadata.unit = None;
    source.insert(p1);

    let report = svc.sync(source.entities(), &options(100)).await.unwrap();

    assert_eq!(report.kind_counts(EntityKind::Point).updated, 1);
    let tags = sink.entity(&id).unwrap().tags;
    assert_eq!(tags.scalar("operatorNote"), Some(&Scalar::Str("checked".into())));
    assert_eq!(tags.scalar("precision"), Some(&Scalar::Number(1.0)));
    assert!(!tags.contains("unit"));
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let (source, sink) = systems(building(2));
    let svc = service(&source, &sink, SyncConfig::default());
    let opts = SyncOptions {
        dry_run: true,
        ..options(100)
    };

    let report = svc.sync(source.entities(), &opts).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.counts.created, 4);
    assert!(sink.is_empty());
    assert_eq!(sink.mutations(), 0);
    assert_eq!(source.writes(), 0);
    assert!(report.to_string().starts_with("[dry run] success"));
}

#[tokio::test]
async fn dry_run_reports_pending_updates() {
    let (source, sink) = systems(building(1));
    let svc = service(&source, &sink, SyncConfig::default());
    svc.sync(source.entities(), &options(100)).await.unwrap();
    sink.reset_mutations();
    let mut bldg = source.entity(EntityKind::Site, &name("bldg")).unwrap();
    bldg.metadata.dis = Some("Renamed".into());
    source.insert(bldg);

    let opts = SyncOptions {
        dry_run: true,
        ..options(100)
    };
    let report = svc.sync(source.entities(), &opts).await.unwrap();

    assert_eq!(report.kind_counts(EntityKind::Site).updated, 1);
    assert_eq!(report.counts.unchanged, 2);
    assert_eq!(sink.mutations(), 0);
    let site = only(&sink, EntityKind::Site, "bldg");
    assert_eq!(site.tags.scalar("dis"), Some(&Scalar::Str("BLDG".into())));
}

#[tokio::test]
async fn dry_run_counts_match_the_real_run() {
    let (source, sink) = systems(building(4));
    let svc = service(&source, &sink, SyncConfig::default());
    svc.sync(source.entities(), &options(100)).await.unwrap();

    let ahu = only(&sink, EntityKind::Equipment, "ahu1").id;
    sink.remove(&only(&sink, EntityKind::Point, "p1").id);
    let mut bldg = source.entity(EntityKind::Site, &name("bldg")).unwrap();
    bldg.metadata.dis = Some("Renamed".into());
    source.insert(bldg);
    seed(&sink, EntityKind::Point, Some(&ahu), "p5", false);
    source.insert(point("p5", "bldg", "ahu1"));
    source.insert(point("p6", "bldg", "ahu1"));
    sink.reset_mutations();
    let writes = source.writes();

    let dry_opts = SyncOptions {
        dry_run: true,
        ..options(2)
    };
    let planned = svc.sync(source.entities(), &dry_opts).await.unwrap();

    assert_eq!(sink.mutations(), 0);
    assert_eq!(source.writes(), writes);

    let applied = svc.sync(source.entities(), &options(2)).await.unwrap();

    assert_eq!(planned.counts, applied.counts);
    assert_eq!(planned.by_kind, applied.by_kind);
    assert_eq!(applied.counts.created, 2);
    assert_eq!(applied.counts.updated, 2);
    assert_eq!(applied.counts.unchanged, 4);
    assert_eq!(applied.counts.failed, 0);
    assert_eq!(sink.count(EntityKind::Point), 6);
}

#[tokio::test]
async fn ancestors_outside_the_input_are_counted_and_linked() {
    let (source, sink) = systems(building(1));
    let svc = service(&source, &sink, SyncConfig::default());
    let p1 = || source.entity(EntityKind::Point, &name("p1")).unwrap();
    sink.fail_create_for("p1");

    let first = svc.sync(vec![p1()], &options(100)).await.unwrap();

    assert_eq!(sink.len(), 2);
    assert_eq!(first.counts.created, 2);
    assert_eq!(first.counts.failed, 1);
    assert_eq!(first.kind_counts(EntityKind::Site).created, 1);
    assert_eq!(first.kind_counts(EntityKind::Equipment).created, 1);
    assert_eq!(first.status(), RunStatus::PartialFailure);
    assert_eq!(first.checkpoints, 1);
    let site = only(&sink, EntityKind::Site, "bldg");
    let ahu = only(&sink, EntityKind::Equipment, "ahu1");
    assert_eq!(stored(&source, EntityKind::Site, "bldg").as_deref(), Some(site.id.as_str()));
    assert_eq!(stored(&source, EntityKind::Equipment, "ahu1").as_deref(), Some(ahu.id.as_str()));
    assert!(stored(&source, EntityKind::Point, "p1").is_none());

    sink.clear_faults();
    let second = svc.sync(vec![p1()], &options(100)).await.unwrap();

    assert_eq!(second.counts.created, 1);
    assert_eq!(second.counts.unchanged, 2);
    assert_eq!(second.status(), RunStatus::Success);
    assert_eq!(sink.len(), 3);
    let point = only(&sink, EntityKind::Point, "p1");
    assert_eq!(point.equip_ref.as_ref(), Some(&ahu.id));
    assert_eq!(stored(&source, EntityKind::Point, "p1").as_deref(), Some(point.id.as_str()));
}

// ── Pre-flight validation ─────────────────────────────────────────

#[tokio::test]
async fn duplicate_identities_abort_the_run() {
    let mut entities = building(1);
    entities.push(point("p1", "bldg", "ahu1"));
    let (source, sink) = systems(Vec::new());
    let svc = service(&source, &sink, SyncConfig::default());

    let err = svc.sync(entities, &options(100)).await.unwrap_err();

    assert!(matches!(err, SyncError::Validation(ref m) if m.contains("point/p1")));
    assert!(sink.is_empty());
}

#[tokio::test]
async fn invalid_entity_aborts_before_any_write() {
    let mut entities = building(2);
    entities.push(point("bad", "bldg", "ahu1").with_kv("list", json!([1, 2])));
    let (source, sink) = systems(Vec::new());
    let svc = service(&source, &sink, SyncConfig::default());

    assert!(svc.sync(entities, &options(100)).await.is_err());
    assert!(sink.is_empty());
    assert_eq!(sink.mutations(), 0);
}

#[tokio::test]
async fn zero_batch_size_is_rejected() {
    let (source, sink) = systems(building(1));
    let svc = service(&source, &sink, SyncConfig::default());
    let err = svc.sync(source.entities(), &options(0)).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
}

#[test]
fn invalid_config_is_rejected() {
    let (source, sink) = systems(Vec::new());
    let config = SyncConfig {
        max_concurrent: 0,
        ..SyncConfig::default()
    };
    assert!(haystack_sync::SyncService::new(source, sink, config).is_err());
}

// ── Selection ─────────────────────────────────────────────────────

#[tokio::test]
async fn limit_takes_first_points_by_name() {
    let mut entities = building(5);
    entities.reverse();
    let (source, sink) = systems(entities.clone());
    let svc = service(&source, &sink, SyncConfig::default());
    let opts = SyncOptions {
        limit: Some(2),
        ..options(100)
    };

    svc.sync(entities, &opts).await.unwrap();

    assert_eq!(sink.count(EntityKind::Point), 2);
    only(&sink, EntityKind::Point, "p1");
    only(&sink, EntityKind::Point, "p2");
    assert!(sink.named(EntityKind::Point, "p3").is_empty());
    assert_eq!(sink.count(EntityKind::Equipment), 1);
}

#[tokio::test]
async fn disabled_points_are_skipped() {
    let mut entities = building(1);
    entities.push(point("off", "bldg", "ahu1").with_collect(false));
    let (source, sink) = systems(entities);
    let svc = service(&source, &sink, SyncConfig::default());

    let report = svc.sync(source.entities(), &options(100)).await.unwrap();
    assert_eq!(report.counts.skipped, 1);
    assert!(sink.named(EntityKind::Point, "off").is_empty());

    let opts = SyncOptions {
        sync_all: true,
        ..options(100)
    };
    let report = svc.sync(source.entities(), &opts).await.unwrap();
    assert_eq!(report.counts.created, 1);
    only(&sink, EntityKind::Point, "off");
}

#[tokio::test]
async fn sync_site_touches_only_that_site() {
    let entities = vec![
        site("north"),
        equip("ahu1", "north"),
        point("n1", "north", "ahu1"),
        site("south"),
        equip("ahu2", "south"),
        point("s1", "south", "ahu2"),
    ];
    let (source, sink) = systems(entities);
    let svc = service(&source, &sink, SyncConfig::default());

    let report = svc.sync_site(&name("north"), &options(100)).await.unwrap();

    assert_eq!(report.counts.created, 3);
    only(&sink, EntityKind::Point, "n1");
    assert!(sink.named(EntityKind::Site, "south").is_empty());

    let err = svc.sync_site(&name("west"), &options(100)).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

#[tokio::test]
async fn unreachable_sink_is_a_total_failure() {
    let (source, sink) = systems(building(2));
    sink.set_offline(true);
    let svc = service(&source, &sink, SyncConfig::default());

    let report = svc.sync(source.entities(), &options(100)).await.unwrap();

    assert_eq!(report.status(), RunStatus::TotalFailure);
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.failures.len(), 4);
    assert_eq!(report.failures[0].failure.class, FailureClass::Transient);
    assert_eq!(report.failures[3].failure.class, FailureClass::Hierarchy);
    assert_eq!(report.checkpoints, 0);
    assert_eq!(source.writes(), 0);
}

// ── Reference sync ────────────────────────────────────────────────

#[tokio::test]
async fn refs_are_linked_from_existing_sink_entities() {
    let (source, sink) = systems(building(2));
    let site_id = seed(&sink, EntityKind::Site, None, "bldg", false);
    let ahu_id = seed(&sink, EntityKind::Equipment, Some(&site_id), "ahu1", false);
    let p1_id = seed(&sink, EntityKind::Point, Some(&ahu_id), "p1", false);
    let svc = service(&source, &sink, SyncConfig::default());

    let report = svc.sync_refs_from_sink(None, false).await.unwrap();

    assert_eq!(report.counts.updated, 3);
    assert_eq!(report.counts.skipped, 1);
    assert_eq!(report.counts.created, 0);
    assert_eq!(sink.len(), 3);
    assert_eq!(stored(&source, EntityKind::Site, "bldg").as_deref(), Some(site_id.as_str()));
    assert_eq!(stored(&source, EntityKind::Point, "p1").as_deref(), Some(p1_id.as_str()));
    assert!(stored(&source, EntityKind::Point, "p2").is_none());
    assert_eq!(
        sink.entity(&p1_id).unwrap().tags.get(HAYSTACK_REF_TAG),
        Some(&TagValue::reference(p1_id.clone()))
    );

    let again = svc
        .sync_refs_from_sink(Some(&name("bldg")), false)
        .await
        .unwrap();
    assert_eq!(again.counts.unchanged, 3);
    assert_eq!(again.status(), RunStatus::NoChanges);
}

#[tokio::test]
async fn ref_sync_dry_run_writes_nothing() {
    let (source, sink) = systems(building(1));
    let site_id = seed(&sink, EntityKind::Site, None, "bldg", false);
    seed(&sink, EntityKind::Equipment, Some(&site_id), "ahu1", false);
    let svc = service(&source, &sink, SyncConfig::default());

    let report = svc.sync_refs_from_sink(None, true).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.counts.updated, 2);
    assert_eq!(sink.mutations(), 0);
    assert_eq!(source.writes(), 0);
    assert!(!sink.entity(&site_id).unwrap().tags.contains(HAYSTACK_REF_TAG));
}

// ── History ───────────────────────────────────────────────────────

#[tokio::test]
async fn history_is_written_in_chunks_for_synced_points() {
    let (source, sink) = systems(building(2));
    let svc = service(&source, &sink, SyncConfig::default());
    svc.sync(source.entities(), &options(100)).await.unwrap();
    let mut data = samples(2500);
    data.push(Sample::number(at(60 * 24 * 3600), 0.0));
    source.set_history(&name("p1"), data);

    let report = svc
        .write_history_for_site(&name("bldg"), &november(), &history_options())
        .await
        .unwrap();

    assert_eq!(report.counts.created, 3);
    assert_eq!(report.counts.skipped, 1);
    assert_eq!(report.status(), RunStatus::Success);
    let p1 = only(&sink, EntityKind::Point, "p1");
    assert_eq!(sink.history(&p1.id).len(), 2500);
}

#[tokio::test]
async fn history_for_unsynced_point_fails_without_creating() {
    let (source, sink) = systems(building(1));
    let svc = service(&source, &sink, SyncConfig::default());
    svc.sync(source.entities(), &options(100)).await.unwrap();
    source.insert(point("p9", "bldg", "ahu1"));
    source.set_history(&name("p1"), samples(10));
    source.set_history(&name("p9"), samples(10));

    let report = svc
        .write_history_for_site(&name("bldg"), &november(), &history_options())
        .await
        .unwrap();

    assert_eq!(report.counts.created, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].identity, "point/p9");
    assert_eq!(report.failures[0].failure.class, FailureClass::Hierarchy);
    assert!(sink.named(EntityKind::Point, "p9").is_empty());
    assert_eq!(report.status(), RunStatus::PartialFailure);
}

#[tokio::test]
async fn history_dry_run_and_validation() {
    let (source, sink) = systems(building(1));
    let svc = service(&source, &sink, SyncConfig::default());
    svc.sync(source.entities(), &options(100)).await.unwrap();
    source.set_history(&name("p1"), samples(25));

    let dry = HistoryOptions {
        chunk_size: 10,
        dry_run: true,
        ..history_options()
    };
    let report = svc
        .write_history_for_site(&name("bldg"), &november(), &dry)
        .await
        .unwrap();
    assert_eq!(report.counts.created, 3);
    assert_eq!(sink.history_calls(), 0);

    let zero = HistoryOptions {
        chunk_size: 0,
        ..history_options()
    };
    assert!(matches!(
        svc.write_history_for_site(&name("bldg"), &november(), &zero).await,
        Err(SyncError::Validation(_))
    ));
    assert!(matches!(
        svc.write_history_for_site(&name("west"), &november(), &history_options()).await,
        Err(SyncError::NotFound(_))
    ));
}

#[tokio::test]
async fn history_skips_disabled_points_and_honors_limit() {
    let mut entities = building(3);
    entities.push(point("p0", "bldg", "ahu1").with_collect(false));
    let (source, sink) = systems(entities);
    let svc = service(&source, &sink, SyncConfig::default());
    let all = SyncOptions {
        sync_all: true,
        ..options(100)
    };
    svc.sync(source.entities(), &all).await.unwrap();
    for n in ["p0", "p1", "p2", "p3"] {
        source.set_history(&name(n), samples(5));
    }

    let opts = HistoryOptions {
        limit: Some(2),
        ..history_options()
    };
    let report = svc
        .write_history_for_site(&name("bldg"), &november(), &opts)
        .await
        .unwrap();

    assert_eq!(report.counts.created, 2);
    let p0 = only(&sink, EntityKind::Point, "p0");
    let p3 = only(&sink, EntityKind::Point, "p3");
    assert!(sink.history(&p0.id).is_empty());
    assert!(sink.history(&p3.id).is_empty());
    assert!(report.failures.is_empty());
}
