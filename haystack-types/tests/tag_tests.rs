use haystack_types::{validate_tag_name, Scalar, SinkId, TagSet, TagValue};
use proptest::prelude::*;

// ── Tag names ─────────────────────────────────────────────────────

#[test]
fn valid_tag_names() {
    for name in ["sensor", "temp", "fd_specific", "zone2", "siteRef"] {
        assert!(validate_tag_name(name).is_ok(), "{name} should be valid");
    }
}

#[test]
fn invalid_tag_names() {
    for name in ["", " ", "tag with spaces", "tag-with-special!@#", "2zone", "_hidden"] {
        assert!(validate_tag_name(name).is_err(), "{name:?} should be invalid");
    }
}

// ── TagSet ────────────────────────────────────────────────────────

#[test]
fn marker_and_scalar_share_one_namespace() {
    let mut tags = TagSet::new();
    tags.insert_marker("zone");
    let previous = tags.insert_scalar("zone", Scalar::Str("hvac".into()));
    assert_eq!(previous, Some(TagValue::Marker));
    assert_eq!(tags.len(), 1);
    assert!(!tags.has_marker("zone"));
    assert_eq!(tags.scalar("zone"), Some(&Scalar::Str("hvac".into())));
}

#[test]
fn markers_and_scalars_partition_the_set() {
    let tags = TagSet::new()
        .with_marker("sensor")
        .with_marker("temp")
        .with_scalar("floor", Scalar::Number(2.0));

    let markers: Vec<&String> = tags.markers().collect();
    assert_eq!(markers, vec!["sensor", "temp"]);

    let scalars: Vec<(&String, &Scalar)> = tags.scalars().collect();
    assert_eq!(scalars.len(), 1);
    assert_eq!(scalars[0].0, "floor");
}

#[test]
fn iteration_is_name_ordered() {
    let tags = TagSet::new()
        .with_marker("zeta")
        .with_marker("alpha")
        .with_marker("mid");
    let names: Vec<&String> = tags.names().collect();
    assert_eq!(names, vec!["alpha", "mid", "zeta"]);
}

#[test]
fn remove_returns_previous_value() {
    let mut tags = TagSet::new().with_marker("obsolete");
    assert_eq!(tags.remove("obsolete"), Some(TagValue::Marker));
    assert!(tags.is_empty());
    assert_eq!(tags.remove("obsolete"), None);
}

#[test]
fn ref_scalar_display_uses_at_prefix() {
    let id = SinkId::parse("p:demo:r:7").unwrap();
    assert_eq!(Scalar::Ref(id).to_string(), "@p:demo:r:7");
}

#[test]
fn scalar_serializes_with_kind_tag() {
    let json = serde_json::to_value(Scalar::Number(21.5)).unwrap();
    assert_eq!(json, serde_json::json!({"_kind": "number", "val": 21.5}));
}

#[test]
fn tag_set_json_roundtrip() {
    let tags = TagSet::new()
        .with_marker("point")
        .with_scalar("unit", Scalar::Str("°F".into()))
        .with_scalar("siteRef", Scalar::Ref(SinkId::parse("p:demo:r:1").unwrap()));
    let json = serde_json::to_string(&tags).unwrap();
    let parsed: TagSet = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, tags);
}

proptest! {
    #[test]
    fn generated_identifier_names_are_valid(name in "[a-zA-Z][a-zA-Z0-9_]{0,30}") {
        prop_assert!(validate_tag_name(&name).is_ok());
    }

    #[test]
    fn names_with_punctuation_are_rejected(
        prefix in "[a-z]{1,5}",
        bad in "[-!@# .:/]",
        suffix in "[a-z]{0,5}",
    ) {
        let name = format!("{prefix}{bad}{suffix}");
        prop_assert!(validate_tag_name(&name).is_err());
    }
}
