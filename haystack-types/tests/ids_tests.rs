use haystack_types::{Error, RefName, SinkId};
use std::collections::HashSet;
use std::str::FromStr;

// ── RefName ───────────────────────────────────────────────────────

#[test]
fn ref_name_parse_valid() {
    let name = RefName::parse("building-a").unwrap();
    assert_eq!(name.as_str(), "building-a");
    assert_eq!(name.to_string(), "building-a");
}

#[test]
fn ref_name_allows_inner_spaces() {
    let name = RefName::parse("AHU 1 Supply Temp").unwrap();
    assert_eq!(name.as_str(), "AHU 1 Supply Temp");
}

#[test]
fn ref_name_rejects_empty() {
    assert!(matches!(RefName::parse(""), Err(Error::InvalidRefName(_))));
}

#[test]
fn ref_name_rejects_surrounding_whitespace() {
    assert!(RefName::parse(" ahu-1").is_err());
    assert!(RefName::parse("ahu-1 ").is_err());
    assert!(RefName::parse("   ").is_err());
}

#[test]
fn ref_name_rejects_control_characters() {
    assert!(RefName::parse("ahu\n1").is_err());
    assert!(RefName::parse("ahu\t1").is_err());
}

#[test]
fn ref_name_from_str_and_try_from() {
    let a = RefName::from_str("rtu-1").unwrap();
    let b = RefName::try_from("rtu-1").unwrap();
    let c = RefName::try_from("rtu-1".to_string()).unwrap();
    assert_eq!(a, b);
    assert_eq!(b, c);
}

#[test]
fn ref_name_ordering_is_lexical() {
    let mut names: Vec<RefName> = ["b", "a", "c"]
        .iter()
        .map(|s| RefName::parse(s).unwrap())
        .collect();
    names.sort();
    let sorted: Vec<&str> = names.iter().map(RefName::as_str).collect();
    assert_eq!(sorted, vec!["a", "b", "c"]);
}

#[test]
fn ref_name_serde_is_transparent() {
    let name = RefName::parse("ahu-1").unwrap();
    let json = serde_json::to_string(&name).unwrap();
    assert_eq!(json, "\"ahu-1\"");
    let parsed: RefName = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, name);
}

#[test]
fn ref_name_deserialize_rejects_invalid() {
    assert!(serde_json::from_str::<RefName>("\"\"").is_err());
}

// ── SinkId ────────────────────────────────────────────────────────

#[test]
fn sink_id_parse_project_form() {
    let id = SinkId::parse("p:aceTest:r:point-123").unwrap();
    assert_eq!(id.as_str(), "p:aceTest:r:point-123");
    assert_eq!(id.project(), Some("aceTest"));
    assert_eq!(id.local_id(), "point-123");
}

#[test]
fn sink_id_strips_ref_prefix() {
    let id = SinkId::parse("@p:aceTest:r:site-1").unwrap();
    assert_eq!(id.as_str(), "p:aceTest:r:site-1");
    assert_eq!(id.to_string(), "p:aceTest:r:site-1");
}

#[test]
fn sink_id_plain_form_has_no_project() {
    let id = SinkId::parse("2b3c4d5e-abc").unwrap();
    assert_eq!(id.project(), None);
    assert_eq!(id.local_id(), "2b3c4d5e-abc");
}

#[test]
fn sink_id_local_id_keeps_colons_in_tail() {
    let id = SinkId::parse("p:demo:r:a:b").unwrap();
    assert_eq!(id.project(), Some("demo"));
    assert_eq!(id.local_id(), "a:b");
}

#[test]
fn sink_id_rejects_empty_and_whitespace() {
    assert!(matches!(SinkId::parse(""), Err(Error::InvalidSinkId(_))));
    assert!(SinkId::parse("@").is_err());
    assert!(SinkId::parse("p:demo:r:a b").is_err());
}

#[test]
fn sink_id_hash_and_eq() {
    let a = SinkId::parse("p:demo:r:1").unwrap();
    let b = SinkId::parse("@p:demo:r:1").unwrap();
    let mut set = HashSet::new();
    set.insert(a);
    set.insert(b);
    assert_eq!(set.len(), 1);
}

#[test]
fn sink_id_serialization_roundtrip() {
    let id = SinkId::parse("p:demo:r:42").unwrap();
    let json = serde_json::to_string(&id).unwrap();
    let parsed: SinkId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, parsed);
}
