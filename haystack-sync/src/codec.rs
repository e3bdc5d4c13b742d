//! Tag codec: converts between the source's raw tag collections and Haystack
//! tag sets.
//!
//! The source stores a list of marker names plus untyped key-value pairs. A
//! key-value entry whose value is null or an empty string is treated as a
//! marker. The identity tag (`haystackRef`) is extracted separately and never
//! becomes a desired tag, and structural names owned by the sink are dropped.

use crate::error::{SyncError, SyncResult};
use haystack_types::{
    validate_tag_name, EntityKey, EntityKind, RawTags, Scalar, SinkId, SourceEntity, TagSet,
    TagValue, HAYSTACK_REF_TAG,
};
use serde_json::Value;
use tracing::debug;

/// Tag names the sink maintains itself.
pub const STRUCTURAL_TAGS: [&str; 5] = ["id", "refName", "siteRef", "equipRef", "mod"];

/// Returns true for tag names the engine never writes or removes.
#[must_use]
pub fn is_structural(name: &str) -> bool {
    name == HAYSTACK_REF_TAG || STRUCTURAL_TAGS.contains(&name)
}

/// A source entity validated and encoded for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedEntity {
    pub source: SourceEntity,
    pub key: EntityKey,
    /// Tags the sink entity should carry.
    pub desired: TagSet,
    /// HaystackRef currently stored on the source, if any.
    pub stored_ref: Option<SinkId>,
}

/// Validates a source entity and computes its desired tag set.
pub fn prepare(source: SourceEntity) -> SyncResult<PreparedEntity> {
    source.validate_hierarchy()?;
    let key = source.key();
    let mut desired = normalize(&source.tags)?;

    for kind in EntityKind::ALL {
        if kind != source.kind && desired.contains(kind.marker()) {
            return Err(SyncError::Validation(format!(
                "{key} carries the {} tag reserved for {kind} entities",
                kind.marker()
            )));
        }
    }
    let marker = source.kind.marker();
    if let Some(TagValue::Scalar(_)) = desired.get(marker) {
        return Err(haystack_types::Error::TagTypeMismatch {
            name: marker.to_string(),
        }
        .into());
    }
    desired.insert_marker(marker);

    let meta = &source.metadata;
    let declared = [
        ("dis", &meta.dis),
        ("unit", &meta.unit),
        ("tz", &meta.tz),
        ("kind", &meta.value_kind),
    ];
    for (name, value) in declared {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            desired.insert_scalar(name, Scalar::Str(value.to_string()));
        }
    }

    let stored_ref = extract_ref(&source.tags)?;
    Ok(PreparedEntity {
        source,
        key,
        desired,
        stored_ref,
    })
}

/// Normalizes raw source tags into a tag set.
///
/// Fails on invalid names, on values that are not scalars, and on a name that
/// is both listed as a marker and carries a key-value.
pub fn normalize(raw: &RawTags) -> SyncResult<TagSet> {
    let mut tags = TagSet::new();

    for name in &raw.marker_tags {
        if is_structural(name) {
            debug!(tag = %name, "dropping structural marker");
            continue;
        }
        validate_tag_name(name)?;
        tags.insert_marker(name.as_str());
    }

    for (name, value) in &raw.kv_tags {
        if is_structural(name) {
            debug!(tag = %name, "dropping structural tag");
            continue;
        }
        validate_tag_name(name)?;
        let value = decode_value(name, value)?;
        if let Some(TagValue::Marker) = tags.get(name) {
            if !value.is_marker() {
                return Err(haystack_types::Error::TagTypeMismatch { name: name.clone() }.into());
            }
        }
        tags.insert(name.as_str(), value);
    }

    Ok(tags)
}

fn decode_value(name: &str, value: &Value) -> SyncResult<TagValue> {
    let decoded = match value {
        Value::Null => TagValue::Marker,
        Value::String(s) if s.is_empty() => TagValue::Marker,
        Value::String(s) => TagValue::Scalar(Scalar::Str(s.clone())),
        Value::Bool(b) => TagValue::Scalar(Scalar::Bool(*b)),
        Value::Number(n) => match n.as_f64() {
            Some(n) => TagValue::Scalar(Scalar::Number(n)),
            None => return Err(invalid_value(name, "number out of range")),
        },
        Value::Array(_) => return Err(invalid_value(name, "arrays are not supported")),
        Value::Object(_) => return Err(invalid_value(name, "objects are not supported")),
    };
    Ok(decoded)
}

fn invalid_value(name: &str, reason: &str) -> SyncError {
    haystack_types::Error::InvalidTagValue {
        name: name.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Reads the HaystackRef stored on the source. An empty value counts as
/// absent.
pub fn extract_ref(raw: &RawTags) -> SyncResult<Option<SinkId>> {
    match raw.kv_tags.get(HAYSTACK_REF_TAG) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(SinkId::parse(s.trim())?)),
        Some(_) => Err(invalid_value(HAYSTACK_REF_TAG, "expected a string")),
    }
}

/// Converts a tag set back into the source's representation.
#[must_use]
pub fn denormalize(tags: &TagSet) -> RawTags {
    let mut raw = RawTags::new();
    for (name, value) in tags {
        match value {
            TagValue::Marker => raw.marker_tags.push(name.clone()),
            TagValue::Scalar(scalar) => {
                raw.kv_tags.insert(name.clone(), scalar_to_json(scalar));
            }
        }
    }
    raw
}

/// JSON form of a scalar as the source stores it. Refs are plain id strings.
#[must_use]
pub fn scalar_to_json(value: &Scalar) -> Value {
    match value {
        Scalar::Str(s) => Value::String(s.clone()),
        Scalar::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::Ref(id) => Value::String(id.to_string()),
    }
}
