//! Tag values and tag sets.
//!
//! A tag is either a marker (presence only) or a key-value tag carrying a
//! scalar. Marker and key-value tags share one namespace: a `TagSet` holds at
//! most one value per name.

use crate::{Error, SinkId};
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// Validates a tag name: ASCII letters, digits and underscores, starting with
/// a letter.
pub fn validate_tag_name(name: &str) -> Result<(), Error> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidTagName(name.to_string()))
    }
}

/// Scalar payload of a key-value tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_kind", content = "val", rename_all = "lowercase")]
pub enum Scalar {
    Str(String),
    Number(f64),
    Bool(bool),
    Ref(SinkId),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Str(s) => write!(f, "{s:?}"),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Ref(id) => write!(f, "@{id}"),
        }
    }
}

/// Value of a single tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagValue {
    /// Presence-only tag.
    Marker,
    /// Key-value tag.
    Scalar(Scalar),
}

impl TagValue {
    /// Returns true for marker tags.
    #[must_use]
    pub fn is_marker(&self) -> bool {
        matches!(self, TagValue::Marker)
    }

    /// Returns the scalar of a key-value tag.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            TagValue::Marker => None,
            TagValue::Scalar(s) => Some(s),
        }
    }

    /// Convenience constructor for a string tag.
    pub fn str(value: impl Into<String>) -> Self {
        TagValue::Scalar(Scalar::Str(value.into()))
    }

    /// Convenience constructor for a ref tag.
    #[must_use]
    pub fn reference(id: SinkId) -> Self {
        TagValue::Scalar(Scalar::Ref(id))
    }
}

impl From<Scalar> for TagValue {
    fn from(value: Scalar) -> Self {
        TagValue::Scalar(value)
    }
}

/// Ordered mapping from tag name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, TagValue>);

impl TagSet {
    /// Creates an empty tag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tag, returning the previous value for that name.
    pub fn insert(&mut self, name: impl Into<String>, value: TagValue) -> Option<TagValue> {
        self.0.insert(name.into(), value)
    }

    /// Inserts a marker tag.
    pub fn insert_marker(&mut self, name: impl Into<String>) -> Option<TagValue> {
        self.insert(name, TagValue::Marker)
    }

    /// Inserts a key-value tag.
    pub fn insert_scalar(&mut self, name: impl Into<String>, value: Scalar) -> Option<TagValue> {
        self.insert(name, TagValue::Scalar(value))
    }

    /// Builder-style marker insertion.
    #[must_use]
    pub fn with_marker(mut self, name: impl Into<String>) -> Self {
        self.insert_marker(name);
        self
    }

    /// Builder-style key-value insertion.
    #[must_use]
    pub fn with_scalar(mut self, name: impl Into<String>, value: Scalar) -> Self {
        self.insert_scalar(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&TagValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<TagValue> {
        self.0.remove(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TagValue)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Names of all marker tags.
    pub fn markers(&self) -> impl Iterator<Item = &String> {
        self.0
            .iter()
            .filter(|(_, v)| v.is_marker())
            .map(|(k, _)| k)
    }

    /// All key-value tags.
    pub fn scalars(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.0
            .iter()
            .filter_map(|(k, v)| v.as_scalar().map(|s| (k, s)))
    }

    /// Returns true if the marker tag is present.
    pub fn has_marker(&self, name: &str) -> bool {
        self.get(name).is_some_and(TagValue::is_marker)
    }

    /// Returns the scalar of a key-value tag.
    pub fn scalar(&self, name: &str) -> Option<&Scalar> {
        self.get(name).and_then(TagValue::as_scalar)
    }
}

impl FromIterator<(String, TagValue)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (String, TagValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for TagSet {
    type Item = (String, TagValue);
    type IntoIter = btree_map::IntoIter<String, TagValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = (&'a String, &'a TagValue);
    type IntoIter = btree_map::Iter<'a, String, TagValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
