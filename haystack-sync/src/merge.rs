//! Tag merge engine.
//!
//! Computes the minimal change that brings a sink entity's tags in line with
//! the source. The source wins every conflict on names it declares. Tags that
//! only exist on the sink are kept unless they fall inside the managed
//! namespace, in which case the source's silence means removal.

use crate::codec::is_structural;
use crate::error::SyncResult;
use haystack_types::TagSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::trace;

/// Tag names the source owns outright on the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedNamespace {
    names: BTreeSet<String>,
    prefixes: Vec<String>,
}

impl ManagedNamespace {
    pub fn new<N, P>(names: N, prefixes: P) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// A namespace managing nothing: sink-only tags are always preserved.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::<String>::new(), Vec::<String>::new())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name) || self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}

impl Default for ManagedNamespace {
    fn default() -> Self {
        Self::new(["dis", "unit", "tz", "kind"], Vec::<String>::new())
    }
}

/// Tag changes to apply to one sink entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagDelta {
    pub to_add: TagSet,
    pub to_update: TagSet,
    pub to_remove: BTreeSet<String>,
}

impl TagDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }

    /// Number of individual tag changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_update.len() + self.to_remove.len()
    }

    /// Applies the delta to a tag set in place.
    pub fn apply(&self, tags: &mut TagSet) {
        for (name, value) in self.to_add.iter().chain(self.to_update.iter()) {
            tags.insert(name.as_str(), value.clone());
        }
        for name in &self.to_remove {
            tags.remove(name);
        }
    }
}

/// Computes tag deltas under the source-wins policy.
#[derive(Debug, Clone, Default)]
pub struct TagMergeEngine {
    managed: ManagedNamespace,
}

impl TagMergeEngine {
    #[must_use]
    pub fn new(managed: ManagedNamespace) -> Self {
        Self { managed }
    }

    #[must_use]
    pub fn managed(&self) -> &ManagedNamespace {
        &self.managed
    }

    /// Computes the delta from `existing` (sink) to `desired` (source).
    ///
    /// Unchanged values produce no entry, so merging a tag set with itself
    /// yields an empty delta. A name that is a marker on one side and a
    /// key-value tag on the other is rejected.
    pub fn merge(&self, existing: &TagSet, desired: &TagSet) -> SyncResult<TagDelta> {
        let mut delta = TagDelta::default();

        for (name, want) in desired {
            if is_structural(name) {
                continue;
            }
            match existing.get(name) {
                None => {
                    delta.to_add.insert(name.as_str(), want.clone());
                }
                Some(have) if have == want => {}
                Some(have) if have.is_marker() != want.is_marker() => {
                    return Err(haystack_types::Error::TagTypeMismatch { name: name.clone() }.into());
                }
                Some(_) => {
                    delta.to_update.insert(name.as_str(), want.clone());
                }
            }
        }

        for name in existing.names() {
            if desired.contains(name) || is_structural(name) {
                continue;
            }
            if self.managed.contains(name) {
                delta.to_remove.insert(name.clone());
            } else {
                trace!(tag = %name, "preserving sink-only tag");
            }
        }

        Ok(delta)
    }
}

