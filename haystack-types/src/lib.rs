//! Core type definitions for the Haystack entity reconciler.
//!
//! This crate defines the plain data model shared by the engine and the
//! collaborators that talk to the two record systems:
//! - Identifiers: source `RefName`s and opaque sink `SinkId`s
//! - Tags: marker / key-value values and ordered `TagSet`s
//! - Entities: the source and sink views of sites, equipment and points
//! - History: timestamped samples and query ranges
//!
//! Nothing here performs I/O.

mod entity;
mod ids;
mod sample;
mod tag;

pub use entity::{
    EntityKey, EntityKind, EntityMetadata, HaystackRef, ParentRefs, RawTags, SinkEntity,
    SourceEntity,
};
pub use ids::{RefName, SinkId};
pub use sample::{Sample, SampleValue, TimeRange};
pub use tag::{validate_tag_name, Scalar, TagSet, TagValue};

/// Tag carrying the cross-system identity link on both record systems.
pub const HAYSTACK_REF_TAG: &str = "haystackRef";

/// Tag carrying an entity's source name on the sink side.
pub const REF_NAME_TAG: &str = "refName";

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid refName: {0:?}")]
    InvalidRefName(String),

    #[error("invalid sink id: {0:?}")]
    InvalidSinkId(String),

    #[error("invalid tag name: {0:?}")]
    InvalidTagName(String),

    #[error("tag {name} is both a marker and a key-value tag")]
    TagTypeMismatch { name: String },

    #[error("invalid value for tag {name}: {reason}")]
    InvalidTagValue { name: String, reason: String },

    #[error("invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
