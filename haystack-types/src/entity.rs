//! Source and sink views of the site / equipment / point hierarchy.

use crate::{Error, RefName, SinkId, TagSet, REF_NAME_TAG};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Level of an entity in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Site,
    Equipment,
    Point,
}

impl EntityKind {
    /// All kinds, parents before children.
    pub const ALL: [EntityKind; 3] = [EntityKind::Site, EntityKind::Equipment, EntityKind::Point];

    /// The marker tag identifying this kind in Haystack.
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            EntityKind::Site => "site",
            EntityKind::Equipment => "equip",
            EntityKind::Point => "point",
        }
    }

    /// The kind of this kind's immediate parent.
    #[must_use]
    pub const fn parent(self) -> Option<EntityKind> {
        match self {
            EntityKind::Site => None,
            EntityKind::Equipment => Some(EntityKind::Site),
            EntityKind::Point => Some(EntityKind::Equipment),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Site => "site",
            EntityKind::Equipment => "equipment",
            EntityKind::Point => "point",
        })
    }
}

/// Logical identity of a source entity: refNames are unique per kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub ref_name: RefName,
}

impl EntityKey {
    #[must_use]
    pub fn new(kind: EntityKind, ref_name: RefName) -> Self {
        Self { kind, ref_name }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.ref_name)
    }
}

/// Tags as the source stores them: a marker list plus key-value pairs whose
/// values are untyped JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTags {
    #[serde(default)]
    pub marker_tags: Vec<String>,
    #[serde(default)]
    pub kv_tags: BTreeMap<String, serde_json::Value>,
}

impl RawTags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored value of a key-value tag as a string, if it is one.
    pub fn kv_str(&self, name: &str) -> Option<&str> {
        self.kv_tags.get(name).and_then(serde_json::Value::as_str)
    }
}

/// Metadata a source entity declares outside its tag collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Display name.
    #[serde(default)]
    pub dis: Option<String>,
    /// Engineering unit (points).
    #[serde(default)]
    pub unit: Option<String>,
    /// Timezone name.
    #[serde(default)]
    pub tz: Option<String>,
    /// Haystack value kind, e.g. `Number` or `Bool` (points).
    #[serde(default)]
    pub value_kind: Option<String>,
    /// Whether the source collects history for this point.
    #[serde(default = "default_collect")]
    pub collect_enabled: bool,
}

fn default_collect() -> bool {
    true
}

impl Default for EntityMetadata {
    fn default() -> Self {
        Self {
            dis: None,
            unit: None,
            tz: None,
            value_kind: None,
            collect_enabled: true,
        }
    }
}

/// An entity as supplied by the source system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntity {
    pub ref_name: RefName,
    pub kind: EntityKind,
    /// Owning site (equipment and points).
    #[serde(default)]
    pub site: Option<RefName>,
    /// Owning equipment (points).
    #[serde(default)]
    pub equip: Option<RefName>,
    #[serde(default)]
    pub tags: RawTags,
    #[serde(default)]
    pub metadata: EntityMetadata,
}

impl SourceEntity {
    /// A site.
    #[must_use]
    pub fn site(ref_name: RefName) -> Self {
        Self::bare(ref_name, EntityKind::Site, None, None)
    }

    /// An equipment under `site`.
    #[must_use]
    pub fn equipment(ref_name: RefName, site: RefName) -> Self {
        Self::bare(ref_name, EntityKind::Equipment, Some(site), None)
    }

    /// A point under `equip`, itself under `site`.
    #[must_use]
    pub fn point(ref_name: RefName, site: RefName, equip: RefName) -> Self {
        Self::bare(ref_name, EntityKind::Point, Some(site), Some(equip))
    }

    fn bare(
        ref_name: RefName,
        kind: EntityKind,
        site: Option<RefName>,
        equip: Option<RefName>,
    ) -> Self {
        Self {
            ref_name,
            kind,
            site,
            equip,
            tags: RawTags::default(),
            metadata: EntityMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_marker(mut self, name: impl Into<String>) -> Self {
        self.tags.marker_tags.push(name.into());
        self
    }

    #[must_use]
    pub fn with_kv(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.tags.kv_tags.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_dis(mut self, dis: impl Into<String>) -> Self {
        self.metadata.dis = Some(dis.into());
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.metadata.unit = Some(unit.into());
        self
    }

    #[must_use]
    pub fn with_tz(mut self, tz: impl Into<String>) -> Self {
        self.metadata.tz = Some(tz.into());
        self
    }

    #[must_use]
    pub fn with_collect(mut self, enabled: bool) -> Self {
        self.metadata.collect_enabled = enabled;
        self
    }

    /// Stores a HaystackRef the way the source does: as a key-value tag.
    #[must_use]
    pub fn with_haystack_ref(self, id: &SinkId) -> Self {
        self.with_kv(crate::HAYSTACK_REF_TAG, serde_json::Value::String(id.to_string()))
    }

    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind, self.ref_name.clone())
    }

    /// The immediate parent's refName.
    #[must_use]
    pub fn parent(&self) -> Option<&RefName> {
        match self.kind {
            EntityKind::Site => None,
            EntityKind::Equipment => self.site.as_ref(),
            EntityKind::Point => self.equip.as_ref(),
        }
    }

    /// Checks that the declared ancestry matches the entity kind.
    pub fn validate_hierarchy(&self) -> Result<(), Error> {
        let ok = match self.kind {
            EntityKind::Site => self.site.is_none() && self.equip.is_none(),
            EntityKind::Equipment => self.site.is_some() && self.equip.is_none(),
            EntityKind::Point => self.site.is_some() && self.equip.is_some(),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidHierarchy(format!(
                "{} has site={:?} equip={:?}",
                self.key(),
                self.site.as_ref().map(RefName::as_str),
                self.equip.as_ref().map(RefName::as_str),
            )))
        }
    }
}

/// Sink references to an entity's ancestors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRefs {
    pub site: Option<SinkId>,
    pub equip: Option<SinkId>,
}

impl ParentRefs {
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }
}

/// An entity as held by the sink system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkEntity {
    pub id: SinkId,
    pub kind: EntityKind,
    #[serde(default)]
    pub site_ref: Option<SinkId>,
    #[serde(default)]
    pub equip_ref: Option<SinkId>,
    #[serde(default)]
    pub tags: TagSet,
}

impl SinkEntity {
    /// The reference that scopes this entity among its siblings.
    #[must_use]
    pub fn parent_ref(&self) -> Option<&SinkId> {
        match self.kind {
            EntityKind::Site => None,
            EntityKind::Equipment => self.site_ref.as_ref(),
            EntityKind::Point => self.equip_ref.as_ref(),
        }
    }

    /// The source name recorded on the sink entity.
    #[must_use]
    pub fn ref_name(&self) -> Option<&str> {
        match self.tags.scalar(REF_NAME_TAG) {
            Some(crate::Scalar::Str(name)) => Some(name),
            _ => None,
        }
    }
}

/// Persisted link from a source identity to the sink entity it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HaystackRef {
    pub key: EntityKey,
    pub sink_id: SinkId,
}

impl HaystackRef {
    #[must_use]
    pub fn new(key: EntityKey, sink_id: SinkId) -> Self {
        Self { key, sink_id }
    }
}

impl fmt::Display for HaystackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> @{}", self.key, self.sink_id)
    }
}
