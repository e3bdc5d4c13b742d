//! Identifier types used on both sides of the reconciliation.
//!
//! Source entities are named by a `RefName` that is unique per hierarchy
//! level. Sink entities are identified by an opaque `SinkId` assigned by the
//! sink, usually of the form `p:{project}:r:{id}`.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of a source entity, unique among entities of the same kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

impl RefName {
    /// Parses a refName, rejecting empty names, surrounding whitespace and
    /// control characters.
    pub fn parse(s: &str) -> Result<Self, Error> {
        if s.is_empty() || s.trim() != s || s.chars().any(char::is_control) {
            return Err(Error::InvalidRefName(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RefName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RefName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for RefName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RefName> for String {
    fn from(value: RefName) -> Self {
        value.0
    }
}

/// Opaque identifier assigned to an entity by the sink.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SinkId(String);

impl SinkId {
    /// Parses a sink id. A leading `@` (Haystack ref syntax) is stripped.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let trimmed = s.strip_prefix('@').unwrap_or(s);
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(Error::InvalidSinkId(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the project segment of a `p:{project}:r:{id}` id.
    #[must_use]
    pub fn project(&self) -> Option<&str> {
        self.segments().map(|(project, _)| project)
    }

    /// Returns the local id segment of a `p:{project}:r:{id}` id, or the whole
    /// id when it is not in project form.
    #[must_use]
    pub fn local_id(&self) -> &str {
        self.segments().map_or(self.0.as_str(), |(_, id)| id)
    }

    fn segments(&self) -> Option<(&str, &str)> {
        let mut parts = self.0.splitn(4, ':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("p"), Some(project), Some("r"), Some(id)) if !project.is_empty() && !id.is_empty() => {
                Some((project, id))
            }
            _ => None,
        }
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SinkId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SinkId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SinkId> for String {
    fn from(value: SinkId) -> Self {
        value.0
    }
}
