//! Type-safe entity identifier.
//!
//! [`EntityId`] is a newtype wrapper around the upstream `publicId` string,
//! so entity identifiers cannot be confused with names or other strings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable upstream identifier of a tracked entity.
///
/// Assigned by the upstream API and unique within any snapshot. Used as the
/// key for deduplication during collection and for building per-entity
/// historical series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an `EntityId` from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
