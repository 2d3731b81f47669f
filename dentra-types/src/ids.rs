//! Identifier types used throughout the Dentra core.
//!
//! Client-generated identifiers use UUID v7 for time-ordered, globally
//! unique values. Server-assigned identifiers are opaque strings — the
//! practice-management API hands out ids like `inv-42` that are not UUIDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Client-generated provisional identity for a resource that has not yet
/// been confirmed by the server.
/// Uses UUID v7 which embeds a timestamp for natural ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(Uuid);

impl TempId {
    /// Creates a new temp ID with the current timestamp.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a temp ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses a temp ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TempId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(Uuid);

impl OutboxId {
    /// Creates a new outbox ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates an outbox ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parses an outbox ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for OutboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OutboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OutboxId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Server-assigned authoritative identity for a resource.
///
/// Opaque — the server decides the format, so no structure is assumed
/// beyond non-emptiness at the wire boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Creates a resource ID from a server-provided string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The current identity of a resource: provisional until the server
/// confirms, authoritative afterwards. A resource holds exactly one of
/// these at any instant — never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResourceIdentity {
    /// Client-generated, pre-confirmation.
    Temp(TempId),
    /// Server-assigned, authoritative.
    Real(ResourceId),
}

impl ResourceIdentity {
    /// Returns the temp ID if this identity is provisional.
    #[must_use]
    pub fn temp_id(&self) -> Option<TempId> {
        match self {
            Self::Temp(t) => Some(*t),
            Self::Real(_) => None,
        }
    }

    /// Returns the real ID if this identity is server-assigned.
    #[must_use]
    pub fn real_id(&self) -> Option<&ResourceId> {
        match self {
            Self::Temp(_) => None,
            Self::Real(r) => Some(r),
        }
    }

    /// A stable string key for storage partitioning.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::Temp(t) => format!("temp:{t}"),
            Self::Real(r) => format!("real:{r}"),
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temp(t) => write!(f, "{t}"),
            Self::Real(r) => write!(f, "{r}"),
        }
    }
}
