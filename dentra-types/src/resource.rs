//! Resource model shared by every layer of the sync engine.
//!
//! A `Resource` is one server-owned entity (a patient, an invoice, …) as
//! the UI sees it. The engine never interprets the `data` payload — field
//! semantics belong to the per-resource business code, which is outside
//! this crate. The engine only tracks identity and confirmation state.

use crate::{ResourceId, ResourceIdentity, TempId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The resource collections the engine synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Patient,
    User,
    Role,
    Invoice,
    Client,
    ActivityLog,
}

impl ResourceType {
    /// All resource types, in a fixed order.
    pub const ALL: [ResourceType; 6] = [
        Self::Patient,
        Self::User,
        Self::Role,
        Self::Invoice,
        Self::Client,
        Self::ActivityLog,
    ];

    /// Canonical name: singular snake_case.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::User => "user",
            Self::Role => "role",
            Self::Invoice => "invoice",
            Self::Client => "client",
            Self::ActivityLog => "activity_log",
        }
    }

    /// Parses a resource-type name as it appears on the wire.
    ///
    /// The push channel is inconsistent about spelling: the same logical
    /// collection arrives as `invoice` or `invoices` depending on the
    /// server code path, and activity logs additionally show up in
    /// camelCase. All spellings map to the same variant.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "patient" | "patients" => Some(Self::Patient),
            "user" | "users" => Some(Self::User),
            "role" | "roles" => Some(Self::Role),
            "invoice" | "invoices" => Some(Self::Invoice),
            "client" | "clients" => Some(Self::Client),
            "activity_log" | "activity_logs" | "activityLog" | "activityLogs" => {
                Some(Self::ActivityLog)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(s).ok_or_else(|| format!("unknown resource type: {s}"))
    }
}

/// Confirmation state of a resource.
///
/// `Pending` and `Failed` are both optimistic — the row exists locally but
/// the server has not confirmed it. `Failed` is terminal until the user
/// retries or discards; it never silently flips back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Mutation in flight, awaiting server confirmation.
    Pending,
    /// Mutation rejected or timed out; kept for user-driven retry.
    Failed,
    /// Server-confirmed.
    Confirmed,
}

impl ResourceState {
    /// Whether the resource is still unconfirmed locally.
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

/// One server-owned entity as observed through the shared state.
///
/// The same shape is returned regardless of whether the data originated
/// from the network, the local cache, or push reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Current identity — temp before confirmation, real after.
    pub identity: ResourceIdentity,
    /// Which collection this resource belongs to.
    pub resource_type: ResourceType,
    /// Opaque entity payload; structure is defined by the business layer.
    pub data: serde_json::Value,
    /// Confirmation state.
    pub state: ResourceState,
    /// When this resource was first seen locally.
    pub created_at: DateTime<Utc>,
    /// When this resource last changed locally.
    pub modified_at: DateTime<Utc>,
}

impl Resource {
    /// Builds an optimistic resource around a fresh temp identity.
    #[must_use]
    pub fn optimistic(temp_id: TempId, resource_type: ResourceType, data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            identity: ResourceIdentity::Temp(temp_id),
            resource_type,
            data,
            state: ResourceState::Pending,
            created_at: now,
            modified_at: now,
        }
    }

    /// Builds a server-confirmed resource.
    #[must_use]
    pub fn confirmed(id: ResourceId, resource_type: ResourceType, data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            identity: ResourceIdentity::Real(id),
            resource_type,
            data,
            state: ResourceState::Confirmed,
            created_at: now,
            modified_at: now,
        }
    }

    /// Returns the temp ID, if the resource is still provisional.
    #[must_use]
    pub fn temp_id(&self) -> Option<TempId> {
        self.identity.temp_id()
    }

    /// Returns the server-assigned ID, if confirmed at least once.
    #[must_use]
    pub fn real_id(&self) -> Option<&ResourceId> {
        self.identity.real_id()
    }

    /// Whether the resource is an unconfirmed local row.
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        self.state.is_optimistic()
    }

    /// Extract a string value from `data` using a JSON pointer (e.g., "/client").
    pub fn get_str(&self, pointer: &str) -> Option<&str> {
        self.data.pointer(pointer).and_then(|v| v.as_str())
    }

    /// Extract a boolean value from `data` using a JSON pointer.
    pub fn get_bool(&self, pointer: &str) -> Option<bool> {
        self.data.pointer(pointer).and_then(|v| v.as_bool())
    }

    /// Extract a numeric value from `data` using a JSON pointer.
    pub fn get_number(&self, pointer: &str) -> Option<f64> {
        self.data.pointer(pointer).and_then(|v| v.as_f64())
    }
}
