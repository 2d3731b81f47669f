//! Outbox entries — durable records of not-yet-confirmed mutations.
//!
//! Every optimistic mutation appends exactly one entry here before the
//! remote call fires. Reconciliation (remote response or push event)
//! deletes the entry; the delete is idempotent, so replaying the same
//! confirmation twice cannot double-apply a change.

use crate::{OutboxId, ResourceType, TempId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The mutation kind an outbox entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Canonical name used in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

/// A pending optimistic mutation awaiting server confirmation.
///
/// Keyed by `temp_id` at creation time; once the server assigns a real id,
/// a correlation record maps that id back to the `temp_id` so push events
/// can find the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Unique identifier for this entry.
    pub id: OutboxId,
    /// The provisional identity of the mutated resource.
    pub temp_id: TempId,
    /// Which collection the mutation targets.
    pub resource_type: ResourceType,
    /// The mutation kind.
    pub operation: Operation,
    /// The payload sent (or to be re-sent on retry) to the server.
    pub payload: serde_json::Value,
    /// When the mutation was issued.
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Creates a new outbox entry.
    #[must_use]
    pub fn new(
        temp_id: TempId,
        resource_type: ResourceType,
        operation: Operation,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: OutboxId::new(),
            temp_id,
            resource_type,
            operation,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Creates a create-operation entry.
    #[must_use]
    pub fn create(temp_id: TempId, resource_type: ResourceType, payload: serde_json::Value) -> Self {
        Self::new(temp_id, resource_type, Operation::Create, payload)
    }

    /// Creates an update-operation entry.
    #[must_use]
    pub fn update(temp_id: TempId, resource_type: ResourceType, payload: serde_json::Value) -> Self {
        Self::new(temp_id, resource_type, Operation::Update, payload)
    }

    /// Creates a delete-operation entry.
    #[must_use]
    pub fn delete(temp_id: TempId, resource_type: ResourceType) -> Self {
        Self::new(temp_id, resource_type, Operation::Delete, serde_json::Value::Null)
    }
}
