//! Push-channel message types and wire normalization.
//!
//! The server push channel is duck-typed: the operation arrives as
//! `resource_created`, `invoice_created`, or bare `created`; the entity id
//! sits under `data.id` or `data.resourceId`; resource-type names come in
//! singular or plural. All of that variation is absorbed here, at the
//! channel-adapter boundary, so reconciliation only ever sees one
//! canonical tagged event type.

use crate::{ResourceId, ResourceType};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A raw push message exactly as it arrives from the server channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPushMessage {
    /// Operation name, possibly prefixed (e.g. `resource_created`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Resource-type name, singular or plural.
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    /// Entity payload; carries the id under `id` or `resourceId`.
    pub data: serde_json::Value,
}

impl RawPushMessage {
    /// Creates a raw message (mostly useful in tests).
    pub fn new(
        event_type: impl Into<String>,
        resource_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            resource_type: resource_type.into(),
            data,
        }
    }
}

/// The canonical operation carried by a push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOperation {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for PushOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

/// A normalized push event, safe to hand to reconciliation.
///
/// Invariant: `id` is always present — messages without a usable id never
/// make it past [`normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    /// The collection the event targets.
    pub resource_type: ResourceType,
    /// What happened on the server.
    pub op: PushOperation,
    /// Server-assigned id of the affected resource.
    pub id: ResourceId,
    /// Full entity payload as the server sent it.
    pub data: serde_json::Value,
}

/// Errors produced while normalizing a raw push message.
#[derive(Debug, Error)]
pub enum PushDecodeError {
    /// Neither `data.id` nor `data.resourceId` was a non-empty string.
    #[error("push message has no usable id")]
    MissingId,

    /// The resource-type name matched no known collection.
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    /// The event type encoded no known operation.
    #[error("unknown push operation: {0}")]
    UnknownOperation(String),

    /// The payload was not a JSON object.
    #[error("malformed push payload: {0}")]
    MalformedPayload(String),
}

/// Converts a duck-typed wire message into the canonical event type.
///
/// Operation matching is suffix-based so `resource_created`,
/// `invoices_created` and bare `created` all decode to [`PushOperation::Created`].
pub fn normalize(raw: &RawPushMessage) -> Result<PushEvent, PushDecodeError> {
    let resource_type = ResourceType::from_wire(&raw.resource_type)
        .ok_or_else(|| PushDecodeError::UnknownResourceType(raw.resource_type.clone()))?;

    let op = parse_operation(&raw.event_type)
        .ok_or_else(|| PushDecodeError::UnknownOperation(raw.event_type.clone()))?;

    if !raw.data.is_object() {
        return Err(PushDecodeError::MalformedPayload(format!(
            "expected object, got {}",
            json_kind(&raw.data)
        )));
    }

    let id = extract_id(&raw.data).ok_or(PushDecodeError::MissingId)?;

    Ok(PushEvent {
        resource_type,
        op,
        id,
        data: raw.data.clone(),
    })
}

fn parse_operation(event_type: &str) -> Option<PushOperation> {
    // Suffix match tolerates any prefix the server chooses.
    if event_type == "created" || event_type.ends_with("_created") {
        Some(PushOperation::Created)
    } else if event_type == "updated" || event_type.ends_with("_updated") {
        Some(PushOperation::Updated)
    } else if event_type == "deleted" || event_type.ends_with("_deleted") {
        Some(PushOperation::Deleted)
    } else {
        None
    }
}

fn extract_id(data: &serde_json::Value) -> Option<ResourceId> {
    for key in ["id", "resourceId"] {
        if let Some(s) = data.get(key).and_then(|v| v.as_str()) {
            if !s.is_empty() {
                return Some(ResourceId::new(s));
            }
        }
        // Some endpoints emit numeric ids.
        if let Some(n) = data.get(key).and_then(|v| v.as_i64()) {
            return Some(ResourceId::new(n.to_string()));
        }
    }
    None
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
