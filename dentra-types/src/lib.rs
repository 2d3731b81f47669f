//! Core type definitions for the Dentra sync engine.
//!
//! Everything the engine layers share lives here: identity types
//! (provisional temp ids vs. server-assigned real ids), the [`Resource`]
//! model observed by the UI, the durable [`OutboxEntry`] record for
//! unconfirmed mutations, and the push-channel wire/canonical event types
//! with their normalization boundary.

mod ids;
mod outbox;
mod push;
mod resource;

pub use ids::{OutboxId, ResourceId, ResourceIdentity, TempId};
pub use outbox::{Operation, OutboxEntry};
pub use push::{normalize, PushDecodeError, PushEvent, PushOperation, RawPushMessage};
pub use resource::{Resource, ResourceState, ResourceType};
