//! Offline-first resource synchronization engine.
//!
//! Keeps a dashboard responsive and consistent across an unreliable
//! network: mutations apply to shared in-memory state immediately, a
//! durable outbox survives restarts, server push events reconcile against
//! local optimism through an explicit tempId-to-realId correlation table,
//! and reads fall back to a SQLite snapshot cache when the network is down.
//!
//! Entry point is [`SyncEngine`]; the pieces underneath
//! ([`Broadcaster`], [`ResourceRepository`], [`PushReconciler`]) are public
//! for applications that need finer-grained wiring.

pub mod broadcaster;
pub mod channel;
pub mod engine;
pub mod error;
pub mod reconciler;
pub mod remote;
pub mod repository;

pub use broadcaster::{Broadcaster, SliceStats, SnapshotOrigin, StateSnapshot, Subscription};
pub use channel::PushChannel;
pub use engine::{EngineConfig, SyncEngine};
pub use error::{EngineError, EngineResult};
pub use reconciler::PushReconciler;
pub use remote::{ListFilters, RemoteRecord, ResourceApi};
pub use repository::{LoadOutcome, ResourceRepository};
