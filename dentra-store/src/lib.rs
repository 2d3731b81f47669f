//! Local persistent store for the Dentra sync engine.
//!
//! Provides the on-device SQLite cache that lets every screen keep working
//! through network loss: the last successfully loaded collection per
//! resource type, the outbox of not-yet-confirmed mutations, and the
//! tempId→realId correlations used to reconcile server confirmations.
//!
//! The store is never authoritative while the network is available — it is
//! read as a fallback and written through after successful remote calls.
//! Every operation returns a [`StoreResult`]; callers in the engine treat
//! failures as a signal to continue in degraded (no-cache) mode, not to
//! crash.

mod error;
mod local_store;

pub use error::{StoreError, StoreResult};
pub use local_store::LocalStore;
