//! Error types for the sync engine.

use dentra_types::{Operation, ResourceType};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in engine operations.
///
/// Nothing here is process-fatal: write failures surface to the caller
/// with the optimistic entry retained for retry, and read failures fall
/// back to the local cache before `Unavailable` is ever produced.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Remote API call rejected or unreachable.
    #[error("remote error: {0}")]
    Remote(String),

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] dentra_store::StoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote call failed and the local cache has nothing to show.
    #[error("no remote or cached data available for {0}")]
    Unavailable(ResourceType),

    /// A referenced resource or mutation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Only failed creates carry enough state to be re-issued.
    #[error("retry not supported for {0} mutations")]
    RetryUnsupported(Operation),
}
