//! Engine facade.
//!
//! Wires the repository, broadcaster, and push reconciler into one handle
//! the application owns. The engine is explicitly constructed and disposed;
//! nothing in this crate lives in module-level state, so tests and multiple
//! dashboard instances each get an isolated engine.

use crate::broadcaster::{Broadcaster, SliceStats, StateSnapshot, Subscription};
use crate::channel::PushChannel;
use crate::error::EngineResult;
use crate::reconciler::PushReconciler;
use crate::remote::{ListFilters, ResourceApi};
use crate::repository::{LoadOutcome, ResourceRepository};
use dentra_store::LocalStore;
use dentra_types::{Resource, ResourceId, ResourceType, TempId};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Display name of the practice this engine serves.
    pub clinic_name: String,
    /// Age in milliseconds after which a pending mutation is marked failed.
    pub pending_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            clinic_name: "Dentra Clinic".to_string(),
            pending_timeout_ms: 30_000,
        }
    }
}

/// The sync engine: one handle over all resource synchronization.
pub struct SyncEngine {
    config: EngineConfig,
    store: Arc<LocalStore>,
    broadcaster: Broadcaster,
    repository: Arc<ResourceRepository>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Wires an engine over the given store and remote API.
    /// Call [`start`](Self::start) to begin consuming push events.
    pub fn new(store: Arc<LocalStore>, remote: Arc<dyn ResourceApi>, config: EngineConfig) -> Self {
        let broadcaster = Broadcaster::new();
        let repository = Arc::new(ResourceRepository::new(
            store.clone(),
            remote,
            broadcaster.clone(),
        ));
        info!("sync engine initialized for {}", config.clinic_name);
        Self {
            config,
            store,
            broadcaster,
            repository,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawns the push reconciliation loop and the pending-expiry sweeper.
    pub fn start(&self, channel: impl PushChannel + 'static) {
        let reconciler = PushReconciler::new(self.store.clone(), self.broadcaster.clone());
        let push_task = tokio::spawn(async move {
            reconciler.run(channel).await;
        });

        let repository = self.repository.clone();
        let timeout_ms = self.config.pending_timeout_ms;
        let sweeper_task = tokio::spawn(async move {
            let max_age = chrono::Duration::milliseconds(timeout_ms as i64);
            let mut interval =
                tokio::time::interval(Duration::from_millis((timeout_ms / 2).max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                for resource_type in ResourceType::ALL {
                    repository.expire_pending(resource_type, max_age);
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(push_task);
        tasks.push(sweeper_task);
        info!("sync engine started");
    }

    /// Aborts the background tasks. Idempotent; safe before `start`.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("sync engine shut down");
    }

    // ── Delegated surface ────────────────────────────────────────

    /// Registers a subscriber for one resource type.
    pub fn subscribe<F>(&self, resource_type: ResourceType, callback: F) -> Subscription
    where
        F: Fn(StateSnapshot) + Send + Sync + 'static,
    {
        self.broadcaster.subscribe(resource_type, callback)
    }

    /// Current slice contents as an owned snapshot.
    pub fn snapshot(&self, resource_type: ResourceType) -> StateSnapshot {
        self.broadcaster.snapshot(resource_type)
    }

    /// Derived statistics for one slice.
    pub fn stats(&self, resource_type: ResourceType) -> SliceStats {
        self.repository.stats(resource_type)
    }

    /// Loads a collection, falling back to the cache when offline.
    pub async fn load_all(
        &self,
        resource_type: ResourceType,
        filters: &ListFilters,
    ) -> EngineResult<LoadOutcome> {
        self.repository.load_all(resource_type, filters).await
    }

    /// Creates a resource optimistically.
    pub async fn create(
        &self,
        resource_type: ResourceType,
        payload: serde_json::Value,
    ) -> EngineResult<Resource> {
        self.repository.create(resource_type, payload).await
    }

    /// Updates a resource optimistically.
    pub async fn update(
        &self,
        resource_type: ResourceType,
        id: &ResourceId,
        payload: serde_json::Value,
    ) -> EngineResult<Resource> {
        self.repository.update(resource_type, id, payload).await
    }

    /// Deletes a resource optimistically.
    pub async fn delete(&self, resource_type: ResourceType, id: &ResourceId) -> EngineResult<()> {
        self.repository.delete(resource_type, id).await
    }

    /// Re-issues a failed create.
    pub async fn retry(&self, resource_type: ResourceType, temp_id: &TempId) -> EngineResult<Resource> {
        self.repository.retry(resource_type, temp_id).await
    }

    /// Clears all in-memory slices, notifying subscribers. Used on logout.
    pub fn clear_all(&self) {
        self.broadcaster.clear_all();
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
