//! Resource repository — turns UI-level intents into converged state.
//!
//! Every mutation is applied optimistically to the shared slice before the
//! remote round-trip, recorded in the outbox, and converged once the
//! server answers. The repository and the push reconciler may both learn
//! of the same confirmation; both paths converge through the slice and the
//! correlation table, so the two never double-apply a change.
//!
//! Failure policy (uniform across all resource types): a rejected create
//! or update is non-silent — the error is returned to the caller and the
//! optimistic entry stays in the slice in the `Failed` state until the
//! user retries or discards it.

use crate::broadcaster::{Broadcaster, SliceStats, SnapshotOrigin, StateSnapshot};
use crate::error::{EngineError, EngineResult};
use crate::remote::{ListFilters, RemoteRecord, ResourceApi};
use chrono::Utc;
use dentra_store::LocalStore;
use dentra_types::{
    Operation, OutboxEntry, Resource, ResourceId, ResourceState, ResourceType, TempId,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The result of a load, with its degraded-mode flag.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    /// The slice contents after the load.
    pub resources: Vec<Resource>,
    /// True when the remote call failed and the cache served instead.
    pub from_cache: bool,
}

/// Per-resource-type CRUD orchestrator.
pub struct ResourceRepository {
    store: Arc<LocalStore>,
    remote: Arc<dyn ResourceApi>,
    broadcaster: Broadcaster,
}

impl ResourceRepository {
    /// Creates a repository over the given collaborators.
    pub fn new(store: Arc<LocalStore>, remote: Arc<dyn ResourceApi>, broadcaster: Broadcaster) -> Self {
        Self {
            store,
            remote,
            broadcaster,
        }
    }

    /// The broadcaster all consumers should observe.
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    // ── Mutations ────────────────────────────────────────────────

    /// Creates a resource optimistically, then confirms it remotely.
    ///
    /// The optimistic entry is visible to every subscriber before the
    /// remote call is dispatched.
    pub async fn create(
        &self,
        resource_type: ResourceType,
        payload: serde_json::Value,
    ) -> EngineResult<Resource> {
        let temp_id = TempId::new();
        let optimistic = Resource::optimistic(temp_id, resource_type, payload.clone());
        self.broadcaster
            .mutate(resource_type, SnapshotOrigin::Local, |slice| {
                slice.insert(0, optimistic);
            });

        let entry = OutboxEntry::create(temp_id, resource_type, payload.clone());
        if let Err(e) = self.store.outbox_append(&entry) {
            warn!("outbox append failed for {}, continuing without durability: {}", temp_id, e);
        }

        match self.remote.create(resource_type, &payload).await {
            Ok(record) => Ok(self.confirm_create(resource_type, temp_id, &entry, record)),
            Err(e) => {
                warn!("remote create failed for {} {}: {}", resource_type, temp_id, e);
                self.mark_failed_by_temp_id(resource_type, temp_id);
                Err(e)
            }
        }
    }

    /// Updates a resource optimistically in place, then confirms remotely.
    pub async fn update(
        &self,
        resource_type: ResourceType,
        id: &ResourceId,
        payload: serde_json::Value,
    ) -> EngineResult<Resource> {
        let payload_for_slice = payload.clone();
        let target = id.clone();
        self.broadcaster
            .mutate(resource_type, SnapshotOrigin::Local, |slice| {
                if let Some(resource) = slice.iter_mut().find(|r| r.real_id() == Some(&target)) {
                    resource.data = payload_for_slice;
                    resource.state = ResourceState::Pending;
                    resource.modified_at = Utc::now();
                }
            });

        // The real id is already known, so the correlation can be recorded
        // together with the outbox entry instead of waiting for the server.
        let entry = OutboxEntry::update(TempId::new(), resource_type, payload.clone());
        if let Err(e) = self.store.outbox_append(&entry) {
            warn!("outbox append failed for {} {}: {}", resource_type, id, e);
        } else if let Err(e) = self.store.record_correlation(&entry.temp_id, id, resource_type) {
            warn!("correlation record failed for {} {}: {}", resource_type, id, e);
        }

        match self.remote.update(resource_type, id, &payload).await {
            Ok(record) => {
                let confirmed =
                    Resource::confirmed(record.id, resource_type, record.data);
                let for_slice = confirmed.clone();
                let target = id.clone();
                self.broadcaster
                    .mutate(resource_type, SnapshotOrigin::Remote, |slice| {
                        match slice.iter().position(|r| r.real_id() == Some(&target)) {
                            Some(pos) => slice[pos] = for_slice,
                            None => slice.push(for_slice),
                        }
                    });
                self.clear_outbox(&entry, Some(id), resource_type);
                if let Err(e) = self.store.put(resource_type, &confirmed) {
                    warn!("cache write failed for {} {}: {}", resource_type, id, e);
                }
                Ok(confirmed)
            }
            Err(e) => {
                warn!("remote update failed for {} {}: {}", resource_type, id, e);
                self.mark_failed_by_real_id(resource_type, id);
                Err(e)
            }
        }
    }

    /// Deletes a resource optimistically, then confirms remotely.
    ///
    /// If the remote delete fails the row is *not* reinserted — the caller
    /// is responsible for reloading if it needs the row back. The outbox
    /// entry is kept so the unsynced delete is still visible after restart.
    pub async fn delete(&self, resource_type: ResourceType, id: &ResourceId) -> EngineResult<()> {
        let target = id.clone();
        self.broadcaster
            .mutate(resource_type, SnapshotOrigin::Local, |slice| {
                slice.retain(|r| r.real_id() != Some(&target));
            });

        let entry = OutboxEntry::delete(TempId::new(), resource_type);
        if let Err(e) = self.store.outbox_append(&entry) {
            warn!("outbox append failed for {} {}: {}", resource_type, id, e);
        } else if let Err(e) = self.store.record_correlation(&entry.temp_id, id, resource_type) {
            warn!("correlation record failed for {} {}: {}", resource_type, id, e);
        }

        match self.remote.delete(resource_type, id).await {
            Ok(()) => {
                self.clear_outbox(&entry, Some(id), resource_type);
                if let Err(e) = self.store.remove(resource_type, id) {
                    warn!("cache remove failed for {} {}: {}", resource_type, id, e);
                }
                Ok(())
            }
            Err(e) => {
                warn!("remote delete failed for {} {}: {}", resource_type, id, e);
                Err(e)
            }
        }
    }

    /// Re-issues a failed optimistic create.
    pub async fn retry(&self, resource_type: ResourceType, temp_id: &TempId) -> EngineResult<Resource> {
        let entry = self
            .store
            .outbox_find_by_temp_id(temp_id)?
            .ok_or_else(|| EngineError::NotFound(format!("no pending mutation for {temp_id}")))?;

        if entry.operation != Operation::Create {
            return Err(EngineError::RetryUnsupported(entry.operation));
        }

        let target = *temp_id;
        self.broadcaster
            .mutate(resource_type, SnapshotOrigin::Local, |slice| {
                if let Some(resource) = slice.iter_mut().find(|r| r.temp_id() == Some(target)) {
                    resource.state = ResourceState::Pending;
                    resource.modified_at = Utc::now();
                }
            });

        match self.remote.create(resource_type, &entry.payload).await {
            Ok(record) => Ok(self.confirm_create(resource_type, *temp_id, &entry, record)),
            Err(e) => {
                warn!("retry failed for {} {}: {}", resource_type, temp_id, e);
                self.mark_failed_by_temp_id(resource_type, *temp_id);
                Err(e)
            }
        }
    }

    // ── Loads ────────────────────────────────────────────────────

    /// Loads a collection from the remote API, falling back to the local
    /// cache when the network is unavailable. Optimistic entries already
    /// in the slice stay at the front in both paths.
    pub async fn load_all(
        &self,
        resource_type: ResourceType,
        filters: &ListFilters,
    ) -> EngineResult<LoadOutcome> {
        match self.remote.list(resource_type, filters).await {
            Ok(records) => {
                let confirmed: Vec<Resource> = records
                    .into_iter()
                    .map(|r| Resource::confirmed(r.id, resource_type, r.data))
                    .collect();

                if let Err(e) = self.store.put_all(resource_type, &confirmed) {
                    warn!("cache snapshot write failed for {}: {}", resource_type, e);
                }

                let snapshot = self.merge_confirmed(resource_type, SnapshotOrigin::Remote, confirmed);
                info!("loaded {} {} from remote", snapshot.stats.total, resource_type);
                Ok(LoadOutcome {
                    resources: snapshot.resources,
                    from_cache: false,
                })
            }
            Err(e) => {
                warn!("remote list failed for {}, trying cache: {}", resource_type, e);
                let cached = match self.store.get_all(resource_type) {
                    Ok(cached) => cached,
                    Err(store_err) => {
                        warn!("cache read failed for {}: {}", resource_type, store_err);
                        Vec::new()
                    }
                };

                if cached.is_empty() {
                    return Err(EngineError::Unavailable(resource_type));
                }

                let snapshot = self.merge_confirmed(resource_type, SnapshotOrigin::Cache, cached);
                info!(
                    "serving {} {} from cache (degraded)",
                    snapshot.stats.total, resource_type
                );
                Ok(LoadOutcome {
                    resources: snapshot.resources,
                    from_cache: true,
                })
            }
        }
    }

    /// Derived statistics for a slice.
    pub fn stats(&self, resource_type: ResourceType) -> SliceStats {
        self.broadcaster.stats(resource_type)
    }

    /// Marks `Pending` entries older than `max_age` as `Failed`.
    /// Returns how many entries expired.
    pub fn expire_pending(&self, resource_type: ResourceType, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let stale = self
            .broadcaster
            .snapshot(resource_type)
            .resources
            .iter()
            .any(|r| r.state == ResourceState::Pending && r.modified_at < cutoff);
        if !stale {
            return 0;
        }

        let mut expired = 0;
        self.broadcaster
            .mutate(resource_type, SnapshotOrigin::Local, |slice| {
                for resource in slice.iter_mut() {
                    if resource.state == ResourceState::Pending && resource.modified_at < cutoff {
                        resource.state = ResourceState::Failed;
                        resource.modified_at = Utc::now();
                        expired += 1;
                    }
                }
            });
        if expired > 0 {
            info!("expired {} pending {} mutations", expired, resource_type);
        }
        expired
    }

    // ── Convergence helpers ──────────────────────────────────────

    /// Converges a confirmed create into the slice.
    ///
    /// If a push event already delivered the resource under its real id,
    /// the provisional row is dropped instead of replaced — the slice must
    /// end with exactly one row for the logical entity either way.
    fn confirm_create(
        &self,
        resource_type: ResourceType,
        temp_id: TempId,
        entry: &OutboxEntry,
        record: RemoteRecord,
    ) -> Resource {
        let real_id = record.id.clone();
        if let Err(e) = self.store.record_correlation(&temp_id, &real_id, resource_type) {
            warn!("correlation record failed for {} {}: {}", resource_type, real_id, e);
        }

        let confirmed = Resource::confirmed(record.id, resource_type, record.data);
        let for_slice = confirmed.clone();
        self.broadcaster
            .mutate(resource_type, SnapshotOrigin::Remote, |slice| {
                if slice.iter().any(|r| r.real_id() == Some(&real_id)) {
                    slice.retain(|r| r.temp_id() != Some(temp_id));
                } else if let Some(pos) = slice.iter().position(|r| r.temp_id() == Some(temp_id)) {
                    slice[pos] = for_slice;
                } else {
                    slice.insert(0, for_slice);
                }
            });

        if let Err(e) = self.store.outbox_delete(&entry.id) {
            warn!("outbox delete failed for {}: {}", entry.id, e);
        }
        if let Err(e) = self.store.put(resource_type, &confirmed) {
            warn!("cache write failed for {}: {}", resource_type, e);
        }
        debug!("create confirmed: {} {} -> {}", resource_type, temp_id, confirmed.identity);
        confirmed
    }

    /// Replaces the confirmed tail of a slice, keeping optimistic entries
    /// at the front. A confirmed row whose id matches a failed optimistic
    /// update is skipped so the user's unsynced edit stays visible.
    fn merge_confirmed(
        &self,
        resource_type: ResourceType,
        origin: SnapshotOrigin,
        confirmed: Vec<Resource>,
    ) -> StateSnapshot {
        self.broadcaster.mutate(resource_type, origin, |slice| {
            let optimistic: Vec<Resource> =
                slice.iter().filter(|r| r.is_optimistic()).cloned().collect();
            let optimistic_ids: HashSet<String> = optimistic
                .iter()
                .filter_map(|r| r.real_id().map(|id| id.as_str().to_string()))
                .collect();

            let mut merged = optimistic;
            merged.extend(confirmed.into_iter().filter(|r| {
                r.real_id()
                    .map(|id| !optimistic_ids.contains(id.as_str()))
                    .unwrap_or(true)
            }));
            *slice = merged;
        })
    }

    fn mark_failed_by_temp_id(&self, resource_type: ResourceType, temp_id: TempId) {
        self.broadcaster
            .mutate(resource_type, SnapshotOrigin::Local, |slice| {
                if let Some(resource) = slice.iter_mut().find(|r| r.temp_id() == Some(temp_id)) {
                    resource.state = ResourceState::Failed;
                    resource.modified_at = Utc::now();
                }
            });
    }

    fn mark_failed_by_real_id(&self, resource_type: ResourceType, id: &ResourceId) {
        let target = id.clone();
        self.broadcaster
            .mutate(resource_type, SnapshotOrigin::Local, |slice| {
                if let Some(resource) = slice.iter_mut().find(|r| r.real_id() == Some(&target)) {
                    resource.state = ResourceState::Failed;
                    resource.modified_at = Utc::now();
                }
            });
    }

    fn clear_outbox(&self, entry: &OutboxEntry, real_id: Option<&ResourceId>, resource_type: ResourceType) {
        if let Err(e) = self.store.outbox_delete(&entry.id) {
            warn!("outbox delete failed for {}: {}", entry.id, e);
        }
        if let Some(id) = real_id {
            if let Err(e) = self.store.delete_correlation(id, resource_type) {
                warn!("correlation delete failed for {} {}: {}", resource_type, id, e);
            }
        }
    }
}
