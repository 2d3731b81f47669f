//! Push reconciliation.
//!
//! Server push events arrive concurrently with local mutation
//! confirmations, in either order. The reconciler resolves each event
//! against the correlation table so that a `created` push for a resource
//! this client created converges onto the provisional row instead of
//! producing a duplicate. All outcomes are idempotent: replaying an event
//! leaves the slice unchanged.

use crate::broadcaster::{Broadcaster, SnapshotOrigin};
use crate::channel::PushChannel;
use dentra_store::LocalStore;
use dentra_types::{normalize, PushEvent, PushOperation, Resource, ResourceId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies canonical push events to the shared state.
pub struct PushReconciler {
    store: Arc<LocalStore>,
    broadcaster: Broadcaster,
}

impl PushReconciler {
    /// Creates a reconciler over the given collaborators.
    pub fn new(store: Arc<LocalStore>, broadcaster: Broadcaster) -> Self {
        Self { store, broadcaster }
    }

    /// Consumes a push channel until it closes, applying each event.
    /// Messages that fail normalization are logged and skipped.
    pub async fn run(&self, mut channel: impl PushChannel) {
        while let Some(raw) = channel.recv().await {
            match normalize(&raw) {
                Ok(event) => self.apply(&event),
                Err(e) => warn!("dropping malformed push message: {}", e),
            }
        }
        debug!("push channel closed");
    }

    /// Applies one canonical event to the slice and the cache.
    pub fn apply(&self, event: &PushEvent) {
        match event.op {
            PushOperation::Created => self.apply_created(event),
            PushOperation::Updated => self.apply_updated(event),
            PushOperation::Deleted => self.apply_deleted(event),
        }
    }

    /// A `created` push either confirms this client's own optimistic
    /// create (correlation hit) or announces another client's resource.
    fn apply_created(&self, event: &PushEvent) {
        let resource_type = event.resource_type;
        let confirmed = Resource::confirmed(event.id.clone(), resource_type, event.data.clone());

        let correlation = match self.store.find_correlation(&event.id, resource_type) {
            Ok(correlation) => correlation,
            Err(e) => {
                warn!("correlation lookup failed for {} {}: {}", resource_type, event.id, e);
                None
            }
        };

        if let Some(temp_id) = correlation {
            // Our own create; the repository may or may not have converged
            // it already. Replace the provisional row if it is still there,
            // otherwise replace by real id (replay or repository won).
            let for_slice = confirmed.clone();
            let real_id = event.id.clone();
            self.broadcaster
                .mutate(resource_type, SnapshotOrigin::Push, |slice| {
                    if let Some(pos) = slice.iter().position(|r| r.temp_id() == Some(temp_id)) {
                        slice[pos] = for_slice;
                    } else {
                        Self::upsert(slice, &real_id, for_slice);
                    }
                });
            self.settle_outbox(&temp_id);
            debug!("push confirmed own create: {} {} -> {}", resource_type, temp_id, event.id);
        } else {
            // Another client's resource, or a replay of one we already hold.
            let for_slice = confirmed.clone();
            let real_id = event.id.clone();
            self.broadcaster
                .mutate(resource_type, SnapshotOrigin::Push, |slice| {
                    Self::upsert(slice, &real_id, for_slice);
                });
            debug!("push created: {} {}", resource_type, event.id);
        }

        if let Err(e) = self.store.put(resource_type, &confirmed) {
            warn!("cache write failed for {} {}: {}", resource_type, event.id, e);
        }
    }

    fn apply_updated(&self, event: &PushEvent) {
        let resource_type = event.resource_type;
        let confirmed = Resource::confirmed(event.id.clone(), resource_type, event.data.clone());
        let for_slice = confirmed.clone();
        let real_id = event.id.clone();
        self.broadcaster
            .mutate(resource_type, SnapshotOrigin::Push, |slice| {
                Self::upsert(slice, &real_id, for_slice);
            });
        self.settle_outbox_by_real_id(&event.id, resource_type);
        if let Err(e) = self.store.put(resource_type, &confirmed) {
            warn!("cache write failed for {} {}: {}", resource_type, event.id, e);
        }
        debug!("push updated: {} {}", resource_type, event.id);
    }

    /// Deletes are naturally idempotent; a replay finds nothing to remove
    /// and notifies with the unchanged slice.
    fn apply_deleted(&self, event: &PushEvent) {
        let resource_type = event.resource_type;
        let real_id = event.id.clone();
        self.broadcaster
            .mutate(resource_type, SnapshotOrigin::Push, |slice| {
                slice.retain(|r| r.real_id() != Some(&real_id));
            });
        self.settle_outbox_by_real_id(&event.id, resource_type);
        if let Err(e) = self.store.remove(resource_type, &event.id) {
            warn!("cache remove failed for {} {}: {}", resource_type, event.id, e);
        }
        debug!("push deleted: {} {}", resource_type, event.id);
    }

    /// Replaces a row by real id, or appends when no row matches.
    fn upsert(slice: &mut Vec<Resource>, id: &ResourceId, resource: Resource) {
        match slice.iter().position(|r| r.real_id() == Some(id)) {
            Some(pos) => slice[pos] = resource,
            None => slice.push(resource),
        }
    }

    /// Drops the outbox entry once the push has confirmed it. Harmless if
    /// the repository deleted it first.
    fn settle_outbox(&self, temp_id: &dentra_types::TempId) {
        match self.store.outbox_find_by_temp_id(temp_id) {
            Ok(Some(entry)) => {
                if let Err(e) = self.store.outbox_delete(&entry.id) {
                    warn!("outbox delete failed for {}: {}", entry.id, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("outbox lookup failed for {}: {}", temp_id, e),
        }
    }

    /// Same, for events that only carry the real id.
    fn settle_outbox_by_real_id(&self, id: &ResourceId, resource_type: dentra_types::ResourceType) {
        match self.store.outbox_find_by_real_id(id, resource_type) {
            Ok(Some(entry)) => {
                if let Err(e) = self.store.outbox_delete(&entry.id) {
                    warn!("outbox delete failed for {}: {}", entry.id, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("outbox lookup failed for {} {}: {}", resource_type, id, e),
        }
    }
}
