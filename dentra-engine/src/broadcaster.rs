//! Shared state broadcaster.
//!
//! One authoritative in-memory slice per resource type plus a registry of
//! subscriber callbacks. Every mutation in the engine — repository success
//! and failure paths, push reconciliation — funnels through
//! [`Broadcaster::mutate`], which rewrites the slice in one synchronous
//! step and then fans the new state out to every subscriber as an owned
//! snapshot. Subscribers can mutate their snapshot freely without
//! corrupting shared state.
//!
//! The broadcaster is an explicitly constructed handle, not module-level
//! state: construct one per engine, clone it freely, drop it to dispose.

use dentra_types::{Resource, ResourceState, ResourceType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::debug;

/// Derived statistics for one slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceStats {
    /// Total resources in the slice.
    pub total: usize,
    /// Mutations still awaiting server confirmation.
    pub pending: usize,
    /// Mutations in the terminal failed state, awaiting user action.
    pub failed: usize,
}

impl SliceStats {
    fn compute(resources: &[Resource]) -> Self {
        let mut stats = Self {
            total: resources.len(),
            ..Self::default()
        };
        for resource in resources {
            match resource.state {
                ResourceState::Pending => stats.pending += 1,
                ResourceState::Failed => stats.failed += 1,
                ResourceState::Confirmed => {}
            }
        }
        stats
    }
}

/// Where the data in a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOrigin {
    /// Locally-issued optimistic mutation.
    Local,
    /// Confirmed by a remote API response.
    Remote,
    /// Served from the local cache (degraded mode).
    Cache,
    /// Reconciled from a server push event.
    Push,
}

/// An owned copy of one slice, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// The collection this snapshot describes.
    pub resource_type: ResourceType,
    /// The resources, optimistic entries toward the front.
    pub resources: Vec<Resource>,
    /// Derived statistics.
    pub stats: SliceStats,
    /// Where the most recent mutation originated.
    pub origin: SnapshotOrigin,
}

impl StateSnapshot {
    fn new(resource_type: ResourceType, resources: Vec<Resource>, origin: SnapshotOrigin) -> Self {
        let stats = SliceStats::compute(&resources);
        Self {
            resource_type,
            resources,
            stats,
            origin,
        }
    }
}

type Callback = Arc<dyn Fn(StateSnapshot) + Send + Sync>;

struct Inner {
    slices: RwLock<HashMap<ResourceType, Vec<Resource>>>,
    subscribers: RwLock<HashMap<ResourceType, Vec<(u64, Callback)>>>,
    // Serializes slice rewrite + fan-out so concurrent mutations cannot
    // deliver their snapshots out of order. Separate from `slices` so
    // plain snapshot reads never wait on subscriber callbacks.
    notify: Mutex<()>,
    next_subscriber: AtomicU64,
}

/// Process-wide shared state, scoped by resource type.
///
/// Cheap to clone; all clones observe the same slices.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    /// Creates an empty broadcaster. Slices are created lazily on first
    /// access and live until [`clear_all`](Self::clear_all).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slices: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(HashMap::new()),
                notify: Mutex::new(()),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    /// Returns an owned snapshot of the current slice.
    pub fn snapshot(&self, resource_type: ResourceType) -> StateSnapshot {
        let slices = self.inner.slices.read().unwrap();
        let resources = slices.get(&resource_type).cloned().unwrap_or_default();
        StateSnapshot::new(resource_type, resources, SnapshotOrigin::Local)
    }

    /// Derived statistics for the current slice.
    pub fn stats(&self, resource_type: ResourceType) -> SliceStats {
        let slices = self.inner.slices.read().unwrap();
        slices
            .get(&resource_type)
            .map(|r| SliceStats::compute(r))
            .unwrap_or_default()
    }

    /// Rewrites a slice and synchronously notifies every subscriber.
    ///
    /// The closure runs to completion under the write lock — the whole new
    /// slice is computed before anyone can observe it, and there is no
    /// suspension point between computing and publishing. Each subscriber
    /// receives its own clone of the resulting snapshot. Concurrent
    /// mutations are serialized end to end, so a subscriber always sees
    /// snapshots in the order the slice actually changed. Callbacks must
    /// therefore not call `mutate` themselves.
    pub fn mutate<F>(
        &self,
        resource_type: ResourceType,
        origin: SnapshotOrigin,
        f: F,
    ) -> StateSnapshot
    where
        F: FnOnce(&mut Vec<Resource>),
    {
        let _ordering = self.inner.notify.lock().unwrap();

        let snapshot = {
            let mut slices = self.inner.slices.write().unwrap();
            let slice = slices.entry(resource_type).or_default();
            f(slice);
            StateSnapshot::new(resource_type, slice.clone(), origin)
        };

        let callbacks: Vec<Callback> = {
            let subscribers = self.inner.subscribers.read().unwrap();
            subscribers
                .get(&resource_type)
                .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };

        for callback in &callbacks {
            callback(snapshot.clone());
        }

        snapshot
    }

    /// Registers an observer for one resource type.
    ///
    /// The returned handle unregisters via [`Subscription::unsubscribe`].
    /// A dropped-but-never-unsubscribed handle leaks the callback; it does
    /// not affect correctness.
    pub fn subscribe<F>(&self, resource_type: ResourceType, callback: F) -> Subscription
    where
        F: Fn(StateSnapshot) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .unwrap()
            .entry(resource_type)
            .or_default()
            .push((id, Arc::new(callback)));
        debug!("subscriber {} registered for {}", id, resource_type);
        Subscription {
            id,
            resource_type,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscribers for one resource type.
    pub fn subscriber_count(&self, resource_type: ResourceType) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap()
            .get(&resource_type)
            .map_or(0, Vec::len)
    }

    /// Clears every slice. Subscribers for each non-empty slice are
    /// notified once with the emptied state.
    pub fn clear_all(&self) {
        let affected: Vec<ResourceType> = {
            let slices = self.inner.slices.read().unwrap();
            slices
                .iter()
                .filter(|(_, slice)| !slice.is_empty())
                .map(|(rt, _)| *rt)
                .collect()
        };
        for resource_type in affected {
            self.mutate(resource_type, SnapshotOrigin::Local, Vec::clear);
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered subscriber.
pub struct Subscription {
    id: u64,
    resource_type: ResourceType,
    inner: Weak<Inner>,
}

impl Subscription {
    /// The resource type this subscription observes.
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Removes the callback from the registry.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(subs) = inner.subscribers.write().unwrap().get_mut(&self.resource_type) {
                subs.retain(|(id, _)| *id != self.id);
            }
            debug!("subscriber {} unregistered for {}", self.id, self.resource_type);
        }
    }
}
