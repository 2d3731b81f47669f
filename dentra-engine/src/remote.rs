//! Remote resource API abstraction.
//!
//! The engine consumes the practice-management HTTP API through this trait
//! so the sync logic never depends on endpoint shape or transport. The
//! application wires in the real client; tests wire in [`mock::MockApi`].

use crate::error::EngineResult;
use async_trait::async_trait;
use dentra_types::{ResourceId, ResourceType};
use std::collections::HashMap;

/// A resource as the server returns it: authoritative id plus payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    /// Server-assigned id.
    pub id: ResourceId,
    /// Full entity payload.
    pub data: serde_json::Value,
}

impl RemoteRecord {
    /// Creates a remote record.
    pub fn new(id: impl Into<ResourceId>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// Query filters passed through to the remote list call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilters(HashMap<String, String>);

impl ListFilters {
    /// No filters.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Adds a filter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Looks up a filter value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether any filters are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the filter pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// The remote resource API the repository calls.
///
/// Contract consumed, not defined here: implementations map these calls to
/// whatever endpoints the server exposes.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Lists a collection, optionally filtered.
    async fn list(
        &self,
        resource_type: ResourceType,
        filters: &ListFilters,
    ) -> EngineResult<Vec<RemoteRecord>>;

    /// Creates a resource; the server assigns the authoritative id.
    async fn create(
        &self,
        resource_type: ResourceType,
        payload: &serde_json::Value,
    ) -> EngineResult<RemoteRecord>;

    /// Updates an existing resource.
    async fn update(
        &self,
        resource_type: ResourceType,
        id: &ResourceId,
        payload: &serde_json::Value,
    ) -> EngineResult<RemoteRecord>;

    /// Deletes a resource.
    async fn delete(&self, resource_type: ResourceType, id: &ResourceId) -> EngineResult<()>;
}

/// A scriptable in-memory API for testing.
pub mod mock {
    use super::*;
    use crate::error::EngineError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;
    use tokio::sync::watch;

    /// Mock remote API with scripted records, queued server ids, a failure
    /// switch, and a pause gate so tests can observe pre-confirmation state.
    pub struct MockApi {
        records: Mutex<HashMap<ResourceType, Vec<RemoteRecord>>>,
        queued_ids: Mutex<VecDeque<String>>,
        failing: AtomicBool,
        paused_tx: watch::Sender<bool>,
        next_id: AtomicU64,
        last_filters: Mutex<Option<ListFilters>>,
    }

    impl MockApi {
        /// Creates an empty mock API.
        pub fn new() -> Self {
            let (paused_tx, _) = watch::channel(false);
            Self {
                records: Mutex::new(HashMap::new()),
                queued_ids: Mutex::new(VecDeque::new()),
                failing: AtomicBool::new(false),
                paused_tx,
                next_id: AtomicU64::new(1),
                last_filters: Mutex::new(None),
            }
        }

        /// Seeds the scripted records for a collection.
        pub fn seed(&self, resource_type: ResourceType, records: Vec<RemoteRecord>) {
            self.records.lock().unwrap().insert(resource_type, records);
        }

        /// Queues the next server-assigned id (otherwise `srv-N`).
        pub fn queue_id(&self, id: impl Into<String>) {
            self.queued_ids.lock().unwrap().push_back(id.into());
        }

        /// Makes every subsequent call fail (or succeed again).
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Holds every subsequent call until [`resume`](Self::resume).
        ///
        /// `send_replace` stores the value even while no call is gated yet;
        /// plain `send` would drop it without an active receiver.
        pub fn pause(&self) {
            self.paused_tx.send_replace(true);
        }

        /// Releases paused calls.
        pub fn resume(&self) {
            self.paused_tx.send_replace(false);
        }

        /// The filters passed to the most recent list call.
        pub fn last_filters(&self) -> Option<ListFilters> {
            self.last_filters.lock().unwrap().clone()
        }

        /// Records currently held for a collection.
        pub fn records(&self, resource_type: ResourceType) -> Vec<RemoteRecord> {
            self.records
                .lock()
                .unwrap()
                .get(&resource_type)
                .cloned()
                .unwrap_or_default()
        }

        async fn gate(&self) {
            let mut rx = self.paused_tx.subscribe();
            while *rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }

        fn check_failure(&self) -> EngineResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(EngineError::Remote("mock remote failure".to_string()))
            } else {
                Ok(())
            }
        }

        fn mint_id(&self) -> String {
            if let Some(id) = self.queued_ids.lock().unwrap().pop_front() {
                return id;
            }
            format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
        }
    }

    impl Default for MockApi {
        fn default() -> Self {
            Self::new()
        }
    }

    fn with_id(payload: &serde_json::Value, id: &str) -> serde_json::Value {
        let mut data = payload.clone();
        if let Some(map) = data.as_object_mut() {
            map.insert("id".to_string(), serde_json::Value::String(id.to_string()));
        }
        data
    }

    #[async_trait]
    impl ResourceApi for MockApi {
        async fn list(
            &self,
            resource_type: ResourceType,
            filters: &ListFilters,
        ) -> EngineResult<Vec<RemoteRecord>> {
            self.gate().await;
            self.check_failure()?;
            *self.last_filters.lock().unwrap() = Some(filters.clone());
            Ok(self.records(resource_type))
        }

        async fn create(
            &self,
            resource_type: ResourceType,
            payload: &serde_json::Value,
        ) -> EngineResult<RemoteRecord> {
            self.gate().await;
            self.check_failure()?;
            let id = self.mint_id();
            let record = RemoteRecord::new(id.as_str(), with_id(payload, &id));
            self.records
                .lock()
                .unwrap()
                .entry(resource_type)
                .or_default()
                .push(record.clone());
            Ok(record)
        }

        async fn update(
            &self,
            resource_type: ResourceType,
            id: &ResourceId,
            payload: &serde_json::Value,
        ) -> EngineResult<RemoteRecord> {
            self.gate().await;
            self.check_failure()?;
            let record = RemoteRecord::new(id.clone(), with_id(payload, id.as_str()));
            let mut records = self.records.lock().unwrap();
            let collection = records.entry(resource_type).or_default();
            match collection.iter_mut().find(|r| r.id == *id) {
                Some(existing) => *existing = record.clone(),
                None => collection.push(record.clone()),
            }
            Ok(record)
        }

        async fn delete(&self, resource_type: ResourceType, id: &ResourceId) -> EngineResult<()> {
            self.gate().await;
            self.check_failure()?;
            if let Some(collection) = self.records.lock().unwrap().get_mut(&resource_type) {
                collection.retain(|r| r.id != *id);
            }
            Ok(())
        }
    }
}
