use chrono::Utc;
use dentra_engine::remote::mock::MockApi;
use dentra_engine::{
    Broadcaster, EngineError, ListFilters, RemoteRecord, ResourceApi, ResourceRepository,
    SnapshotOrigin,
};
use dentra_store::LocalStore;
use dentra_types::{Operation, ResourceState, ResourceType};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn setup() -> (Arc<LocalStore>, Arc<MockApi>, Broadcaster, Arc<ResourceRepository>) {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let api = Arc::new(MockApi::new());
    let broadcaster = Broadcaster::new();
    let repository = Arc::new(ResourceRepository::new(
        store.clone(),
        api.clone() as Arc<dyn ResourceApi>,
        broadcaster.clone(),
    ));
    (store, api, broadcaster, repository)
}

// ── Mock gating ──────────────────────────────────────────────────

#[tokio::test]
async fn pause_set_before_any_call_still_gates() {
    let api = Arc::new(MockApi::new());
    api.pause();

    let task = tokio::spawn({
        let api = api.clone();
        async move { api.list(ResourceType::Invoice, &ListFilters::none()).await }
    });

    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert!(!task.is_finished());

    api.resume();
    task.await.unwrap().unwrap();
}

// ── Create ───────────────────────────────────────────────────────

#[tokio::test]
async fn create_is_visible_before_the_server_answers() {
    let (_store, api, broadcaster, repository) = setup();
    api.pause();

    let task = tokio::spawn({
        let repository = repository.clone();
        async move {
            repository
                .create(ResourceType::Invoice, json!({"client": "Acme", "total": 100}))
                .await
        }
    });

    // Let the spawned create run up to its paused remote call.
    for _ in 0..100 {
        if broadcaster.stats(ResourceType::Invoice).total > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }

    let snapshot = broadcaster.snapshot(ResourceType::Invoice);
    assert_eq!(snapshot.stats.total, 1);
    assert_eq!(snapshot.stats.pending, 1);
    assert!(snapshot.resources[0].temp_id().is_some());
    assert_eq!(snapshot.resources[0].get_str("/client"), Some("Acme"));

    api.resume();
    let confirmed = task.await.unwrap().unwrap();
    assert_eq!(confirmed.state, ResourceState::Confirmed);
}

#[tokio::test]
async fn create_success_replaces_the_provisional_row() {
    let (store, api, broadcaster, repository) = setup();
    api.queue_id("inv-42");

    let confirmed = repository
        .create(ResourceType::Invoice, json!({"client": "Acme"}))
        .await
        .unwrap();

    assert_eq!(confirmed.real_id().unwrap().as_str(), "inv-42");
    let snapshot = broadcaster.snapshot(ResourceType::Invoice);
    assert_eq!(snapshot.stats.total, 1);
    assert_eq!(snapshot.resources[0].state, ResourceState::Confirmed);
    assert!(snapshot.resources[0].temp_id().is_none());

    // The outbox entry is settled; the correlation survives for push replay.
    assert!(store.outbox_pending(ResourceType::Invoice).unwrap().is_empty());
    assert!(store
        .find_correlation(&"inv-42".into(), ResourceType::Invoice)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn create_failure_keeps_the_row_as_failed() {
    let (store, api, broadcaster, repository) = setup();
    api.set_failing(true);

    let err = repository
        .create(ResourceType::Invoice, json!({"client": "Acme"}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Remote(_)));

    let snapshot = broadcaster.snapshot(ResourceType::Invoice);
    assert_eq!(snapshot.stats.failed, 1);
    assert_eq!(snapshot.resources[0].get_str("/client"), Some("Acme"));

    // The unsynced mutation stays durable for retry.
    let pending = store.outbox_pending(ResourceType::Invoice).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].operation, Operation::Create);
}

// ── Retry ────────────────────────────────────────────────────────

#[tokio::test]
async fn retry_reissues_a_failed_create() {
    let (store, api, broadcaster, repository) = setup();
    api.set_failing(true);
    repository
        .create(ResourceType::Invoice, json!({"client": "Acme"}))
        .await
        .unwrap_err();

    let temp_id = broadcaster.snapshot(ResourceType::Invoice).resources[0]
        .temp_id()
        .unwrap();

    api.set_failing(false);
    api.queue_id("inv-42");
    let confirmed = repository.retry(ResourceType::Invoice, &temp_id).await.unwrap();

    assert_eq!(confirmed.real_id().unwrap().as_str(), "inv-42");
    assert_eq!(broadcaster.stats(ResourceType::Invoice).failed, 0);
    assert!(store.outbox_pending(ResourceType::Invoice).unwrap().is_empty());
}

#[tokio::test]
async fn retry_refuses_non_create_operations() {
    let (store, api, _broadcaster, repository) = setup();
    api.queue_id("inv-42");
    repository
        .create(ResourceType::Invoice, json!({"client": "Acme"}))
        .await
        .unwrap();

    api.set_failing(true);
    repository
        .update(ResourceType::Invoice, &"inv-42".into(), json!({"client": "Acme Ltd"}))
        .await
        .unwrap_err();

    let entry = &store.outbox_pending(ResourceType::Invoice).unwrap()[0];
    let err = repository
        .retry(ResourceType::Invoice, &entry.temp_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RetryUnsupported(Operation::Update)));
}

#[tokio::test]
async fn retry_of_unknown_mutation_is_not_found() {
    let (_store, _api, _broadcaster, repository) = setup();
    let err = repository
        .retry(ResourceType::Invoice, &dentra_types::TempId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

// ── Update ───────────────────────────────────────────────────────

#[tokio::test]
async fn update_applies_optimistically_then_confirms() {
    let (_store, api, broadcaster, repository) = setup();
    api.queue_id("p-1");
    repository
        .create(ResourceType::Patient, json!({"name": "Ada"}))
        .await
        .unwrap();

    let updated = repository
        .update(ResourceType::Patient, &"p-1".into(), json!({"name": "Ada L."}))
        .await
        .unwrap();

    assert_eq!(updated.state, ResourceState::Confirmed);
    let snapshot = broadcaster.snapshot(ResourceType::Patient);
    assert_eq!(snapshot.stats.total, 1);
    assert_eq!(snapshot.resources[0].get_str("/name"), Some("Ada L."));
}

#[tokio::test]
async fn failed_update_keeps_the_local_edit_as_failed() {
    let (_store, api, broadcaster, repository) = setup();
    api.queue_id("p-1");
    repository
        .create(ResourceType::Patient, json!({"name": "Ada"}))
        .await
        .unwrap();

    api.set_failing(true);
    repository
        .update(ResourceType::Patient, &"p-1".into(), json!({"name": "Ada L."}))
        .await
        .unwrap_err();

    let snapshot = broadcaster.snapshot(ResourceType::Patient);
    assert_eq!(snapshot.resources[0].state, ResourceState::Failed);
    assert_eq!(snapshot.resources[0].get_str("/name"), Some("Ada L."));
}

// ── Delete ───────────────────────────────────────────────────────

#[tokio::test]
async fn delete_removes_locally_and_remotely() {
    let (store, api, broadcaster, repository) = setup();
    api.queue_id("p-1");
    repository
        .create(ResourceType::Patient, json!({"name": "Ada"}))
        .await
        .unwrap();

    repository.delete(ResourceType::Patient, &"p-1".into()).await.unwrap();

    assert_eq!(broadcaster.stats(ResourceType::Patient).total, 0);
    assert!(api.records(ResourceType::Patient).is_empty());
    assert!(store.get_all(ResourceType::Patient).unwrap().is_empty());
}

#[tokio::test]
async fn failed_delete_reports_the_error_without_restoring_the_row() {
    let (store, api, broadcaster, repository) = setup();
    api.queue_id("p-1");
    repository
        .create(ResourceType::Patient, json!({"name": "Ada"}))
        .await
        .unwrap();

    api.set_failing(true);
    let err = repository
        .delete(ResourceType::Patient, &"p-1".into())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Remote(_)));

    // The row stays gone locally; the outbox still records the intent.
    assert_eq!(broadcaster.stats(ResourceType::Patient).total, 0);
    let found = store
        .outbox_find_by_real_id(&"p-1".into(), ResourceType::Patient)
        .unwrap()
        .unwrap();
    assert_eq!(found.operation, Operation::Delete);
}

// ── Load and cache fallback ──────────────────────────────────────

#[tokio::test]
async fn load_all_serves_remote_data_and_fills_the_cache() {
    let (store, api, _broadcaster, repository) = setup();
    api.seed(
        ResourceType::Invoice,
        vec![
            RemoteRecord::new("inv-1", json!({"id": "inv-1", "total": 10})),
            RemoteRecord::new("inv-2", json!({"id": "inv-2", "total": 20})),
        ],
    );

    let outcome = repository
        .load_all(ResourceType::Invoice, &ListFilters::none())
        .await
        .unwrap();

    assert!(!outcome.from_cache);
    assert_eq!(outcome.resources.len(), 2);
    assert_eq!(store.get_all(ResourceType::Invoice).unwrap().len(), 2);
}

#[tokio::test]
async fn load_all_falls_back_to_cache_when_remote_fails() {
    let (_store, api, _broadcaster, repository) = setup();
    api.seed(
        ResourceType::Invoice,
        vec![RemoteRecord::new("inv-1", json!({"id": "inv-1"}))],
    );
    repository
        .load_all(ResourceType::Invoice, &ListFilters::none())
        .await
        .unwrap();

    api.set_failing(true);
    let outcome = repository
        .load_all(ResourceType::Invoice, &ListFilters::none())
        .await
        .unwrap();

    assert!(outcome.from_cache);
    assert_eq!(outcome.resources.len(), 1);
    assert_eq!(outcome.resources[0].real_id().unwrap().as_str(), "inv-1");
}

#[tokio::test]
async fn load_all_with_no_remote_and_no_cache_is_unavailable() {
    let (_store, api, _broadcaster, repository) = setup();
    api.set_failing(true);

    let err = repository
        .load_all(ResourceType::Invoice, &ListFilters::none())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unavailable(ResourceType::Invoice)));
}

#[tokio::test]
async fn load_all_keeps_optimistic_rows_in_front() {
    let (_store, api, broadcaster, repository) = setup();
    api.set_failing(true);
    repository
        .create(ResourceType::Invoice, json!({"client": "Acme"}))
        .await
        .unwrap_err();

    api.set_failing(false);
    api.seed(
        ResourceType::Invoice,
        vec![RemoteRecord::new("inv-1", json!({"id": "inv-1"}))],
    );
    let outcome = repository
        .load_all(ResourceType::Invoice, &ListFilters::none())
        .await
        .unwrap();

    assert_eq!(outcome.resources.len(), 2);
    assert_eq!(outcome.resources[0].state, ResourceState::Failed);
    assert_eq!(outcome.resources[1].real_id().unwrap().as_str(), "inv-1");
    assert_eq!(broadcaster.stats(ResourceType::Invoice).total, 2);
}

#[tokio::test]
async fn load_all_skips_confirmed_rows_shadowed_by_a_local_edit() {
    let (_store, api, _broadcaster, repository) = setup();
    api.queue_id("p-1");
    repository
        .create(ResourceType::Patient, json!({"name": "Ada"}))
        .await
        .unwrap();
    api.set_failing(true);
    repository
        .update(ResourceType::Patient, &"p-1".into(), json!({"name": "Ada L."}))
        .await
        .unwrap_err();

    api.set_failing(false);
    let outcome = repository
        .load_all(ResourceType::Patient, &ListFilters::none())
        .await
        .unwrap();

    // The failed local edit shadows the server copy of the same id.
    assert_eq!(outcome.resources.len(), 1);
    assert_eq!(outcome.resources[0].state, ResourceState::Failed);
    assert_eq!(outcome.resources[0].get_str("/name"), Some("Ada L."));
}

#[tokio::test]
async fn load_all_passes_filters_through() {
    let (_store, api, _broadcaster, repository) = setup();
    let filters = ListFilters::none().with("status", "unpaid");
    repository
        .load_all(ResourceType::Invoice, &filters)
        .await
        .unwrap();
    assert_eq!(api.last_filters().unwrap().get("status"), Some("unpaid"));
}

// ── Pending expiry ───────────────────────────────────────────────

#[tokio::test]
async fn expire_pending_fails_only_stale_mutations() {
    let (_store, _api, broadcaster, repository) = setup();

    broadcaster.mutate(ResourceType::Invoice, SnapshotOrigin::Local, |slice| {
        let mut stale = dentra_types::Resource::optimistic(
            dentra_types::TempId::new(),
            ResourceType::Invoice,
            json!({"n": 1}),
        );
        stale.modified_at = Utc::now() - chrono::Duration::seconds(60);
        slice.push(stale);
        slice.push(dentra_types::Resource::optimistic(
            dentra_types::TempId::new(),
            ResourceType::Invoice,
            json!({"n": 2}),
        ));
    });

    let expired = repository.expire_pending(ResourceType::Invoice, chrono::Duration::seconds(30));
    assert_eq!(expired, 1);

    let stats = repository.stats(ResourceType::Invoice);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 1);
}

#[tokio::test]
async fn expire_pending_with_nothing_stale_stays_silent() {
    let (_store, api, broadcaster, repository) = setup();
    api.queue_id("inv-1");
    repository
        .create(ResourceType::Invoice, json!({}))
        .await
        .unwrap();

    let notified = Arc::new(Mutex::new(0usize));
    let sink = notified.clone();
    let _sub = broadcaster.subscribe(ResourceType::Invoice, move |_| {
        *sink.lock().unwrap() += 1;
    });

    let expired = repository.expire_pending(ResourceType::Invoice, chrono::Duration::seconds(30));
    assert_eq!(expired, 0);
    assert_eq!(*notified.lock().unwrap(), 0);
}
