//! Integration tests for till-core
//!
//! These tests exercise the offline capture → reconnect → drain workflow
//! against the mock backend server.

use chrono::Utc;
use till_core::models::{
    DatasetKey, NewOfflinePayment, NetworkStatus, OperationStatus, OrderSyncStatus, PairingInfo,
    PaymentMethod,
};
use till_core::sync::{drain_queue, pull_all, spawn_engine, BackendClient};
use till_core::test_utils::MockBackend;
use till_core::{CoreConfig, Database, Error, EventBus, ExposureGuard};

fn pair(db: &Database) {
    db.store_pairing(&PairingInfo {
        terminal_id: "term-1".to_string(),
        tenant_id: "acme".to_string(),
        location_id: "loc-1".to_string(),
        signing_secret: "topsecret".to_string(),
        paired_at: Utc::now(),
    })
    .unwrap();
}

fn cash_payment(amount: f64, tendered: f64) -> NewOfflinePayment {
    NewOfflinePayment {
        method: PaymentMethod::Cash,
        amount,
        tip: 0.0,
        surcharge: 0.0,
        provider_transaction_id: None,
        cash_tendered: Some(tendered),
    }
}

// =============================================================================
// Offline capture
// =============================================================================

#[test]
fn offline_cash_order_captures_everything_locally() {
    let db = Database::in_memory().unwrap();
    db.set_network_status(NetworkStatus::Offline).unwrap();

    let order = serde_json::json!({
        "items": [{"product_id": 1, "qty": 1, "price": 10.00}],
        "subtotal": 10.00,
        "tax": 0.85,
        "total": 10.85,
    });
    let enqueued = db.record_order(order, &[cash_payment(10.85, 20.00)]).unwrap();

    // One offline order and one operation, both PENDING
    let orders = db.list_offline_orders(Some(OrderSyncStatus::Pending)).unwrap();
    assert_eq!(orders.len(), 1);
    let op = db.operation_for_order(enqueued.local_order_id).unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::Pending);

    // Exposure counters and change due
    let exposure = db.exposure().unwrap();
    assert_eq!(exposure.transaction_count, 1);
    assert!((exposure.cash_total - 10.85).abs() < 1e-9);
    assert!((enqueued.change_due.unwrap() - 9.15).abs() < 1e-9);
}

#[test]
fn limit_guard_blocks_oversized_card_payment() {
    let db = Database::in_memory().unwrap();
    db.set_network_status(NetworkStatus::Offline).unwrap();

    let config = CoreConfig {
        offline_transaction_cap: Some(50.00),
        ..Default::default()
    };
    let guard = ExposureGuard::new(db.clone(), &config);

    let payment = NewOfflinePayment {
        method: PaymentMethod::CardTerminal,
        amount: 75.00,
        tip: 0.0,
        surcharge: 0.0,
        provider_transaction_id: None,
        cash_tendered: None,
    };

    // The gateway enforces before enqueueing, so nothing is written
    let err = guard.enforce_all(std::slice::from_ref(&payment)).unwrap_err();
    assert!(matches!(err, Error::LimitExceeded(_)));

    assert!(db.list_offline_orders(None).unwrap().is_empty());
    assert_eq!(db.exposure().unwrap().transaction_count, 0);
}

// =============================================================================
// Reconnect and drain
// =============================================================================

#[tokio::test]
async fn reconnect_drains_queue_and_reconciles_server_identity() {
    let backend = MockBackend::start().await;
    let db = Database::in_memory().unwrap();
    pair(&db);
    db.set_network_status(NetworkStatus::Offline).unwrap();

    let enqueued = db
        .record_order(serde_json::json!({"total": 10.85}), &[cash_payment(10.85, 20.0)])
        .unwrap();

    // Network restored
    db.set_network_status(NetworkStatus::Online).unwrap();

    let config = CoreConfig {
        backend_url: backend.url(),
        ..Default::default()
    };
    let client = BackendClient::new(&config, Some("key-1".to_string())).unwrap();
    let events = EventBus::new();

    let report = drain_queue(&db, &client, &events, config.sync_interval())
        .await
        .unwrap();
    assert_eq!(report.sent, 1);

    let op = db.operation_for_order(enqueued.local_order_id).unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::Sent);

    let order = db.get_offline_order(enqueued.local_order_id).unwrap().unwrap();
    assert_eq!(order.status, OrderSyncStatus::Synced);
    assert_eq!(order.server_order_number.as_deref(), Some("A-001"));
    assert!(order.server_order_id.is_some());

    // The submit carried the idempotency key and the device signature
    let state = backend.state();
    let received = state.lock().unwrap();
    assert_eq!(received.operations.len(), 1);
    assert_eq!(
        received.operations[0].idempotency_key,
        enqueued.operation_id.to_string()
    );
    assert_eq!(received.operations[0].signature.len(), 64);
}

#[tokio::test]
async fn conflict_parks_order_without_retry_and_keeps_exposure() {
    let backend = MockBackend::start().await;
    backend.state().lock().unwrap().conflict_reason = Some("duplicate_local_id".to_string());

    let db = Database::in_memory().unwrap();
    pair(&db);
    let enqueued = db
        .record_order(serde_json::json!({"total": 10.85}), &[cash_payment(10.85, 20.0)])
        .unwrap();
    let exposure_before = db.exposure().unwrap();

    let config = CoreConfig {
        backend_url: backend.url(),
        ..Default::default()
    };
    let client = BackendClient::new(&config, Some("key-1".to_string())).unwrap();
    let events = EventBus::new();

    let report = drain_queue(&db, &client, &events, config.sync_interval())
        .await
        .unwrap();
    assert_eq!(report.conflicts, 1);

    let order = db.get_offline_order(enqueued.local_order_id).unwrap().unwrap();
    assert_eq!(order.status, OrderSyncStatus::Conflict);
    assert_eq!(order.conflict_reason.as_deref(), Some("duplicate_local_id"));

    let op = db.operation_for_order(enqueued.local_order_id).unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::Failed);

    // No automatic retry: a second pass finds nothing drainable
    let report = drain_queue(&db, &client, &events, config.sync_interval())
        .await
        .unwrap();
    assert_eq!(report.sent + report.conflicts + report.failed, 0);
    let state = backend.state();
    assert_eq!(state.lock().unwrap().operations.len(), 1);

    // The money was collected locally; counters stay as they were
    let exposure_after = db.exposure().unwrap();
    assert_eq!(exposure_after.transaction_count, exposure_before.transaction_count);
    assert!((exposure_after.cash_total - exposure_before.cash_total).abs() < 1e-9);
}

#[tokio::test]
async fn retries_reuse_the_same_idempotency_key() {
    let backend = MockBackend::start().await;
    backend.state().lock().unwrap().retryable_failures_remaining = 2;

    let db = Database::in_memory().unwrap();
    pair(&db);
    let enqueued = db
        .record_order(serde_json::json!({"total": 4.0}), &[])
        .unwrap();

    let config = CoreConfig {
        backend_url: backend.url(),
        ..Default::default()
    };
    let client = BackendClient::new(&config, Some("key-1".to_string())).unwrap();
    let events = EventBus::new();

    let report = drain_queue(&db, &client, &events, config.sync_interval())
        .await
        .unwrap();
    assert_eq!(report.sent, 1);

    let state = backend.state();
    let received = state.lock().unwrap();
    assert_eq!(received.operations.len(), 3);
    let keys: Vec<&str> = received
        .operations
        .iter()
        .map(|op| op.idempotency_key.as_str())
        .collect();
    assert!(keys.iter().all(|k| *k == enqueued.operation_id.to_string()));
}

// =============================================================================
// Delta pulls
// =============================================================================

#[tokio::test]
async fn stored_version_becomes_the_next_modified_since_cursor() {
    let backend = MockBackend::start().await;
    let db = Database::in_memory().unwrap();

    // Seed the cursor the way the gateway cache-dataset call would
    db.cache_dataset(
        DatasetKey::Products,
        &[serde_json::json!({"id": 1, "name": "Cola", "price": 2.5})],
        &[],
        "2024-01-01T00:00:00Z",
    )
    .unwrap();

    let config = CoreConfig {
        backend_url: backend.url(),
        ..Default::default()
    };
    let client = BackendClient::new(&config, Some("key-1".to_string())).unwrap();

    let report = pull_all(&db, &client).await.unwrap();
    assert!(report.complete());

    let state = backend.state();
    let pulls = &state.lock().unwrap().pull_requests;
    let products_pull = pulls.iter().find(|(key, _)| key == "products").unwrap();
    assert_eq!(products_pull.1.as_deref(), Some("2024-01-01T00:00:00Z"));

    // Datasets without a cursor pull from scratch
    let categories_pull = pulls.iter().find(|(key, _)| key == "categories").unwrap();
    assert_eq!(categories_pull.1, None);
}

#[tokio::test]
async fn pulled_rows_land_in_the_cache_with_new_cursor() {
    let backend = MockBackend::start().await;
    backend.set_dataset(
        "products",
        serde_json::json!([
            {"id": 7, "name": "Flat White", "price": 4.25, "barcode": "7001"}
        ]),
        "2024-03-01T00:00:00Z",
    );

    let db = Database::in_memory().unwrap();
    let config = CoreConfig {
        backend_url: backend.url(),
        ..Default::default()
    };
    let client = BackendClient::new(&config, Some("key-1".to_string())).unwrap();

    pull_all(&db, &client).await.unwrap();

    let product = db.get_product_by_barcode("7001").unwrap().unwrap();
    assert_eq!(product.name, "Flat White");
    assert_eq!(
        db.dataset_version(DatasetKey::Products).unwrap().unwrap().version,
        "2024-03-01T00:00:00Z"
    );
}

// =============================================================================
// Category hierarchy
// =============================================================================

#[test]
fn orphan_category_is_skipped_and_stays_skipped() {
    let db = Database::in_memory().unwrap();

    let rows = vec![
        serde_json::json!({"id": 1, "name": "Drinks", "parent_id": null}),
        serde_json::json!({"id": 2, "name": "Hot", "parent_id": 1}),
        serde_json::json!({"id": 3, "name": "Lost", "parent_id": 99}),
    ];
    let outcome = db.cache_dataset(DatasetKey::Categories, &rows, &[], "1").unwrap();
    assert_eq!(outcome.upserted, 2);
    assert_eq!(outcome.skipped_orphans, vec![(3, 99)]);

    // A second pass over the same snapshot does not resurrect the orphan
    let outcome = db.cache_dataset(DatasetKey::Categories, &rows, &[], "2").unwrap();
    assert_eq!(outcome.skipped_orphans, vec![(3, 99)]);
    assert_eq!(db.list_categories().unwrap().len(), 2);
}

// =============================================================================
// Engine loop
// =============================================================================

#[tokio::test]
async fn engine_full_tick_pulls_and_reports() {
    let backend = MockBackend::start().await;
    backend.set_dataset(
        "taxes",
        serde_json::json!([{"id": 1, "name": "VAT", "rate": 8.5}]),
        "2024-01-01T00:00:00Z",
    );

    let db = Database::in_memory().unwrap();
    pair(&db);
    db.set_api_key("key-1").unwrap();
    db.set_network_status(NetworkStatus::Online).unwrap();

    let config = CoreConfig {
        backend_url: backend.url(),
        ..Default::default()
    };
    let events = EventBus::new();
    let mut rx = events.subscribe();

    let handle = spawn_engine(db.clone(), config, events.clone()).unwrap();
    handle.request_sync();

    // Wait for the tick to finish
    let deadline = tokio::time::Duration::from_secs(10);
    let finished = tokio::time::timeout(deadline, async {
        loop {
            if let Ok(till_core::CoreEvent::SyncFinished { ok, .. }) = rx.recv().await {
                return ok;
            }
        }
    })
    .await
    .expect("sync tick did not finish");
    assert!(finished);

    assert_eq!(db.list_taxes().unwrap().len(), 1);
    assert!(db.last_sync_success().unwrap().is_some());

    handle.stop().await;
}

#[tokio::test]
async fn rejected_api_key_pauses_the_engine() {
    let backend = MockBackend::start().await;
    backend.state().lock().unwrap().reject_auth = true;

    let db = Database::in_memory().unwrap();
    db.set_api_key("stale-key").unwrap();
    db.set_network_status(NetworkStatus::Online).unwrap();

    let config = CoreConfig {
        backend_url: backend.url(),
        ..Default::default()
    };
    let events = EventBus::new();
    let mut rx = events.subscribe();

    let handle = spawn_engine(db.clone(), config, events.clone()).unwrap();

    let deadline = tokio::time::Duration::from_secs(10);
    tokio::time::timeout(deadline, async {
        loop {
            if let Ok(till_core::CoreEvent::AuthInvalidated) = rx.recv().await {
                return;
            }
        }
    })
    .await
    .expect("expected auth invalidation");

    assert!(handle.is_paused());
    assert_eq!(db.get_api_key().unwrap(), None);

    handle.stop().await;
}
