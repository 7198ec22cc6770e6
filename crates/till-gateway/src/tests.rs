//! Gateway API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use till_core::{CoreConfig, Database};
use tower::ServiceExt;

fn test_state(config: CoreConfig, gateway: GatewayConfig) -> Arc<AppState> {
    let db = Database::in_memory().unwrap();
    build_state(db, config, gateway).unwrap()
}

fn setup_test_app() -> (Arc<AppState>, Router) {
    let state = test_state(CoreConfig::default(), GatewayConfig::default());
    let router = create_router(state.clone());
    (state, router)
}

fn pair_terminal(state: &AppState) {
    state
        .db
        .store_pairing(&till_core::models::PairingInfo {
            terminal_id: "term-1".to_string(),
            tenant_id: "acme".to_string(),
            location_id: "loc-1".to_string(),
            signing_secret: "s3cret".to_string(),
            paired_at: chrono::Utc::now(),
        })
        .unwrap();
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ========== Cache API ==========

#[tokio::test]
async fn test_cache_dataset_requires_version() {
    let (_state, app) = setup_test_app();

    let body = serde_json::json!({"rows": []});
    let response = app
        .oneshot(post_json("/api/cache/products", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert_eq!(json["code"], "DATASET_VERSION_REQUIRED");
}

#[tokio::test]
async fn test_cache_then_read_products() {
    let (_state, app) = setup_test_app();

    let body = serde_json::json!({
        "rows": [{"id": 1, "name": "Cola", "price": 2.5, "barcode": "4001"}],
        "version": "2024-01-01T00:00:00Z",
    });
    let response = app
        .clone()
        .oneshot(post_json("/api/cache/products", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get("/api/catalog/products/barcode/4001"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["name"], "Cola");
}

#[tokio::test]
async fn test_unknown_dataset_key_rejected() {
    let (_state, app) = setup_test_app();

    let body = serde_json::json!({"rows": [], "version": "1"});
    let response = app
        .oneshot(post_json("/api/cache/nonsense", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ========== Order capture ==========

#[tokio::test]
async fn test_record_order_requires_pairing() {
    let (_state, app) = setup_test_app();

    let body = serde_json::json!({"payload": {"total": 5.0}, "payments": []});
    let response = app.oneshot(post_json("/api/orders", &body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = get_body_json(response).await;
    assert_eq!(json["code"], "NOT_PAIRED");
}

#[tokio::test]
async fn test_record_cash_order_reports_change() {
    let (state, app) = setup_test_app();
    pair_terminal(&state);

    let body = serde_json::json!({
        "payload": {"items": [{"price": 10.00}], "tax": 0.85, "total": 10.85},
        "payments": [{"method": "CASH", "amount": 10.85, "cash_tendered": 20.00}],
    });
    let response = app
        .clone()
        .oneshot(post_json("/api/orders", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert!((json["change_due"].as_f64().unwrap() - 9.15).abs() < 1e-9);

    // Exposure reflects the capture
    let response = app.oneshot(get("/api/stats/exposure")).await.unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["transaction_count"], 1);
    assert!((json["cash_total"].as_f64().unwrap() - 10.85).abs() < 1e-9);
}

#[tokio::test]
async fn test_limit_exceeded_writes_nothing() {
    let config = CoreConfig {
        offline_transaction_cap: Some(50.0),
        ..Default::default()
    };
    let state = test_state(config, GatewayConfig::default());
    pair_terminal(&state);
    let app = create_router(state.clone());

    let body = serde_json::json!({
        "payload": {"total": 75.0},
        "payments": [{"method": "CARD_TERMINAL", "amount": 75.0}],
    });
    let response = app
        .clone()
        .oneshot(post_json("/api/orders", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = get_body_json(response).await;
    assert_eq!(json["code"], "LIMIT_EXCEEDED");

    // No order, no operation, no counters
    assert!(state.db.list_offline_orders(None).unwrap().is_empty());
    assert_eq!(state.db.exposure().unwrap().transaction_count, 0);
}

#[tokio::test]
async fn test_check_limit_probe() {
    let config = CoreConfig {
        offline_transaction_cap: Some(50.0),
        ..Default::default()
    };
    let state = test_state(config, GatewayConfig::default());
    let app = create_router(state);

    let body = serde_json::json!({"method": "CARD_TERMINAL", "amount": 75.0});
    let response = app
        .oneshot(post_json("/api/limits/check", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["allowed"], false);
}

// ========== Pairing ==========

#[tokio::test]
async fn test_pairing_lifecycle() {
    let (_state, app) = setup_test_app();

    let response = app.clone().oneshot(get("/api/pairing/paired")).await.unwrap();
    assert_eq!(get_body_json(response).await["paired"], false);

    let body = serde_json::json!({
        "terminal_id": "term-9",
        "tenant_id": "acme",
        "location_id": "loc-2",
        "signing_secret": "opaque-bytes",
    });
    let response = app
        .clone()
        .oneshot(post_json("/api/pairing", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The view never exposes the signing secret
    let response = app.clone().oneshot(get("/api/pairing")).await.unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["terminal_id"], "term-9");
    assert!(json.get("signing_secret").is_none());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/pairing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/api/pairing/paired")).await.unwrap();
    assert_eq!(get_body_json(response).await["paired"], false);
}

// ========== Stats ==========

#[tokio::test]
async fn test_complete_stats_shape() {
    let (_state, app) = setup_test_app();

    let response = app.oneshot(get("/api/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert!(json.get("queue").is_some());
    assert!(json.get("network").is_some());
    assert!(json.get("sync").is_some());
    assert!(json.get("exposure").is_some());
    assert_eq!(json["paired"], false);
}

// ========== Auth ==========

#[tokio::test]
async fn test_gateway_token_required_when_configured() {
    let state = test_state(
        CoreConfig::default(),
        GatewayConfig {
            auth_token: Some("gw-token".to_string()),
        },
    );
    let app = create_router(state);

    let response = app.clone().oneshot(get("/api/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/stats")
                .header("authorization", "Bearer gw-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ========== Reconciliation tooling ==========

#[tokio::test]
async fn test_force_status_only_allows_terminal_states() {
    let (state, app) = setup_test_app();
    pair_terminal(&state);

    let enqueued = state
        .db
        .record_order(serde_json::json!({"total": 1.0}), &[])
        .unwrap();

    let uri = format!("/api/queue/operations/{}/status", enqueued.operation_id);
    let response = app
        .clone()
        .oneshot(post_json(&uri, &serde_json::json!({"status": "SENDING"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(&uri, &serde_json::json!({"status": "FAILED"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
