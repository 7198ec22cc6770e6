//! Test utilities for till-core
//!
//! This module provides testing infrastructure including a mock backend
//! server that speaks the sync API: health, identity, dataset pulls, and
//! operation submits with scriptable outcomes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::oneshot;

/// One operation the mock backend received
#[derive(Debug, Clone)]
pub struct ReceivedOperation {
    pub path: String,
    pub idempotency_key: String,
    pub signature: String,
    pub body: serde_json::Value,
}

/// Scriptable behavior and captured traffic
#[derive(Debug, Default)]
pub struct MockState {
    /// Pages served per dataset key; missing keys serve an empty page.
    pub dataset_pages: HashMap<String, serde_json::Value>,
    /// Every pull that arrived: (key, modified_since).
    pub pull_requests: Vec<(String, Option<String>)>,
    /// Every operation submit that arrived.
    pub operations: Vec<ReceivedOperation>,
    /// When set, the next order submit answers 409 with this reason.
    pub conflict_reason: Option<String>,
    /// When set, the next submit answers this status with an error body.
    pub fail_status: Option<u16>,
    /// Serve 503 this many times before accepting (retry testing).
    pub retryable_failures_remaining: u32,
    /// When true, identity and authorized calls answer 401.
    pub reject_auth: bool,
    order_counter: u32,
}

/// Mock backend server for integration tests
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockBackend {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(MockState::default()));

        let app = Router::new()
            .route("/health", get(handle_health))
            .route("/api/pos/identity", get(handle_identity))
            .route("/api/pos/datasets/:key", get(handle_dataset))
            .route("/api/pos/operations/:kind", post(handle_operation))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Shared handle onto the scriptable state
    pub fn state(&self) -> Arc<Mutex<MockState>> {
        self.state.clone()
    }

    /// Serve `rows` for one dataset with the given version marker.
    pub fn set_dataset(&self, key: &str, rows: serde_json::Value, version: &str) {
        let mut state = self.state.lock().unwrap();
        state.dataset_pages.insert(
            key.to_string(),
            serde_json::json!({"rows": rows, "deleted_ids": [], "version": version}),
        );
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_health() -> StatusCode {
    StatusCode::OK
}

async fn handle_identity(State(state): State<Arc<Mutex<MockState>>>) -> impl IntoResponse {
    if state.lock().unwrap().reject_auth {
        (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "invalid key"})))
    } else {
        (
            StatusCode::OK,
            Json(serde_json::json!({"terminal": "mock", "tenant": "mock"})),
        )
    }
}

async fn handle_dataset(
    State(state): State<Arc<Mutex<MockState>>>,
    Path(key): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    if state.reject_auth {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid key"})),
        );
    }

    state
        .pull_requests
        .push((key.clone(), params.get("modified_since").cloned()));

    let page = state
        .dataset_pages
        .get(&key)
        .cloned()
        .unwrap_or_else(|| serde_json::json!({"rows": [], "deleted_ids": [], "version": ""}));
    (StatusCode::OK, Json(page))
}

async fn handle_operation(
    State(state): State<Arc<Mutex<MockState>>>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();

    if state.reject_auth {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid key"})),
        );
    }

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    state.operations.push(ReceivedOperation {
        path: kind.clone(),
        idempotency_key: header("idempotency-key"),
        signature: header("x-terminal-signature"),
        body,
    });

    if state.retryable_failures_remaining > 0 {
        state.retryable_failures_remaining -= 1;
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "try later"})),
        );
    }

    if let Some(status) = state.fail_status.take() {
        return (
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
            Json(serde_json::json!({"error": "rejected"})),
        );
    }

    if kind == "orders" {
        if let Some(reason) = state.conflict_reason.take() {
            return (
                StatusCode::CONFLICT,
                Json(serde_json::json!({"reason": reason})),
            );
        }
        state.order_counter += 1;
        let number = format!("A-{:03}", state.order_counter);
        return (
            StatusCode::OK,
            Json(serde_json::json!({
                "order_id": format!("srv-{}", state.order_counter),
                "order_number": number,
            })),
        );
    }

    (StatusCode::OK, Json(serde_json::json!({"accepted": true})))
}
