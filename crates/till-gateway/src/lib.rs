//! Till Gateway
//!
//! Axum-based request/response surface the UI process uses to reach the
//! offline core: enqueue orders and payments, read cached datasets, inspect
//! queue/network/sync/exposure state, manage pairing, and run maintenance.
//! Listens on loopback; an optional bearer token guards the surface when
//! the UI runs in a separate sandbox.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use till_core::{
    spawn_engine, spawn_monitor, CoreConfig, Database, Error as CoreError, EventBus,
    ExposureGuard, MonitorHandle, SyncHandle,
};

mod handlers;
mod scheduler;

pub use scheduler::{start_maintenance_scheduler, MaintenanceConfig};

/// Gateway configuration
#[derive(Clone, Default)]
pub struct GatewayConfig {
    /// Bearer token required on every request; None disables auth for
    /// same-user loopback deployments.
    pub auth_token: Option<String>,
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub config: CoreConfig,
    pub gateway: GatewayConfig,
    pub guard: ExposureGuard,
    pub events: EventBus,
    pub sync: SyncHandle,
    pub monitor: MonitorHandle,
}

/// Authentication middleware: constant-time bearer token check.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.gateway.auth_token.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "));

    if provided.is_some_and(|token| token_matches(token, expected)) {
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Unauthorized gateway request");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "Authentication required", "code": "UNAUTHORIZED"})),
    )
        .into_response()
}

/// Compare tokens without leaking length or prefix timing.
fn token_matches(provided: &str, expected: &str) -> bool {
    use subtle::ConstantTimeEq;
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    provided.len() == expected.len() && bool::from(provided.ct_eq(expected))
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Reference cache writes
        .route("/cache/:key", post(handlers::cache_dataset))
        .route("/cache/:key/delete", post(handlers::delete_records))
        // Cached reads
        .route("/catalog/products", get(handlers::list_products))
        .route("/catalog/products/:id", get(handlers::get_product))
        .route(
            "/catalog/products/barcode/:code",
            get(handlers::get_product_by_barcode),
        )
        .route("/catalog/categories", get(handlers::list_categories))
        .route("/catalog/modifier-sets", get(handlers::list_modifier_sets))
        .route("/catalog/discounts", get(handlers::list_discounts))
        .route("/catalog/taxes", get(handlers::list_taxes))
        .route("/catalog/product-types", get(handlers::list_product_types))
        .route(
            "/catalog/inventory/locations",
            get(handlers::list_inventory_locations),
        )
        .route(
            "/catalog/inventory/stocks",
            get(handlers::list_inventory_stocks),
        )
        .route("/catalog/users", get(handlers::list_users))
        .route("/catalog/settings", get(handlers::get_settings))
        // Staff PIN verification (offline login path)
        .route("/auth/verify-pin", post(handlers::verify_pin))
        // Outbound queue
        .route(
            "/queue/operations",
            get(handlers::list_operations).post(handlers::queue_operation),
        )
        .route("/queue/operations/:id", get(handlers::get_operation))
        .route(
            "/queue/operations/:id/status",
            post(handlers::force_operation_status),
        )
        .route(
            "/orders",
            get(handlers::list_offline_orders).post(handlers::record_order),
        )
        .route("/orders/:id", get(handlers::get_offline_order))
        .route(
            "/orders/:id/payments",
            get(handlers::list_order_payments).post(handlers::record_payment),
        )
        .route(
            "/approvals",
            get(handlers::list_approvals).post(handlers::record_approval),
        )
        // Stats and limits
        .route("/stats/queue", get(handlers::queue_stats))
        .route("/stats/network", get(handlers::network_status))
        .route("/stats/sync", get(handlers::sync_status))
        .route("/stats/exposure", get(handlers::exposure))
        .route("/stats", get(handlers::complete_stats))
        .route("/limits/check", post(handlers::check_limit))
        // Pairing
        .route(
            "/pairing",
            get(handlers::get_pairing)
                .post(handlers::store_pairing)
                .delete(handlers::clear_pairing),
        )
        .route("/pairing/paired", get(handlers::is_paired))
        // Sync control
        .route("/sync/force", post(handlers::force_sync))
        // Maintenance
        .route(
            "/admin/backups",
            get(handlers::list_backups).post(handlers::create_backup),
        )
        .route(
            "/admin/backups/:name/restore",
            post(handlers::restore_backup),
        )
        .route("/admin/backups/:name", delete(handlers::delete_backup))
        .route("/admin/vacuum", post(handlers::vacuum))
        .route("/admin/clear-cache", post(handlers::clear_cache))
        .route("/admin/exposure/reset", post(handlers::reset_exposure));

    Router::new()
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Build the full application state, spawning the monitor and the sync
/// engine.
pub fn build_state(
    db: Database,
    config: CoreConfig,
    gateway: GatewayConfig,
) -> anyhow::Result<Arc<AppState>> {
    let events = EventBus::new();
    let guard = ExposureGuard::new(db.clone(), &config);
    let monitor = spawn_monitor(db.clone(), &config, events.clone());
    let sync = spawn_engine(db.clone(), config.clone(), events.clone())?;

    Ok(Arc::new(AppState {
        db,
        config,
        gateway,
        guard,
        events,
        sync,
        monitor,
    }))
}

/// Start the gateway server
pub async fn serve(
    db: Database,
    config: CoreConfig,
    gateway: GatewayConfig,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    let state = build_state(db, config.clone(), gateway)?;

    start_maintenance_scheduler(
        state.db.clone(),
        MaintenanceConfig::from_core_config(&config),
    );

    let app = create_router(state.clone());
    let addr = format!("{}:{}", host, port);
    info!("Gateway listening at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    Ok(())
}

/// Wait for ctrl-c, then give in-flight work a bounded grace period.
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutting down: stopping monitor and sync engine");

    let grace = std::time::Duration::from_millis(state.config.shutdown_grace_ms);
    let _ = tokio::time::timeout(grace, async {
        state.monitor.stop().await;
        state.sync.stop().await;
    })
    .await;
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type carrying an HTTP status and a stable code
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_DATA",
            message: msg.to_string(),
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: msg.to_string(),
        }
    }

    pub fn internal(msg: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL",
            message: msg.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, "Gateway error: {}", self.message);
        }
        let body = Json(serde_json::json!({
            "error": self.message,
            "code": self.code,
        }));
        (self.status, body).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidData(_) | CoreError::DatasetVersionRequired(_) => {
                StatusCode::BAD_REQUEST
            }
            CoreError::LimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::NotPaired(_) | CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::AuthInvalid => StatusCode::UNAUTHORIZED,
            CoreError::NotInitialized(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL",
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests;
