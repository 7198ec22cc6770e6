//! Cached-read handlers for the UI sell screen

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use till_core::models::{
    Category, Discount, InventoryLocation, InventoryStock, ModifierSet, Product, ProductType,
    StoreSettings, Tax,
};

use crate::{AppError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct ProductFilter {
    pub category_id: Option<i64>,
    #[serde(default)]
    pub active_only: bool,
}

pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ProductFilter>,
) -> Result<Json<Vec<Product>>, AppError> {
    Ok(Json(
        state
            .db
            .list_products(filter.category_id, filter.active_only)?,
    ))
}

pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Product>, AppError> {
    state
        .db
        .get_product(id)?
        .map(Json)
        .ok_or_else(|| AppError::not_found(&format!("product {}", id)))
}

pub async fn get_product_by_barcode(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<Product>, AppError> {
    state
        .db
        .get_product_by_barcode(&code)?
        .map(Json)
        .ok_or_else(|| AppError::not_found(&format!("barcode {}", code)))
}

pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Category>>, AppError> {
    Ok(Json(state.db.list_categories()?))
}

pub async fn list_modifier_sets(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ModifierSet>>, AppError> {
    Ok(Json(state.db.list_modifier_sets()?))
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscountFilter {
    #[serde(default)]
    pub active_only: bool,
}

pub async fn list_discounts(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<DiscountFilter>,
) -> Result<Json<Vec<Discount>>, AppError> {
    Ok(Json(state.db.list_discounts(filter.active_only)?))
}

pub async fn list_taxes(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Tax>>, AppError> {
    Ok(Json(state.db.list_taxes()?))
}

pub async fn list_product_types(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ProductType>>, AppError> {
    Ok(Json(state.db.list_product_types()?))
}

pub async fn list_inventory_locations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<InventoryLocation>>, AppError> {
    Ok(Json(state.db.list_inventory_locations()?))
}

#[derive(Debug, Default, Deserialize)]
pub struct StockFilter {
    pub location_id: Option<i64>,
}

pub async fn list_inventory_stocks(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<StockFilter>,
) -> Result<Json<Vec<InventoryStock>>, AppError> {
    Ok(Json(state.db.list_inventory_stocks(filter.location_id)?))
}

/// Staff user without the PIN hash; credentials never cross the gateway.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub is_active: bool,
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserView>>, AppError> {
    let users = state
        .db
        .list_users(true)?
        .into_iter()
        .map(|u| UserView {
            id: u.id,
            username: u.username,
            display_name: u.display_name,
            role: u.role,
            is_active: u.is_active,
        })
        .collect();
    Ok(Json(users))
}

pub async fn get_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Option<StoreSettings>>, AppError> {
    Ok(Json(state.db.store_settings()?))
}

#[derive(Debug, Deserialize)]
pub struct VerifyPinRequest {
    pub username: String,
    pub pin: String,
}

/// Offline login path: verify a staff PIN against the cached hash.
pub async fn verify_pin(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyPinRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    match state.db.verify_user_pin(&req.username, &req.pin)? {
        Some(user) => Ok(Json(serde_json::json!({
            "verified": true,
            "user": UserView {
                id: user.id,
                username: user.username,
                display_name: user.display_name,
                role: user.role,
                is_active: user.is_active,
            },
        }))),
        None => Ok(Json(serde_json::json!({"verified": false}))),
    }
}
