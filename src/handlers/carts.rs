use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    services::stock_monitor::WatchedLine,
    ApiResponse, AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

/// GET /api/v1/cart
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.get_cart(user.user_id).await?;
    Ok(Json(ApiResponse::ok(cart)))
}

/// POST /api/v1/cart/items
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(request): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let line = state
        .services
        .carts
        .add_item(
            user.user_id,
            request.product_id,
            request.variant_id,
            request.quantity,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(line))))
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: i32,
}

/// PUT /api/v1/cart/items/:id
///
/// A quantity of zero or less removes the line.
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
    Json(request): Json<UpdateItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let updated = state
        .services
        .carts
        .update_quantity(user.user_id, item_id, request.quantity)
        .await?;
    match updated {
        Some(line) => Ok(Json(ApiResponse::ok(line)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// DELETE /api/v1/cart/items/:id
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .carts
        .remove_item(user.user_id, item_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/cart
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let removed = state.services.carts.clear_cart(user.user_id).await?;
    Ok(Json(json!({ "success": true, "removed": removed })))
}

/// GET /api/v1/cart/stock
///
/// One-shot conflict check for the user's current cart, the polling
/// counterpart of the push-based monitor.
pub async fn check_stock(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.get_cart(user.user_id).await?;
    let lines: Vec<WatchedLine> = cart
        .iter()
        .map(|l| WatchedLine {
            product_id: l.product_id,
            quantity: l.quantity,
        })
        .collect();
    let statuses = state.services.stock_monitor.check_lines(&lines).await?;
    let has_conflicts = statuses.iter().any(|s| s.conflict.is_some());
    Ok(Json(json!({
        "success": true,
        "has_conflicts": has_conflicts,
        "lines": statuses,
    })))
}
