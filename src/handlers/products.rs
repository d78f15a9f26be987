use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    services::catalog::{CreateProductInput, CreateVariantInput},
    ApiResponse, AppState, ListQuery,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// GET /api/v1/products
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let (products, total) = state
        .services
        .catalog
        .list_products(query.page, query.per_page)
        .await?;
    Ok(Json(json!({
        "success": true,
        "data": products,
        "total": total,
        "page": query.page,
        "per_page": query.per_page,
    })))
}

/// GET /api/v1/products/:id
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.catalog.get_product(product_id).await?;
    Ok(Json(ApiResponse::ok(product)))
}

/// POST /api/v1/products (admin)
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(input): Json<CreateProductInput>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;
    let created = state.services.catalog.create_product(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(created))))
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i32,
}

/// POST /api/v1/products/:id/stock (admin)
pub async fn adjust_stock(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(product_id): Path<Uuid>,
    Json(request): Json<AdjustStockRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;
    let updated = state
        .services
        .catalog
        .adjust_stock(product_id, request.delta)
        .await?;
    Ok(Json(ApiResponse::ok(updated)))
}

/// POST /api/v1/products/:id/variants (admin)
pub async fn add_variant(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(product_id): Path<Uuid>,
    Json(input): Json<CreateVariantInput>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;
    let created = state
        .services
        .catalog
        .add_variant(product_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(created))))
}

/// DELETE /api/v1/products/:id (admin)
pub async fn deactivate_product(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;
    let updated = state.services.catalog.deactivate_product(product_id).await?;
    Ok(Json(ApiResponse::ok(updated)))
}

/// POST /api/v1/products/:id/view
///
/// Fire-and-forget view tracking: the handler answers immediately and the
/// write happens in a spawned task.
pub async fn record_view(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(product_id): Path<Uuid>,
) -> impl IntoResponse {
    let recommendations = state.services.recommendations.clone();
    let user_id = user.user_id;
    tokio::spawn(async move {
        if let Err(e) = recommendations.record_view(user_id, product_id).await {
            error!(%user_id, %product_id, error = %e, "view tracking failed");
        }
    });
    StatusCode::ACCEPTED
}
