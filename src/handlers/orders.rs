use crate::{
    auth::AuthenticatedUser,
    entities::order::OrderStatus,
    errors::ServiceError,
    services::orders::{OrderLineInput, PlaceOrderInput},
    ApiResponse, AppState, ListQuery,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub delivery_address: String,
    pub cart_items: Vec<OrderLineInput>,
    pub coupon_id: Option<Uuid>,
    pub coupon_discount: Option<Decimal>,
}

/// POST /api/v1/orders
///
/// Placement failures return a structured body so the client can repair its
/// local cart view: `{ success, error, product_id?, available? }`.
pub async fn place_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(request): Json<PlaceOrderRequest>,
) -> Response {
    let input = PlaceOrderInput {
        user_id: user.user_id,
        delivery_address: request.delivery_address,
        cart_items: request.cart_items,
        coupon_id: request.coupon_id,
        coupon_discount: request.coupon_discount,
    };

    match state.services.orders.place_order(input).await {
        Ok(placed) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "order_id": placed.order_id,
                "total": placed.total,
            })),
        )
            .into_response(),
        Err(err) => {
            let mut body = json!({
                "success": false,
                "error": err.response_message(),
            });
            if let Some(product_id) = err.product_id() {
                body["product_id"] = json!(product_id);
            }
            if let Some(available) = err.available() {
                body["available"] = json!(available);
            }
            (err.status_code(), Json(body)).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

/// POST /api/v1/orders/:id/status (admin)
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;
    let order = state
        .services
        .orders
        .update_status(order_id, request.status)
        .await?;
    Ok(Json(ApiResponse::ok(order)))
}

/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(user.user_id, order_id)
        .await?;
    Ok(Json(ApiResponse::ok(order)))
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders(user.user_id, query.page, query.per_page)
        .await?;
    Ok(Json(json!({
        "success": true,
        "data": orders,
        "total": total,
        "page": query.page,
        "per_page": query.per_page,
    })))
}
