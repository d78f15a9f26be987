use crate::{auth::AuthenticatedUser, errors::ServiceError, ApiResponse, AppState};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

const MAX_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct TrendingQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_days")]
    pub days: i64,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

fn default_days() -> i64 {
    7
}

/// GET /api/v1/recommendations/trending
pub async fn trending(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TrendingQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let results = state
        .services
        .recommendations
        .trending(query.limit.min(MAX_LIMIT), query.days.clamp(1, 30))
        .await?;
    Ok(Json(ApiResponse::ok(results)))
}

/// GET /api/v1/products/:id/frequently-bought-together
pub async fn frequently_bought_together(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let results = state
        .services
        .recommendations
        .frequently_bought_together(product_id, query.limit.min(MAX_LIMIT), &[])
        .await?;
    Ok(Json(ApiResponse::ok(results)))
}

/// GET /api/v1/recommendations/buy-again
pub async fn buy_again(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let results = state
        .services
        .recommendations
        .buy_again(user.user_id, query.limit.min(MAX_LIMIT))
        .await?;
    Ok(Json(ApiResponse::ok(results)))
}

/// GET /api/v1/recommendations/personalized
pub async fn personalized(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let results = state
        .services
        .recommendations
        .personalized(user.user_id, query.limit.min(MAX_LIMIT))
        .await?;
    Ok(Json(ApiResponse::ok(results)))
}
