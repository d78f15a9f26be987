pub mod carts;
pub mod orders;
pub mod products;
pub mod recommendations;

use crate::AppState;
use axum::{
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

/// Assembles the full REST surface over the service layer.
pub fn routes(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // Orders
        .route("/orders", post(orders::place_order).get(orders::list_orders))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/status", post(orders::update_status))
        // Cart
        .route(
            "/cart",
            get(carts::get_cart).delete(carts::clear_cart),
        )
        .route("/cart/items", post(carts::add_item))
        .route(
            "/cart/items/:id",
            put(carts::update_item).delete(carts::remove_item),
        )
        .route("/cart/stock", get(carts::check_stock))
        // Catalog
        .route(
            "/products",
            get(products::list_products).post(products::create_product),
        )
        .route(
            "/products/:id",
            get(products::get_product).delete(products::deactivate_product),
        )
        .route("/products/:id/stock", post(products::adjust_stock))
        .route("/products/:id/variants", post(products::add_variant))
        .route("/products/:id/view", post(products::record_view))
        .route(
            "/products/:id/frequently-bought-together",
            get(recommendations::frequently_bought_together),
        )
        // Recommendations
        .route("/recommendations/trending", get(recommendations::trending))
        .route("/recommendations/buy-again", get(recommendations::buy_again))
        .route(
            "/recommendations/personalized",
            get(recommendations::personalized),
        );

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
