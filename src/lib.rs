pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use crate::{
    cache::InMemoryCache,
    config::AppConfig,
    events::{EventSender, StockFeed},
    services::{
        carts::CartService,
        catalog::CatalogService,
        orders::OrderService,
        recommendations::{RecommendationConfig, RecommendationService},
        stock_monitor::StockMonitor,
    },
};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Service registry built once at startup and shared via AppState.
#[derive(Clone)]
pub struct AppServices {
    pub orders: OrderService,
    pub carts: CartService,
    pub catalog: CatalogService,
    pub recommendations: RecommendationService,
    pub stock_monitor: StockMonitor,
}

/// Shared application state handed to every handler.
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub event_sender: Arc<EventSender>,
    pub stock_feed: StockFeed,
    pub services: AppServices,
}

impl AppState {
    pub fn new(
        db: DatabaseConnection,
        config: AppConfig,
        event_sender: EventSender,
    ) -> Self {
        let db = Arc::new(db);
        let event_sender = Arc::new(event_sender);
        let stock_feed = StockFeed::default();

        let recommendation_config = RecommendationConfig {
            trending_cache_ttl: Duration::from_secs(config.trending_cache_ttl_secs),
            min_trending_samples: config.min_trending_samples,
            min_related_results: config.min_related_results,
        };

        let services = AppServices {
            orders: OrderService::new(
                Arc::clone(&db),
                Arc::clone(&event_sender),
                stock_feed.clone(),
            ),
            carts: CartService::new(Arc::clone(&db), Arc::clone(&event_sender)),
            catalog: CatalogService::new(
                Arc::clone(&db),
                Arc::clone(&event_sender),
                stock_feed.clone(),
            ),
            recommendations: RecommendationService::new(
                Arc::clone(&db),
                InMemoryCache::new(),
                Arc::clone(&event_sender),
                recommendation_config,
            ),
            stock_monitor: StockMonitor::new(
                Arc::clone(&db),
                stock_feed.clone(),
                Duration::from_millis(config.stock_debounce_ms),
            ),
        };

        Self {
            db,
            config,
            event_sender,
            stock_feed,
            services,
        }
    }
}

/// Standard success envelope for API responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Pagination query parameters shared by list endpoints.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}
