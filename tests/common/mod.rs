#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, Utc};
use grocerly_api::{
    config::AppConfig,
    db::{establish_connection_with_config, run_migrations, DbConfig},
    entities::{
        coupon, order,
        order::OrderStatus,
        product, product_variant,
    },
    events::{process_events, EventSender},
    services::orders::OrderLineInput,
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "integration_test_secret_key_0123456789abcdef";

/// Application wired against a fresh in-memory SQLite database.
///
/// The pool is capped at one connection so the in-memory database is shared
/// and concurrent write transactions serialize, mirroring the row-lock
/// serialization Postgres provides in production.
pub struct TestApp {
    pub state: Arc<AppState>,
}

pub async fn spawn_app() -> TestApp {
    let db_config = DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    };
    let db = establish_connection_with_config(&db_config)
        .await
        .expect("failed to open in-memory database");
    run_migrations(&db).await.expect("migrations failed");

    let config = AppConfig::new(
        "sqlite::memory:".to_string(),
        TEST_JWT_SECRET.to_string(),
        "127.0.0.1".to_string(),
        0,
    );

    let (event_tx, event_rx) = mpsc::channel(256);
    tokio::spawn(process_events(event_rx));

    TestApp {
        state: Arc::new(AppState::new(db, config, EventSender::new(event_tx))),
    }
}

pub async fn seed_product(
    app: &TestApp,
    name: &str,
    price: Decimal,
    stock_quantity: i32,
) -> product::Model {
    seed_product_in_category(app, name, price, stock_quantity, None).await
}

pub async fn seed_product_in_category(
    app: &TestApp,
    name: &str,
    price: Decimal,
    stock_quantity: i32,
    category_id: Option<Uuid>,
) -> product::Model {
    let now = Utc::now();
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        price: Set(price),
        mrp: Set(price),
        stock_quantity: Set(stock_quantity),
        is_active: Set(true),
        unit: Set("pc".to_string()),
        category_id: Set(category_id),
        discount_percent: Set(Decimal::ZERO),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed product")
}

pub async fn seed_variant(
    app: &TestApp,
    product_id: Uuid,
    name: &str,
    price: Decimal,
) -> product_variant::Model {
    product_variant::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        name: Set(name.to_string()),
        price: Set(price),
        mrp: Set(price),
        is_default: Set(false),
        created_at: Set(Utc::now()),
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed variant")
}

pub async fn seed_coupon(app: &TestApp, code: &str, discount_amount: Decimal) -> coupon::Model {
    coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_string()),
        discount_amount: Set(discount_amount),
        is_active: Set(true),
        expires_at: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed coupon")
}

pub fn line(product_id: Uuid, quantity: i32) -> OrderLineInput {
    OrderLineInput {
        product_id,
        variant_id: None,
        quantity,
    }
}

pub fn variant_line(product_id: Uuid, variant_id: Uuid, quantity: i32) -> OrderLineInput {
    OrderLineInput {
        product_id,
        variant_id: Some(variant_id),
        quantity,
    }
}

/// Walks an order through the full state machine to delivered.
pub async fn deliver_order(app: &TestApp, order_id: Uuid) {
    for status in [
        OrderStatus::Confirmed,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
    ] {
        app.state
            .services
            .orders
            .update_status(order_id, status)
            .await
            .expect("status transition failed");
    }
}

/// Rewrites an order's updated_at so it reads as delivered `days_ago` days
/// in the past. Recency-sensitive scoring keys off this timestamp.
pub async fn backdate_order(app: &TestApp, order_id: Uuid, days_ago: i64) {
    use sea_orm::EntityTrait;

    let existing = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .expect("order lookup failed")
        .expect("order missing");
    let mut active: order::ActiveModel = existing.into();
    active.updated_at = Set(Utc::now() - ChronoDuration::days(days_ago));
    active.update(&*app.state.db).await.expect("backdate failed");
}
