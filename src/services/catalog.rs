use crate::{
    entities::{product, product_variant, Product, ProductVariant},
    errors::ServiceError,
    events::{Event, EventSender, StockFeed, StockUpdate},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Product and variant catalog. Stock here is only mutated through
/// `adjust_stock`, the administrative counterpart of the locked decrement in
/// order placement; both publish to the StockFeed after commit.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    stock_feed: StockFeed,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub price: Decimal,
    pub mrp: Decimal,
    #[validate(range(min = 0))]
    pub stock_quantity: i32,
    #[validate(length(min = 1, max = 32))]
    pub unit: String,
    pub category_id: Option<Uuid>,
    pub discount_percent: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateVariantInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub price: Decimal,
    pub mrp: Decimal,
    #[serde(default)]
    pub is_default: bool,
}

impl CatalogService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        stock_feed: StockFeed,
    ) -> Self {
        Self {
            db,
            event_sender,
            stock_feed,
        }
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        if input.price < Decimal::ZERO || input.mrp < Decimal::ZERO {
            return Err(ServiceError::InvalidInput(
                "price and mrp must be non-negative".to_string(),
            ));
        }

        let now = Utc::now();
        let created = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            price: Set(input.price),
            mrp: Set(input.mrp),
            stock_quantity: Set(input.stock_quantity),
            is_active: Set(true),
            unit: Set(input.unit),
            category_id: Set(input.category_id),
            discount_percent: Set(input.discount_percent.unwrap_or(Decimal::ZERO)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        self.event_sender
            .send_or_log(Event::ProductCreated(created.id))
            .await;
        Ok(created)
    }

    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductWithVariants, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let variants = ProductVariant::find()
            .filter(product_variant::Column::ProductId.eq(product_id))
            .order_by_desc(product_variant::Column::IsDefault)
            .order_by_asc(product_variant::Column::Name)
            .all(&*self.db)
            .await?;

        Ok(ProductWithVariants { product, variants })
    }

    /// Lists active products, newest first.
    pub async fn list_products(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let paginator = Product::find()
            .filter(product::Column::IsActive.eq(true))
            .order_by_desc(product::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((data, total))
    }

    /// Administrative stock adjustment by delta. Rejects adjustments that
    /// would take stock negative; publishes the committed quantity on the
    /// StockFeed so active monitors see it.
    #[instrument(skip(self))]
    pub async fn adjust_stock(
        &self,
        product_id: Uuid,
        delta: i32,
    ) -> Result<product::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let product = Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let old_quantity = product.stock_quantity;
        let new_quantity = old_quantity + delta;
        if new_quantity < 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "stock for {} cannot go below zero (current {}, delta {})",
                product.name, old_quantity, delta
            )));
        }

        let now = Utc::now();
        let mut active: product::ActiveModel = product.into();
        active.stock_quantity = Set(new_quantity);
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::StockAdjusted {
                product_id,
                old_quantity,
                new_quantity,
            })
            .await;
        self.stock_feed.publish(StockUpdate {
            product_id,
            stock_quantity: updated.stock_quantity,
            is_active: updated.is_active,
            at: now,
        });

        info!(%product_id, old_quantity, new_quantity, "stock adjusted");
        Ok(updated)
    }

    /// Adds a variant. Marking it default demotes any existing default in the
    /// same transaction, so at most one default per product holds.
    #[instrument(skip(self, input), fields(%product_id))]
    pub async fn add_variant(
        &self,
        product_id: Uuid,
        input: CreateVariantInput,
    ) -> Result<product_variant::Model, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if input.is_default {
            let defaults = ProductVariant::find()
                .filter(product_variant::Column::ProductId.eq(product_id))
                .filter(product_variant::Column::IsDefault.eq(true))
                .all(&txn)
                .await?;
            for existing in defaults {
                let mut active: product_variant::ActiveModel = existing.into();
                active.is_default = Set(false);
                active.update(&txn).await?;
            }
        }

        let created = product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            name: Set(input.name),
            price: Set(input.price),
            mrp: Set(input.mrp),
            is_default: Set(input.is_default),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(created)
    }

    /// Deactivates a product. Existing orders keep their snapshots; carts and
    /// monitors learn through the feed that the product is gone.
    #[instrument(skip(self))]
    pub async fn deactivate_product(
        &self,
        product_id: Uuid,
    ) -> Result<product::Model, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let now = Utc::now();
        let mut active: product::ActiveModel = product.into();
        active.is_active = Set(false);
        active.updated_at = Set(now);
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::ProductUpdated(product_id))
            .await;
        self.stock_feed.publish(StockUpdate {
            product_id,
            stock_quantity: updated.stock_quantity,
            is_active: false,
            at: now,
        });

        Ok(updated)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ProductWithVariants {
    pub product: product::Model,
    pub variants: Vec<product_variant::Model>,
}
