use crate::{
    entities::{cart_item, product_variant, CartItem, Product, ProductVariant},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Server-side cart. One cart per user; every operation is scoped to the
/// authenticated user id, so a principal can never read or mutate another
/// user's lines.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

/// Cart line joined with live catalog data for display. `price` is the live
/// price; the order snapshot is taken at placement time.
#[derive(Debug, Serialize)]
pub struct CartLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub product_name: String,
    pub variant_name: Option<String>,
    pub unit: String,
    pub quantity: i32,
    pub price: Decimal,
    pub stock_quantity: i32,
    pub is_active: bool,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    fn line_filter(user_id: Uuid, product_id: Uuid, variant_id: Option<Uuid>) -> Condition {
        let variant_cond = match variant_id {
            Some(v) => cart_item::Column::VariantId.eq(v),
            None => cart_item::Column::VariantId.is_null(),
        };
        Condition::all()
            .add(cart_item::Column::UserId.eq(user_id))
            .add(cart_item::Column::ProductId.eq(product_id))
            .add(variant_cond)
    }

    /// Adds a product to the cart, merging into an existing line for the same
    /// (product, variant) key.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::InvalidInput(
                "quantity must be at least 1".to_string(),
            ));
        }

        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        if !product.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "{} is no longer available",
                product.name
            )));
        }

        if let Some(vid) = variant_id {
            ProductVariant::find()
                .filter(product_variant::Column::Id.eq(vid))
                .filter(product_variant::Column::ProductId.eq(product_id))
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", vid)))?;
        }

        let now = Utc::now();
        let existing = CartItem::find()
            .filter(Self::line_filter(user_id, product_id, variant_id))
            .one(&*self.db)
            .await?;

        let saved = match existing {
            Some(line) => {
                let new_quantity = line.quantity + quantity;
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(new_quantity);
                active.updated_at = Set(now);
                active.update(&*self.db).await?
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    product_id: Set(product_id),
                    variant_id: Set(variant_id),
                    quantity: Set(quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await?
            }
        };

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                user_id,
                product_id,
            })
            .await;

        Ok(saved)
    }

    /// Sets a line's quantity. A quantity of zero or less removes the line.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        let line = CartItem::find_by_id(item_id)
            .filter(cart_item::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        if quantity <= 0 {
            let product_id = line.product_id;
            line.delete(&*self.db).await?;
            self.event_sender
                .send_or_log(Event::CartItemRemoved {
                    user_id,
                    product_id,
                })
                .await;
            return Ok(None);
        }

        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        Ok(Some(active.update(&*self.db).await?))
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<(), ServiceError> {
        let line = CartItem::find_by_id(item_id)
            .filter(cart_item::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        let product_id = line.product_id;
        line.delete(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                user_id,
                product_id,
            })
            .await;
        Ok(())
    }

    /// Returns the user's cart joined with live product and variant data.
    pub async fn get_cart(&self, user_id: Uuid) -> Result<Vec<CartLine>, ServiceError> {
        let lines = CartItem::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .find_also_related(Product)
            .all(&*self.db)
            .await?;

        let mut cart = Vec::with_capacity(lines.len());
        for (line, product) in lines {
            let product = product.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "cart line {} references missing product",
                    line.id
                ))
            })?;

            let variant = match line.variant_id {
                Some(vid) => ProductVariant::find_by_id(vid).one(&*self.db).await?,
                None => None,
            };

            let price = variant.as_ref().map(|v| v.price).unwrap_or(product.price);
            cart.push(CartLine {
                id: line.id,
                product_id: line.product_id,
                variant_id: line.variant_id,
                product_name: product.name,
                variant_name: variant.map(|v| v.name),
                unit: product.unit,
                quantity: line.quantity,
                price,
                stock_quantity: product.stock_quantity,
                is_active: product.is_active,
            });
        }

        Ok(cart)
    }

    #[instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let result = CartItem::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;

        self.event_sender
            .send_or_log(Event::CartCleared(user_id))
            .await;
        Ok(result.rows_affected)
    }
}
