use crate::{
    entities::{
        cart_item,
        coupon_usage,
        order::{self, OrderStatus},
        order_item, product, product_variant, CartItem, Coupon, Order, OrderItem, Product,
        ProductVariant,
    },
    errors::ServiceError,
    events::{Event, EventSender, StockFeed, StockUpdate},
    services::co_purchase,
};
use axum::http::StatusCode;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr,
    EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Order placement engine and status state machine.
///
/// `place_order` is the only code path that decrements product stock; it runs
/// as a single all-or-nothing transaction with exclusive row locks so
/// concurrent checkouts against the same product serialize instead of
/// overselling.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    stock_feed: StockFeed,
}

/// One line of the checkout payload. Note the absence of a price field: the
/// server re-reads prices under lock, so a tampered client cannot influence
/// the total.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderLineInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderInput {
    pub user_id: Uuid,
    pub delivery_address: String,
    pub cart_items: Vec<OrderLineInput>,
    pub coupon_id: Option<Uuid>,
    pub coupon_discount: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct PlacedOrder {
    pub order_id: Uuid,
    pub total: Decimal,
}

/// Structured placement failure. Carries enough detail (offending product,
/// quantity actually available) for the client to repair its local view
/// without re-fetching everything.
#[derive(Debug, thiserror::Error)]
pub enum PlaceOrderError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Delivery address is required")]
    MissingAddress,

    #[error("Invalid quantity for product {product_id}")]
    InvalidQuantity { product_id: Uuid },

    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: Uuid },

    #[error("Variant not found: {variant_id}")]
    VariantNotFound { variant_id: Uuid },

    #[error("{name} is no longer available")]
    ProductUnavailable { product_id: Uuid, name: String },

    #[error("Only {available} available for {name}")]
    InsufficientStock {
        product_id: Uuid,
        name: String,
        available: i32,
    },

    #[error("Coupon not found: {coupon_id}")]
    CouponNotFound { coupon_id: Uuid },

    #[error("Coupon is not redeemable")]
    CouponNotRedeemable { coupon_id: Uuid },

    #[error("Coupon already used")]
    CouponAlreadyUsed { coupon_id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl PlaceOrderError {
    /// The product the failure is about, when there is one.
    pub fn product_id(&self) -> Option<Uuid> {
        match self {
            Self::InvalidQuantity { product_id }
            | Self::ProductNotFound { product_id }
            | Self::ProductUnavailable { product_id, .. }
            | Self::InsufficientStock { product_id, .. } => Some(*product_id),
            _ => None,
        }
    }

    /// Live quantity for insufficient-stock failures.
    pub fn available(&self) -> Option<i32> {
        match self {
            Self::InsufficientStock { available, .. } => Some(*available),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyCart | Self::MissingAddress | Self::InvalidQuantity { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::ProductNotFound { .. }
            | Self::VariantNotFound { .. }
            | Self::CouponNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ProductUnavailable { .. } | Self::InsufficientStock { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::CouponNotRedeemable { .. } | Self::CouponAlreadyUsed { .. } => {
                StatusCode::CONFLICT
            }
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message for the HTTP body. Database detail stays out of responses.
    pub fn response_message(&self) -> String {
        match self {
            Self::Database(_) => "Order could not be placed".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<PlaceOrderError> for ServiceError {
    fn from(err: PlaceOrderError) -> Self {
        match err {
            PlaceOrderError::Database(e) => ServiceError::DatabaseError(e),
            PlaceOrderError::InsufficientStock { .. } => {
                ServiceError::InsufficientStock(err.to_string())
            }
            other => ServiceError::InvalidOperation(other.to_string()),
        }
    }
}

/// Per-line plan assembled under lock: price and name are read once and
/// reused for both validation and order-item insertion.
struct LinePlan {
    product_id: Uuid,
    variant_id: Option<Uuid>,
    quantity: i32,
    price: Decimal,
    product_name: String,
}

impl OrderService {
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

    /// Places an order atomically: locks inventory rows in ascending
    /// product-id order, validates stock, computes the authoritative total,
    /// persists order + items, redeems the coupon, decrements stock, and
    /// clears the cart. Any failure at any step rolls back every write.
    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn place_order(&self, input: PlaceOrderInput) -> Result<PlacedOrder, PlaceOrderError> {
        // Validation errors are rejected before any lock is taken.
        if input.delivery_address.trim().is_empty() {
            return Err(PlaceOrderError::MissingAddress);
        }
        if input.cart_items.is_empty() {
            return Err(PlaceOrderError::EmptyCart);
        }
        for line in &input.cart_items {
            if line.quantity < 1 {
                return Err(PlaceOrderError::InvalidQuantity {
                    product_id: line.product_id,
                });
            }
        }

        let backend = self.db.get_database_backend();
        let txn = self.db.begin().await?;

        // Lock product rows in ascending id order so concurrent checkouts
        // touching overlapping products cannot deadlock. BTreeMap keeps the
        // set sorted and deduplicated.
        let mut products: BTreeMap<Uuid, product::Model> = BTreeMap::new();
        let mut product_ids: Vec<Uuid> =
            input.cart_items.iter().map(|l| l.product_id).collect();
        product_ids.sort();
        product_ids.dedup();

        for pid in &product_ids {
            let mut query = Product::find_by_id(*pid);
            if backend == DbBackend::Postgres {
                // SELECT ... FOR UPDATE. On SQLite the write transaction
                // itself serializes checkouts.
                query = query.lock_exclusive();
            }
            let found = query
                .one(&txn)
                .await?
                .ok_or(PlaceOrderError::ProductNotFound { product_id: *pid })?;
            products.insert(*pid, found);
        }

        // Resolve per-line price: variant price overrides the parent's.
        let mut plan: Vec<LinePlan> = Vec::with_capacity(input.cart_items.len());
        for line in &input.cart_items {
            let product = products
                .get(&line.product_id)
                .ok_or(PlaceOrderError::ProductNotFound {
                    product_id: line.product_id,
                })?;

            let price = match line.variant_id {
                Some(variant_id) => {
                    let mut query = ProductVariant::find()
                        .filter(product_variant::Column::Id.eq(variant_id))
                        .filter(product_variant::Column::ProductId.eq(line.product_id));
                    if backend == DbBackend::Postgres {
                        query = query.lock_exclusive();
                    }
                    let variant = query
                        .one(&txn)
                        .await?
                        .ok_or(PlaceOrderError::VariantNotFound { variant_id })?;
                    variant.price
                }
                None => product.price,
            };

            plan.push(LinePlan {
                product_id: line.product_id,
                variant_id: line.variant_id,
                quantity: line.quantity,
                price,
                product_name: product.name.clone(),
            });
        }

        // Validate live stock against the aggregate requested quantity per
        // product. The whole transaction aborts on the first shortfall; no
        // partial order is ever created.
        let mut requested: BTreeMap<Uuid, i64> = BTreeMap::new();
        for line in &plan {
            *requested.entry(line.product_id).or_insert(0) += i64::from(line.quantity);
        }
        for (pid, want) in &requested {
            let p = &products[pid];
            if !p.is_active {
                return Err(PlaceOrderError::ProductUnavailable {
                    product_id: *pid,
                    name: p.name.clone(),
                });
            }
            if i64::from(p.stock_quantity) < *want {
                return Err(PlaceOrderError::InsufficientStock {
                    product_id: *pid,
                    name: p.name.clone(),
                    available: p.stock_quantity,
                });
            }
        }

        // Authoritative total from the prices read under lock.
        let mut total: Decimal = plan
            .iter()
            .map(|l| l.price * Decimal::from(l.quantity))
            .sum();

        let now = Utc::now();
        let coupon = match input.coupon_id {
            Some(coupon_id) => {
                let coupon = Coupon::find_by_id(coupon_id)
                    .one(&txn)
                    .await?
                    .ok_or(PlaceOrderError::CouponNotFound { coupon_id })?;
                if !coupon.is_redeemable(now) {
                    return Err(PlaceOrderError::CouponNotRedeemable { coupon_id });
                }
                // The client may request a smaller discount than the coupon
                // grants, never a larger one. Total clamps at zero.
                let discount = input
                    .coupon_discount
                    .unwrap_or(coupon.discount_amount)
                    .min(coupon.discount_amount)
                    .max(Decimal::ZERO);
                total = (total - discount).max(Decimal::ZERO);
                Some(coupon)
            }
            None => None,
        };

        let order_id = Uuid::new_v4();
        order::ActiveModel {
            id: Set(order_id),
            user_id: Set(input.user_id),
            total_amount: Set(total),
            delivery_address: Set(input.delivery_address.trim().to_string()),
            status: Set(OrderStatus::Pending),
            coupon_id: Set(coupon.as_ref().map(|c| c.id)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for line in &plan {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                variant_id: Set(line.variant_id),
                quantity: Set(line.quantity),
                price: Set(line.price),
                product_name: Set(line.product_name.clone()),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        // Decrement stock while the locks are still held.
        let mut new_quantities: Vec<(Uuid, i32, bool)> = Vec::with_capacity(requested.len());
        for (pid, want) in &requested {
            let p = products[pid].clone();
            let new_quantity = p.stock_quantity - *want as i32;
            let is_active = p.is_active;
            let mut active: product::ActiveModel = p.into();
            active.stock_quantity = Set(new_quantity);
            active.updated_at = Set(now);
            active.update(&txn).await?;
            new_quantities.push((*pid, new_quantity, is_active));
        }

        // Coupon redemption rides in the same transaction: a duplicate
        // (user, coupon) insert rolls back the entire order.
        if let Some(coupon) = &coupon {
            let insert = coupon_usage::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(input.user_id),
                coupon_id: Set(coupon.id),
                order_id: Set(order_id),
                used_at: Set(now),
            }
            .insert(&txn)
            .await;

            if let Err(e) = insert {
                return if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                    Err(PlaceOrderError::CouponAlreadyUsed {
                        coupon_id: coupon.id,
                    })
                } else {
                    Err(e.into())
                };
            }
        }

        CartItem::delete_many()
            .filter(cart_item::Column::UserId.eq(input.user_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;
        if let Some(coupon) = &coupon {
            self.event_sender
                .send_or_log(Event::CouponRedeemed {
                    user_id: input.user_id,
                    coupon_id: coupon.id,
                    order_id,
                })
                .await;
        }
        for (product_id, stock_quantity, is_active) in new_quantities {
            self.stock_feed.publish(StockUpdate {
                product_id,
                stock_quantity,
                is_active,
                at: now,
            });
        }

        info!(%order_id, %total, "order placed");
        Ok(PlacedOrder { order_id, total })
    }

    /// Moves an order through its state machine. The first transition into
    /// `delivered` runs co-purchase aggregation inside the same transaction;
    /// re-saving a status the order already has is a no-op, so repeated
    /// delivery updates can never double-count.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let existing = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = existing.status;
        if old_status == new_status {
            return Ok(existing);
        }
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidOperation(format!(
                "cannot transition order from {} to {}",
                old_status, new_status
            )));
        }

        let mut active: order::ActiveModel = existing.into();
        active.status = Set(new_status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        let mut pair_count = 0;
        if new_status == OrderStatus::Delivered {
            pair_count = co_purchase::record_delivered_order(&txn, order_id).await?;
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;
        match new_status {
            OrderStatus::Delivered => {
                self.event_sender
                    .send_or_log(Event::OrderDelivered(order_id))
                    .await;
                self.event_sender
                    .send_or_log(Event::CoPurchaseRecorded {
                        order_id,
                        pair_count,
                    })
                    .await;
            }
            OrderStatus::Cancelled => {
                self.event_sender
                    .send_or_log(Event::OrderCancelled(order_id))
                    .await;
            }
            _ => {}
        }

        Ok(updated)
    }

    /// Fetches an order with its items, scoped to the owning user.
    pub async fn get_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = Order::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        Ok(OrderWithItems { order, items })
    }

    /// Lists a user's orders, newest first.
    pub async fn list_orders(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((data, total))
    }
}

/// Order with its frozen line items.
#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn error_messages_match_client_contract() {
        assert_eq!(PlaceOrderError::EmptyCart.to_string(), "Cart is empty");

        let variant_id = Uuid::new_v4();
        assert_eq!(
            PlaceOrderError::VariantNotFound { variant_id }.to_string(),
            format!("Variant not found: {}", variant_id)
        );

        let err = PlaceOrderError::InsufficientStock {
            product_id: Uuid::new_v4(),
            name: "Whole Milk 1L".to_string(),
            available: 3,
        };
        assert_eq!(err.to_string(), "Only 3 available for Whole Milk 1L");
        assert_eq!(err.available(), Some(3));
    }

    #[test]
    fn insufficient_stock_carries_product_id() {
        let product_id = Uuid::new_v4();
        let err = PlaceOrderError::InsufficientStock {
            product_id,
            name: "Eggs".to_string(),
            available: 0,
        };
        assert_eq!(err.product_id(), Some(product_id));
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn validation_errors_have_no_product_context() {
        assert_eq!(PlaceOrderError::EmptyCart.product_id(), None);
        assert_eq!(PlaceOrderError::MissingAddress.available(), None);
        assert_eq!(
            PlaceOrderError::EmptyCart.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn discount_clamps_total_at_zero() {
        let total = dec!(45.00);
        let discount = dec!(60.00);
        let clamped = (total - discount).max(Decimal::ZERO);
        assert_eq!(clamped, Decimal::ZERO);
    }

    #[test]
    fn database_errors_stay_generic_in_responses() {
        let err = PlaceOrderError::Database(DbErr::Custom("connection reset".to_string()));
        assert_eq!(err.response_message(), "Order could not be placed");
    }
}
