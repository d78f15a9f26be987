use crate::{
    entities::{order_item, product_co_purchase, OrderItem, ProductCoPurchase},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::debug;
use uuid::Uuid;

/// Records co-purchase pairs for a delivered order. For every ordered pair
/// (a, b) of distinct products in the order, increments the directional
/// counter and stamps last_purchased_at.
///
/// Runs on the caller's connection so it can join the delivery transaction;
/// the caller guarantees it fires at most once per order.
pub async fn record_delivered_order<C>(conn: &C, order_id: Uuid) -> Result<usize, ServiceError>
where
    C: ConnectionTrait,
{
    let items = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(conn)
        .await?;

    let mut product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    product_ids.sort();
    product_ids.dedup();

    if product_ids.len() < 2 {
        return Ok(0);
    }

    let now = Utc::now();
    let mut pair_count = 0;

    for &a in &product_ids {
        for &b in &product_ids {
            if a == b {
                continue;
            }
            match ProductCoPurchase::find_by_id((a, b)).one(conn).await? {
                Some(existing) => {
                    let count = existing.co_purchase_count;
                    let mut active: product_co_purchase::ActiveModel = existing.into();
                    active.co_purchase_count = Set(count + 1);
                    active.last_purchased_at = Set(now);
                    active.update(conn).await?;
                }
                None => {
                    product_co_purchase::ActiveModel {
                        product_id: Set(a),
                        co_product_id: Set(b),
                        co_purchase_count: Set(1),
                        last_purchased_at: Set(now),
                    }
                    .insert(conn)
                    .await?;
                }
            }
            pair_count += 1;
        }
    }

    debug!(%order_id, pair_count, "co-purchase pairs recorded");
    Ok(pair_count)
}
