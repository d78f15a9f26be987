use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Events emitted by the storefront core. Consumed by the in-process
/// processing loop; delivery is fire-and-forget relative to the emitting
/// transaction, which has already committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCancelled(Uuid),
    OrderDelivered(Uuid),

    // Cart events
    CartItemAdded {
        user_id: Uuid,
        product_id: Uuid,
    },
    CartItemRemoved {
        user_id: Uuid,
        product_id: Uuid,
    },
    CartCleared(Uuid),

    // Catalog events
    ProductCreated(Uuid),
    ProductUpdated(Uuid),
    StockAdjusted {
        product_id: Uuid,
        old_quantity: i32,
        new_quantity: i32,
    },

    // Coupon events
    CouponRedeemed {
        user_id: Uuid,
        coupon_id: Uuid,
        order_id: Uuid,
    },

    // Recommendation signals
    ProductViewed {
        user_id: Uuid,
        product_id: Uuid,
    },
    CoPurchaseRecorded {
        order_id: Uuid,
        pair_count: usize,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing channel failures to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging failures instead of propagating them. Used on
    /// paths where event delivery must never fail the surrounding operation.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("event dropped: {}", e);
        }
    }
}

/// Drains the event channel, logging each event. Downstream consumers
/// (notification dispatch, analytics export) hook in here; both are external
/// collaborators, so the loop only records what happened.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::StockAdjusted {
                product_id,
                old_quantity,
                new_quantity,
            } => {
                info!(%product_id, old_quantity, new_quantity, "stock adjusted");
            }
            other => debug!(event = ?other, "event processed"),
        }
    }

    info!("event channel closed; processing loop exiting");
}

/// Row-change notification for a product, published after the writing
/// transaction commits. Per-product updates are delivered in commit order;
/// no ordering is guaranteed across distinct products.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockUpdate {
    pub product_id: Uuid,
    pub stock_quantity: i32,
    pub is_active: bool,
    pub at: DateTime<Utc>,
}

/// Broadcast feed of product stock changes. Cloned into every service that
/// writes product rows; the stock monitor subscribes on behalf of carts.
#[derive(Debug, Clone)]
pub struct StockFeed {
    sender: broadcast::Sender<StockUpdate>,
}

impl StockFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an update. Having no subscribers is not an error.
    pub fn publish(&self, update: StockUpdate) {
        let _ = self.sender.send(update);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StockUpdate> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StockFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stock_feed_delivers_updates_in_publish_order() {
        let feed = StockFeed::new(8);
        let mut rx = feed.subscribe();

        for qty in [5, 3, 0] {
            feed.publish(StockUpdate {
                product_id: Uuid::nil(),
                stock_quantity: qty,
                is_active: true,
                at: Utc::now(),
            });
        }

        assert_eq!(rx.recv().await.unwrap().stock_quantity, 5);
        assert_eq!(rx.recv().await.unwrap().stock_quantity, 3);
        assert_eq!(rx.recv().await.unwrap().stock_quantity, 0);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let feed = StockFeed::new(8);
        feed.publish(StockUpdate {
            product_id: Uuid::new_v4(),
            stock_quantity: 1,
            is_active: true,
            at: Utc::now(),
        });
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        sender.send_or_log(Event::OrderCreated(Uuid::new_v4())).await;
    }
}
