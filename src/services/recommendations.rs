use crate::{
    cache::{CacheBackend, InMemoryCache},
    entities::{
        order::{self, OrderStatus},
        order_item, product, product_co_purchase, user_product_view, Order, OrderItem, Product,
        ProductCoPurchase, UserProductView,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const FRESHNESS_FULL_DAYS: f64 = 7.0;
const FRESHNESS_HALF_DAYS: f64 = 14.0;
const PURCHASE_EXCLUSION_DAYS: i64 = 14;
const CATEGORY_HALF_LIFE_DAYS: f64 = 30.0;
const VIEW_RANK_DECAY: f64 = 0.85;
const DIVERSITY_WINDOW: usize = 12;
const DIVERSITY_PER_CATEGORY: usize = 4;
const CANDIDATE_POOL: u64 = 500;

/// Scoring knobs, populated from AppConfig at startup.
#[derive(Debug, Clone)]
pub struct RecommendationConfig {
    pub trending_cache_ttl: Duration,
    pub min_trending_samples: usize,
    pub min_related_results: usize,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            trending_cache_ttl: Duration::from_secs(300),
            min_trending_samples: 10,
            min_related_results: 2,
        }
    }
}

/// Recommendation scoring over purchase, view, and co-purchase signals.
///
/// All scoring is deterministic for a given (user, calendar date, data set);
/// the only randomness is a jitter derived from a SHA-256 hash, so two calls
/// on the same day rank identically. The sole write path is best-effort view
/// tracking.
#[derive(Clone)]
pub struct RecommendationService {
    db: Arc<DatabaseConnection>,
    cache: InMemoryCache,
    event_sender: Arc<EventSender>,
    config: RecommendationConfig,
    /// Set on the first view-table failure; further view reads and writes are
    /// skipped for the life of this service instance.
    views_unavailable: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredProduct {
    pub product: product::Model,
    pub score: f64,
}

impl RecommendationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        cache: InMemoryCache,
        event_sender: Arc<EventSender>,
        config: RecommendationConfig,
    ) -> Self {
        Self {
            db,
            cache,
            event_sender,
            config,
            views_unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Trending products over a rolling window of delivered orders. Falls
    /// back to a 30-day window, then to newest active products, when the
    /// sample is too thin to rank meaningfully. Cached for a short TTL.
    #[instrument(skip(self))]
    pub async fn trending(
        &self,
        limit: usize,
        days: i64,
    ) -> Result<Vec<ScoredProduct>, ServiceError> {
        let cache_key = format!("trending:{}:{}", limit, days);
        if let Ok(Some(cached)) = self.cache.get(&cache_key).await {
            if let Ok(results) = serde_json::from_str::<Vec<ScoredProduct>>(&cached) {
                debug!(limit, days, "trending served from cache");
                return Ok(results);
            }
        }

        let now = Utc::now();
        let mut window = days.max(1);
        let mut samples = self.purchase_samples(window, now).await?;
        if samples.len() < self.config.min_trending_samples && window < 30 {
            window = 30;
            samples = self.purchase_samples(window, now).await?;
        }

        let results = if samples.len() < self.config.min_trending_samples {
            // Not enough signal in 30 days either; newest actives, unscored.
            self.newest_active(limit, &HashSet::new())
                .await?
                .into_iter()
                .map(|product| ScoredProduct {
                    product,
                    score: 0.0,
                })
                .collect()
        } else {
            let ranked = score_trending(&samples, window as f64);
            let ordered_ids: Vec<Uuid> = ranked.iter().map(|(id, _)| *id).collect();
            let scores: HashMap<Uuid, f64> = ranked.into_iter().collect();
            let products = self.active_products_in_order(&ordered_ids).await?;
            products
                .into_iter()
                .take(limit)
                .map(|product| {
                    let score = scores.get(&product.id).copied().unwrap_or(0.0);
                    ScoredProduct { product, score }
                })
                .collect::<Vec<_>>()
        };

        if let Ok(serialized) = serde_json::to_string(&results) {
            if let Err(e) = self
                .cache
                .set(&cache_key, &serialized, Some(self.config.trending_cache_ttl))
                .await
            {
                warn!(error = %e, "failed to cache trending results");
            }
        }

        Ok(results)
    }

    /// Products frequently bought together with the given one. Layered
    /// fallbacks keep the shelf populated for products with thin co-purchase
    /// history: co-purchase counts, then same category, then trending, then
    /// newest.
    #[instrument(skip(self, exclude_ids))]
    pub async fn frequently_bought_together(
        &self,
        product_id: Uuid,
        limit: usize,
        exclude_ids: &[Uuid],
    ) -> Result<Vec<product::Model>, ServiceError> {
        let anchor = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let mut excluded: HashSet<Uuid> = exclude_ids.iter().copied().collect();
        excluded.insert(product_id);

        let mut results: Vec<product::Model> = Vec::new();

        let pairs = ProductCoPurchase::find()
            .filter(product_co_purchase::Column::ProductId.eq(product_id))
            .order_by_desc(product_co_purchase::Column::CoPurchaseCount)
            .order_by_desc(product_co_purchase::Column::LastPurchasedAt)
            .limit((limit * 2) as u64)
            .all(&*self.db)
            .await?;
        let pair_ids: Vec<Uuid> = pairs.iter().map(|p| p.co_product_id).collect();
        for candidate in self.active_products_in_order(&pair_ids).await? {
            if results.len() >= limit {
                break;
            }
            if excluded.insert(candidate.id) {
                results.push(candidate);
            }
        }

        if results.len() < self.config.min_related_results {
            if let Some(category_id) = anchor.category_id {
                let same_category = Product::find()
                    .filter(product::Column::IsActive.eq(true))
                    .filter(product::Column::CategoryId.eq(category_id))
                    .order_by_desc(product::Column::CreatedAt)
                    .order_by_asc(product::Column::Id)
                    .limit((limit * 2) as u64)
                    .all(&*self.db)
                    .await?;
                for candidate in same_category {
                    if results.len() >= limit {
                        break;
                    }
                    if excluded.insert(candidate.id) {
                        results.push(candidate);
                    }
                }
            }
        }

        if results.len() < self.config.min_related_results {
            for scored in self.trending(limit, 7).await? {
                if results.len() >= limit {
                    break;
                }
                if excluded.insert(scored.product.id) {
                    results.push(scored.product);
                }
            }
        }

        if results.len() < self.config.min_related_results {
            for candidate in self.newest_active(limit, &excluded).await? {
                if results.len() >= limit {
                    break;
                }
                if excluded.insert(candidate.id) {
                    results.push(candidate);
                }
            }
        }

        results.truncate(limit);
        Ok(results)
    }

    /// Personalized feed: a composite of category affinity (35), view
    /// affinity (25), trending (20), freshness (10), and a small
    /// date-seeded jitter. Products the user received within the last 14
    /// days are excluded; results are category-diversified in the top 12.
    #[instrument(skip(self))]
    pub async fn personalized(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ScoredProduct>, ServiceError> {
        let now = Utc::now();
        let today = now.date_naive();

        let delivered = self.delivered_items_for_user(user_id).await?;

        let mut excluded: HashSet<Uuid> = HashSet::new();
        let mut category_weights: HashMap<Uuid, f64> = HashMap::new();
        let mut purchased_categories: HashMap<Uuid, Uuid> = HashMap::new();
        for (item, delivered_at, category_id) in &delivered {
            let age_days = days_between(*delivered_at, now);
            if age_days <= PURCHASE_EXCLUSION_DAYS as f64 {
                excluded.insert(item.product_id);
            }
            if let Some(category_id) = category_id {
                *category_weights.entry(*category_id).or_insert(0.0) +=
                    (-age_days / CATEGORY_HALF_LIFE_DAYS).exp();
                purchased_categories.insert(item.product_id, *category_id);
            }
        }
        normalize(&mut category_weights);

        let mut view_weights: HashMap<Uuid, f64> = HashMap::new();
        for (rank, view) in self.recent_views(user_id).await?.iter().enumerate() {
            view_weights.insert(view.product_id, VIEW_RANK_DECAY.powi(rank as i32));
        }

        let mut trend_weights: HashMap<Uuid, f64> = HashMap::new();
        for scored in self.trending(50, 7).await? {
            trend_weights.insert(scored.product.id, scored.score);
        }
        normalize(&mut trend_weights);

        let candidates = Product::find()
            .filter(product::Column::IsActive.eq(true))
            .order_by_desc(product::Column::CreatedAt)
            .limit(CANDIDATE_POOL)
            .all(&*self.db)
            .await?;

        let mut scored: Vec<ScoredProduct> = candidates
            .into_iter()
            .filter(|p| !excluded.contains(&p.id))
            .map(|p| {
                let category = p
                    .category_id
                    .and_then(|c| category_weights.get(&c).copied())
                    .unwrap_or(0.0)
                    * 35.0;
                let view = view_weights.get(&p.id).copied().unwrap_or(0.0) * 25.0;
                let trend = trend_weights.get(&p.id).copied().unwrap_or(0.0) * 20.0;
                let fresh = freshness_score(days_between(p.created_at, now));
                let jitter = deterministic_jitter(user_id, today, p.id);
                ScoredProduct {
                    product: p,
                    score: category + view + trend + fresh + jitter,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.product.id.cmp(&b.product.id))
        });
        let diversified = apply_diversity_cap(scored, DIVERSITY_PER_CATEGORY, DIVERSITY_WINDOW);

        Ok(diversified.into_iter().take(limit).collect())
    }

    /// Products the user has received before, ranked by purchase count then
    /// recency. The last two weeks' deliveries are excluded so the shelf
    /// surfaces things due for replenishment rather than what just arrived.
    #[instrument(skip(self))]
    pub async fn buy_again(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<product::Model>, ServiceError> {
        let now = Utc::now();
        let delivered = self.delivered_items_for_user(user_id).await?;

        struct History {
            count: i64,
            last: DateTime<Utc>,
        }
        let mut history: HashMap<Uuid, History> = HashMap::new();
        let mut recent: HashSet<Uuid> = HashSet::new();
        for (item, delivered_at, _) in &delivered {
            if days_between(*delivered_at, now) <= PURCHASE_EXCLUSION_DAYS as f64 {
                recent.insert(item.product_id);
            }
            let entry = history.entry(item.product_id).or_insert(History {
                count: 0,
                last: *delivered_at,
            });
            entry.count += 1;
            if *delivered_at > entry.last {
                entry.last = *delivered_at;
            }
        }

        let mut ranked: Vec<(Uuid, History)> = history
            .into_iter()
            .filter(|(id, _)| !recent.contains(id))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.count
                .cmp(&a.1.count)
                .then_with(|| b.1.last.cmp(&a.1.last))
                .then_with(|| a.0.cmp(&b.0))
        });

        let ordered_ids: Vec<Uuid> = ranked.into_iter().map(|(id, _)| id).collect();
        let products = self.active_products_in_order(&ordered_ids).await?;
        Ok(products.into_iter().take(limit).collect())
    }

    /// Best-effort view tracking. The views table is optional in deployments;
    /// the first failure disables further attempts for this instance.
    #[instrument(skip(self))]
    pub async fn record_view(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        if self.views_unavailable.load(Ordering::Relaxed) {
            return Ok(());
        }

        let now = Utc::now();
        let result: Result<(), sea_orm::DbErr> = async {
            match UserProductView::find_by_id((user_id, product_id))
                .one(&*self.db)
                .await?
            {
                Some(existing) => {
                    let count = existing.view_count;
                    let mut active: user_product_view::ActiveModel = existing.into();
                    active.view_count = Set(count + 1);
                    active.last_viewed_at = Set(now);
                    active.update(&*self.db).await?;
                }
                None => {
                    user_product_view::ActiveModel {
                        user_id: Set(user_id),
                        product_id: Set(product_id),
                        view_count: Set(1),
                        first_viewed_at: Set(now),
                        last_viewed_at: Set(now),
                    }
                    .insert(&*self.db)
                    .await?;
                }
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.event_sender
                    .send_or_log(Event::ProductViewed {
                        user_id,
                        product_id,
                    })
                    .await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "view tracking unavailable; disabling");
                self.views_unavailable.store(true, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Delivered order items in the window, paired with delivery time.
    async fn purchase_samples(
        &self,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<PurchaseSample>, ServiceError> {
        let cutoff = now - chrono::Duration::days(window_days);
        let orders = Order::find()
            .filter(order::Column::Status.eq(OrderStatus::Delivered))
            .filter(order::Column::UpdatedAt.gte(cutoff))
            .all(&*self.db)
            .await?;
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let delivered_at: HashMap<Uuid, DateTime<Utc>> =
            orders.iter().map(|o| (o.id, o.updated_at)).collect();
        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .all(&*self.db)
            .await?;

        Ok(items
            .into_iter()
            .filter_map(|item| {
                delivered_at.get(&item.order_id).map(|at| PurchaseSample {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    days_since: days_between(*at, now),
                })
            })
            .collect())
    }

    /// All delivered items for a user with delivery time and product category.
    async fn delivered_items_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(order_item::Model, DateTime<Utc>, Option<Uuid>)>, ServiceError> {
        let orders = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Status.eq(OrderStatus::Delivered))
            .all(&*self.db)
            .await?;
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let delivered_at: HashMap<Uuid, DateTime<Utc>> =
            orders.iter().map(|o| (o.id, o.updated_at)).collect();
        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .all(&*self.db)
            .await?;

        let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let categories: HashMap<Uuid, Option<Uuid>> = Product::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| (p.id, p.category_id))
            .collect();

        Ok(items
            .into_iter()
            .filter_map(|item| {
                delivered_at.get(&item.order_id).map(|at| {
                    let category = categories.get(&item.product_id).copied().flatten();
                    (item, *at, category)
                })
            })
            .collect())
    }

    /// Most recent views first, empty once the table has been flagged absent.
    async fn recent_views(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<user_product_view::Model>, ServiceError> {
        if self.views_unavailable.load(Ordering::Relaxed) {
            return Ok(Vec::new());
        }
        match UserProductView::find()
            .filter(user_product_view::Column::UserId.eq(user_id))
            .order_by_desc(user_product_view::Column::LastViewedAt)
            .limit(50)
            .all(&*self.db)
            .await
        {
            Ok(views) => Ok(views),
            Err(e) => {
                warn!(error = %e, "view history unavailable; disabling");
                self.views_unavailable.store(true, Ordering::Relaxed);
                Ok(Vec::new())
            }
        }
    }

    /// Fetches active products and returns them in the order of `ids`.
    async fn active_products_in_order(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<product::Model>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut by_id: HashMap<Uuid, product::Model> = Product::find()
            .filter(product::Column::Id.is_in(ids.to_vec()))
            .filter(product::Column::IsActive.eq(true))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn newest_active(
        &self,
        limit: usize,
        excluded: &HashSet<Uuid>,
    ) -> Result<Vec<product::Model>, ServiceError> {
        let products = Product::find()
            .filter(product::Column::IsActive.eq(true))
            .order_by_desc(product::Column::CreatedAt)
            .order_by_asc(product::Column::Id)
            .limit((limit + excluded.len()) as u64)
            .all(&*self.db)
            .await?;
        Ok(products
            .into_iter()
            .filter(|p| !excluded.contains(&p.id))
            .take(limit)
            .collect())
    }
}

pub(crate) struct PurchaseSample {
    pub product_id: Uuid,
    pub quantity: i32,
    pub days_since: f64,
}

/// Sums per-product scores with recency decay and a quantity weight, then
/// ranks descending; ties break by product id ascending so ordering is
/// reproducible run to run.
pub(crate) fn score_trending(samples: &[PurchaseSample], half_life_days: f64) -> Vec<(Uuid, f64)> {
    let mut scores: HashMap<Uuid, f64> = HashMap::new();
    for sample in samples {
        let decay = (-sample.days_since / half_life_days.max(1.0)).exp();
        *scores.entry(sample.product_id).or_insert(0.0) += decay * quantity_weight(sample.quantity);
    }
    let mut ranked: Vec<(Uuid, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Quantity contribution: 0.7 baseline, saturating at 1.0 for 5+ units, so
/// one bulk order cannot dominate the shelf.
pub(crate) fn quantity_weight(quantity: i32) -> f64 {
    0.7 + 0.3 * (f64::from(quantity.max(0)) / 5.0).min(1.0)
}

/// Freshness component: full points inside a week, half inside two, then
/// nothing.
pub(crate) fn freshness_score(age_days: f64) -> f64 {
    if age_days < FRESHNESS_FULL_DAYS {
        10.0
    } else if age_days < FRESHNESS_HALF_DAYS {
        5.0
    } else {
        0.0
    }
}

/// Stable jitter in [0, 2], seeded by (user, calendar date, product). Shuffles
/// near-ties differently per user and per day without any runtime randomness.
pub(crate) fn deterministic_jitter(user_id: Uuid, date: NaiveDate, product_id: Uuid) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(date.to_string().as_bytes());
    hasher.update(product_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) % 2001) as f64 / 1000.0
}

/// Caps each category at `per_category` slots within the first `window`
/// results; displaced items are re-queued after the window in score order.
pub(crate) fn apply_diversity_cap(
    ranked: Vec<ScoredProduct>,
    per_category: usize,
    window: usize,
) -> Vec<ScoredProduct> {
    let mut result: Vec<ScoredProduct> = Vec::with_capacity(ranked.len());
    let mut deferred: Vec<ScoredProduct> = Vec::new();
    let mut category_counts: HashMap<Option<Uuid>, usize> = HashMap::new();

    for item in ranked {
        if result.len() < window {
            let count = category_counts
                .entry(item.product.category_id)
                .or_insert(0);
            if *count < per_category {
                *count += 1;
                result.push(item);
                continue;
            }
            deferred.push(item);
        } else {
            deferred.push(item);
        }
    }

    result.extend(deferred);
    result
}

fn days_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - earlier).num_seconds().max(0) as f64 / 86_400.0
}

fn normalize(weights: &mut HashMap<Uuid, f64>) {
    let max = weights.values().cloned().fold(0.0_f64, f64::max);
    if max > 0.0 {
        for value in weights.values_mut() {
            *value /= max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use proptest::prelude::*;

    fn scored(category: Option<Uuid>, score: f64) -> ScoredProduct {
        let now = Utc::now();
        ScoredProduct {
            product: product::Model {
                id: Uuid::new_v4(),
                name: "p".to_string(),
                price: rust_decimal_macros::dec!(10.00),
                mrp: rust_decimal_macros::dec!(12.00),
                stock_quantity: 5,
                is_active: true,
                unit: "pc".to_string(),
                category_id: category,
                discount_percent: rust_decimal_macros::dec!(0),
                created_at: now,
                updated_at: now,
            },
            score,
        }
    }

    #[test]
    fn trending_ranks_recent_purchases_higher() {
        let hot = Uuid::new_v4();
        let cold = Uuid::new_v4();
        let samples = vec![
            PurchaseSample {
                product_id: hot,
                quantity: 1,
                days_since: 0.5,
            },
            PurchaseSample {
                product_id: cold,
                quantity: 1,
                days_since: 6.5,
            },
        ];
        let ranked = score_trending(&samples, 7.0);
        assert_eq!(ranked[0].0, hot);
        assert!(ranked[0].1 > ranked[1].1);
    }

    #[test]
    fn trending_ties_break_by_product_id_ascending() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let samples = vec![
            PurchaseSample {
                product_id: b,
                quantity: 2,
                days_since: 3.0,
            },
            PurchaseSample {
                product_id: a,
                quantity: 2,
                days_since: 3.0,
            },
        ];
        let ranked = score_trending(&samples, 7.0);
        assert_eq!(ranked[0].0, a);
        assert_eq!(ranked[1].0, b);
    }

    #[test]
    fn quantity_weight_saturates_at_five_units() {
        assert!((quantity_weight(5) - 1.0).abs() < 1e-9);
        assert!((quantity_weight(50) - 1.0).abs() < 1e-9);
        assert!(quantity_weight(1) < quantity_weight(4));
    }

    #[test]
    fn freshness_steps_down_at_week_boundaries() {
        assert_eq!(freshness_score(2.0), 10.0);
        assert_eq!(freshness_score(10.0), 5.0);
        assert_eq!(freshness_score(20.0), 0.0);
    }

    #[test]
    fn jitter_is_stable_for_same_inputs_and_varies_by_user() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let product = Uuid::from_u128(7);
        let u1 = Uuid::from_u128(100);
        let u2 = Uuid::from_u128(200);

        assert_eq!(
            deterministic_jitter(u1, date, product),
            deterministic_jitter(u1, date, product)
        );
        assert_ne!(
            deterministic_jitter(u1, date, product),
            deterministic_jitter(u2, date, product)
        );
    }

    #[test]
    fn jitter_changes_across_days() {
        let user = Uuid::from_u128(3);
        let product = Uuid::from_u128(9);
        let d1 = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let d2 = d1 + ChronoDuration::days(1);
        assert_ne!(
            deterministic_jitter(user, d1, product),
            deterministic_jitter(user, d2, product)
        );
    }

    #[test]
    fn diversity_cap_limits_category_in_window() {
        let dairy = Some(Uuid::from_u128(1));
        let produce = Some(Uuid::from_u128(2));

        let mut ranked: Vec<ScoredProduct> =
            (0..6).map(|i| scored(dairy, 100.0 - i as f64)).collect();
        ranked.push(scored(produce, 50.0));

        let capped = apply_diversity_cap(ranked, 4, 12);
        let dairy_in_top_5 = capped
            .iter()
            .take(5)
            .filter(|s| s.product.category_id == dairy)
            .count();
        assert_eq!(dairy_in_top_5, 4);
        assert_eq!(capped[4].product.category_id, produce);
        // Nothing is dropped, only reordered.
        assert_eq!(capped.len(), 7);
    }

    #[test]
    fn diversity_cap_passes_small_sets_through() {
        let cat = Some(Uuid::from_u128(1));
        let ranked = vec![scored(cat, 3.0), scored(cat, 2.0)];
        let capped = apply_diversity_cap(ranked.clone(), 4, 12);
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].score, 3.0);
    }

    proptest! {
        #[test]
        fn quantity_weight_bounded(q in 0i32..10_000) {
            let w = quantity_weight(q);
            prop_assert!((0.7..=1.0).contains(&w));
        }

        #[test]
        fn jitter_bounded(user in any::<u128>(), product in any::<u128>(), days in 0u32..10_000) {
            let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
                + ChronoDuration::days(i64::from(days));
            let j = deterministic_jitter(
                Uuid::from_u128(user),
                date,
                Uuid::from_u128(product),
            );
            prop_assert!((0.0..=2.0).contains(&j));
        }
    }
}
