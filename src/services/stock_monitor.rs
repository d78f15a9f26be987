use crate::{
    entities::{product, Product},
    errors::ServiceError,
    events::{StockFeed, StockUpdate},
};
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Watches live stock for a set of cart lines and reports conflicts as they
/// develop. Reports are advisory; the authoritative check re-runs under lock
/// at placement time.
#[derive(Clone)]
pub struct StockMonitor {
    db: Arc<DatabaseConnection>,
    stock_feed: StockFeed,
    debounce: Duration,
}

/// A cart line reduced to what the monitor needs.
#[derive(Debug, Clone)]
pub struct WatchedLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Why a watched line cannot currently be fulfilled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockConflict {
    /// Stock is zero or the product was deactivated.
    OutOfStock,
    /// Some stock remains, but less than the watched quantity.
    InsufficientStock { available: i32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct LineStatus {
    pub product_id: Uuid,
    pub requested: i32,
    pub stock_quantity: i32,
    pub is_active: bool,
    pub conflict: Option<StockConflict>,
}

/// Snapshot delivered to the watcher after each debounced refresh.
#[derive(Debug, Clone, Serialize)]
pub struct StockReport {
    pub lines: Vec<LineStatus>,
    /// Products that went out of stock since the previous report.
    pub newly_out_of_stock: Vec<Uuid>,
    /// Products whose stock dropped since the previous report but remain
    /// purchasable at some quantity.
    pub stock_dropped: Vec<Uuid>,
    pub at: DateTime<Utc>,
}

impl StockReport {
    pub fn has_conflicts(&self) -> bool {
        self.lines.iter().any(|l| l.conflict.is_some())
    }
}

/// Handle owned by the watcher. Dropping it, or calling `stop`, tears the
/// background task down.
pub struct WatchHandle {
    reports: mpsc::Receiver<StockReport>,
    _shutdown: oneshot::Sender<()>,
}

impl WatchHandle {
    /// Receives the next report. `None` means the task has exited.
    pub async fn recv(&mut self) -> Option<StockReport> {
        self.reports.recv().await
    }

    pub fn stop(self) {}
}

impl StockMonitor {
    pub fn new(db: Arc<DatabaseConnection>, stock_feed: StockFeed, debounce: Duration) -> Self {
        Self {
            db,
            stock_feed,
            debounce,
        }
    }

    /// One-shot conflict check for a set of lines, used at cart display time.
    pub async fn check_lines(&self, lines: &[WatchedLine]) -> Result<Vec<LineStatus>, ServiceError> {
        let snapshot = fetch_statuses(&self.db, lines).await?;
        Ok(snapshot)
    }

    /// Starts watching the given lines. The first report is an immediate
    /// baseline; subsequent reports fire after feed activity for a watched
    /// product, debounced so bursts collapse into one refresh.
    #[instrument(skip(self, lines), fields(%user_id, line_count = lines.len()))]
    pub fn watch(&self, user_id: Uuid, lines: Vec<WatchedLine>) -> WatchHandle {
        let (report_tx, report_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        // Subscribe before the baseline fetch so no committed update between
        // fetch and subscribe is missed.
        let feed_rx = self.stock_feed.subscribe();
        let db = Arc::clone(&self.db);
        let debounce = self.debounce;

        tokio::spawn(async move {
            run_watch_loop(db, user_id, lines, feed_rx, report_tx, shutdown_rx, debounce).await;
        });

        WatchHandle {
            reports: report_rx,
            _shutdown: shutdown_tx,
        }
    }
}

async fn run_watch_loop(
    db: Arc<DatabaseConnection>,
    user_id: Uuid,
    lines: Vec<WatchedLine>,
    mut feed_rx: broadcast::Receiver<StockUpdate>,
    report_tx: mpsc::Sender<StockReport>,
    mut shutdown_rx: oneshot::Receiver<()>,
    debounce: Duration,
) {
    if lines.is_empty() {
        debug!(%user_id, "empty watch set; monitor task exiting");
        return;
    }

    let watched: HashSet<Uuid> = lines.iter().map(|l| l.product_id).collect();

    let mut previous: HashMap<Uuid, LineStatus> = HashMap::new();
    match fetch_statuses(&db, &lines).await {
        Ok(snapshot) => {
            let report = build_report(&snapshot, &previous);
            previous = index_snapshot(snapshot);
            if report_tx.send(report).await.is_err() {
                return;
            }
        }
        Err(e) => {
            warn!(%user_id, error = %e, "baseline stock fetch failed; monitor exiting");
            return;
        }
    }

    loop {
        let relevant = tokio::select! {
            _ = &mut shutdown_rx => return,
            update = feed_rx.recv() => match update {
                Ok(update) => watched.contains(&update.product_id),
                // Lagged means updates were missed; refresh unconditionally.
                Err(broadcast::error::RecvError::Lagged(_)) => true,
                Err(broadcast::error::RecvError::Closed) => return,
            },
        };
        if !relevant {
            continue;
        }

        // Debounce: swallow further feed activity until the window closes.
        let window = tokio::time::sleep(debounce);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => return,
                _ = &mut window => break,
                update = feed_rx.recv() => {
                    if matches!(update, Err(broadcast::error::RecvError::Closed)) {
                        break;
                    }
                }
            }
        }

        match fetch_statuses(&db, &lines).await {
            Ok(snapshot) => {
                let report = build_report(&snapshot, &previous);
                previous = index_snapshot(snapshot);
                if report_tx.send(report).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(%user_id, error = %e, "stock refresh failed; keeping previous snapshot");
            }
        }
    }
}

/// Re-fetches authoritative stock for every watched line and classifies each.
async fn fetch_statuses(
    db: &DatabaseConnection,
    lines: &[WatchedLine],
) -> Result<Vec<LineStatus>, ServiceError> {
    let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
    let products: HashMap<Uuid, product::Model> = Product::find()
        .filter(product::Column::Id.is_in(ids))
        .all(db)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let statuses = lines
        .iter()
        .map(|line| match products.get(&line.product_id) {
            Some(p) => {
                let conflict = if !p.is_active || p.stock_quantity == 0 {
                    Some(StockConflict::OutOfStock)
                } else if p.stock_quantity < line.quantity {
                    Some(StockConflict::InsufficientStock {
                        available: p.stock_quantity,
                    })
                } else {
                    None
                };
                LineStatus {
                    product_id: line.product_id,
                    requested: line.quantity,
                    stock_quantity: p.stock_quantity,
                    is_active: p.is_active,
                    conflict,
                }
            }
            // A vanished row reads as out of stock.
            None => LineStatus {
                product_id: line.product_id,
                requested: line.quantity,
                stock_quantity: 0,
                is_active: false,
                conflict: Some(StockConflict::OutOfStock),
            },
        })
        .collect();

    Ok(statuses)
}

fn index_snapshot(snapshot: Vec<LineStatus>) -> HashMap<Uuid, LineStatus> {
    snapshot.into_iter().map(|s| (s.product_id, s)).collect()
}

/// Diffs the fresh snapshot against the previous one to surface transitions.
fn build_report(snapshot: &[LineStatus], previous: &HashMap<Uuid, LineStatus>) -> StockReport {
    let mut newly_out_of_stock = Vec::new();
    let mut stock_dropped = Vec::new();

    for status in snapshot {
        let is_out = matches!(status.conflict, Some(StockConflict::OutOfStock));
        if let Some(prev) = previous.get(&status.product_id) {
            let was_out = matches!(prev.conflict, Some(StockConflict::OutOfStock));
            if is_out && !was_out {
                newly_out_of_stock.push(status.product_id);
            } else if !is_out && status.stock_quantity < prev.stock_quantity {
                stock_dropped.push(status.product_id);
            }
        }
    }

    StockReport {
        lines: snapshot.to_vec(),
        newly_out_of_stock,
        stock_dropped,
        at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(product_id: Uuid, requested: i32, stock: i32, active: bool) -> LineStatus {
        let conflict = if !active || stock == 0 {
            Some(StockConflict::OutOfStock)
        } else if stock < requested {
            Some(StockConflict::InsufficientStock { available: stock })
        } else {
            None
        };
        LineStatus {
            product_id,
            requested,
            stock_quantity: stock,
            is_active: active,
            conflict,
        }
    }

    #[test]
    fn deactivated_product_reads_as_out_of_stock() {
        let s = status(Uuid::new_v4(), 1, 10, false);
        assert_eq!(s.conflict, Some(StockConflict::OutOfStock));
    }

    #[test]
    fn partial_stock_reports_available_quantity() {
        let s = status(Uuid::new_v4(), 5, 3, true);
        assert_eq!(
            s.conflict,
            Some(StockConflict::InsufficientStock { available: 3 })
        );
    }

    #[test]
    fn report_flags_new_outage_but_not_existing_one() {
        let pid = Uuid::new_v4();
        let mut previous = HashMap::new();
        previous.insert(pid, status(pid, 2, 4, true));

        let report = build_report(&[status(pid, 2, 0, true)], &previous);
        assert_eq!(report.newly_out_of_stock, vec![pid]);
        assert!(report.stock_dropped.is_empty());

        // Already out in the previous snapshot: no repeated transition.
        let mut previous = HashMap::new();
        previous.insert(pid, status(pid, 2, 0, true));
        let report = build_report(&[status(pid, 2, 0, true)], &previous);
        assert!(report.newly_out_of_stock.is_empty());
    }

    #[test]
    fn report_flags_drop_that_remains_purchasable() {
        let pid = Uuid::new_v4();
        let mut previous = HashMap::new();
        previous.insert(pid, status(pid, 1, 8, true));

        let report = build_report(&[status(pid, 1, 3, true)], &previous);
        assert_eq!(report.stock_dropped, vec![pid]);
        assert!(report.newly_out_of_stock.is_empty());
        assert!(!report.has_conflicts());
    }

    #[test]
    fn baseline_report_carries_no_transitions() {
        let report = build_report(&[status(Uuid::new_v4(), 1, 0, true)], &HashMap::new());
        assert!(report.newly_out_of_stock.is_empty());
        assert!(report.has_conflicts());
    }
}
