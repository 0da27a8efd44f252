//! Evolution/Analytics Reader
//!
//! Read-only aggregation over the movement ledger. Reads prefer the
//! secondary store; any failure (or an unmirrored, empty replica) falls
//! back to the primary store with a logged warning. Nothing here mutates
//! either store.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::PrimaryStore;
use crate::db::models::{MovementRecord, MovementType, Period, Product};
use crate::error::{StockError, StockResult};
use crate::replica::SecondaryStore;
use crate::utils::now_millis;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const CRITICAL_STOCK: i64 = 5;
const RECENT_MOVEMENT_LIMIT: i64 = 5;

/// One ledger-backed point in a product's stock history.
#[derive(Debug, Clone, Serialize)]
pub struct EvolutionPoint {
    /// `YYYY-MM-DD HH:MM:SS` (UTC).
    pub date: String,
    /// Stock after this movement.
    pub stock: i64,
    pub change: i64,
    pub movement_type: MovementType,
    pub reason: String,
}

/// One calendar-day point of aggregate stock.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalPoint {
    /// `YYYY-MM-DD` (UTC).
    pub date: String,
    pub total_stock: i64,
    pub movement_count: u64,
}

/// Aggregate stock history. `degraded` marks the explicit single-point
/// fallback used when the day-bucketed derivation is unavailable.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalEvolution {
    pub points: Vec<GlobalPoint>,
    pub degraded: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeSummary {
    pub count: u64,
    pub total_quantity: i64,
    pub total_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopMover {
    pub product_id: i64,
    pub product_name: String,
    pub movement_count: u64,
    pub total_quantity: i64,
    /// Always read from the primary store (authoritative).
    pub current_stock: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Critical,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct LowStockReport {
    pub product_id: i64,
    pub product_name: String,
    pub current_stock: i64,
    /// Last 5 movements, newest first.
    pub recent_movements: Vec<MovementRecord>,
    pub days_since_last_sale: Option<i64>,
    pub days_since_last_restock: Option<i64>,
    pub urgency: Urgency,
    pub recommendation: String,
}

/// Read-side aggregation over both stores.
#[derive(Clone)]
pub struct Analytics {
    primary: PrimaryStore,
    secondary: SecondaryStore,
}

impl Analytics {
    pub fn new(primary: PrimaryStore, secondary: SecondaryStore) -> Self {
        Self { primary, secondary }
    }

    /// Every ledger row for the product within the window, oldest first.
    pub async fn evolution_for_product(
        &self,
        product_id: i64,
        period: Period,
    ) -> StockResult<Vec<EvolutionPoint>> {
        let since = period.start_millis(now_millis());

        match self.secondary.movements_for_product(product_id, since).await {
            Ok(docs) if !docs.is_empty() => Ok(docs
                .into_iter()
                .map(|d| EvolutionPoint {
                    date: format_datetime(d.created_at),
                    stock: d.quantity_after,
                    change: d.quantity_change,
                    movement_type: d.movement_type,
                    reason: d.reason,
                })
                .collect()),
            Ok(_) => self.evolution_from_primary(product_id, since).await,
            Err(e) => {
                warn_fallback("evolution_for_product", &e);
                self.evolution_from_primary(product_id, since).await
            }
        }
    }

    async fn evolution_from_primary(
        &self,
        product_id: i64,
        since: i64,
    ) -> StockResult<Vec<EvolutionPoint>> {
        let rows = self.primary.movements_for_product(product_id, since).await?;
        Ok(rows
            .into_iter()
            .map(|m| EvolutionPoint {
                date: format_datetime(m.created_at),
                stock: m.quantity_after,
                change: m.quantity_change,
                movement_type: m.movement_type,
                reason: m.reason,
            })
            .collect())
    }

    /// Aggregate stock per calendar day across all products.
    ///
    /// Primary path: reconstruct each day's closing total by walking ledger
    /// deltas backwards from the current per-product stocks. Degraded path
    /// (movement history unobtainable from both stores): one point carrying
    /// the current aggregate, explicitly flagged.
    pub async fn global_evolution(&self, period: Period) -> StockResult<GlobalEvolution> {
        let now = now_millis();
        let since = period.start_millis(now);

        let products = self.primary.list_products().await?;
        let total_current: i64 = products.iter().map(|p| p.stock).sum();

        let movements = match self.movement_deltas(since).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Global evolution degraded to single-point summary"
                );
                return Ok(GlobalEvolution {
                    points: vec![GlobalPoint {
                        date: format_date(now),
                        total_stock: total_current,
                        movement_count: 0,
                    }],
                    degraded: true,
                });
            }
        };

        Ok(GlobalEvolution {
            points: derive_daily_points(total_current, &movements, since, now),
            degraded: false,
        })
    }

    /// (created_at, quantity_change) pairs for the window, oldest first.
    async fn movement_deltas(&self, since: i64) -> StockResult<Vec<(i64, i64)>> {
        match self.secondary.movements_since(since).await {
            Ok(docs) if !docs.is_empty() => {
                return Ok(docs
                    .into_iter()
                    .map(|d| (d.created_at, d.quantity_change))
                    .collect());
            }
            Ok(_) => {}
            Err(e) => warn_fallback("global_evolution", &e),
        }
        let rows = self.primary.movements_since(since).await?;
        Ok(rows
            .into_iter()
            .map(|m| (m.created_at, m.quantity_change))
            .collect())
    }

    /// Movement volume and value per movement type within the window.
    pub async fn movements_by_type(
        &self,
        period: Period,
    ) -> StockResult<HashMap<MovementType, TypeSummary>> {
        let since = period.start_millis(now_millis());

        match self.secondary.aggregate_by_type(since).await {
            Ok(rows) if !rows.is_empty() => Ok(rows
                .into_iter()
                .map(|r| {
                    (
                        r.movement_type,
                        TypeSummary {
                            count: r.movement_count as u64,
                            total_quantity: r.total_quantity as i64,
                            total_value: r.total_value,
                        },
                    )
                })
                .collect()),
            Ok(_) => self.movements_by_type_from_primary(since).await,
            Err(e) => {
                warn_fallback("movements_by_type", &e);
                self.movements_by_type_from_primary(since).await
            }
        }
    }

    async fn movements_by_type_from_primary(
        &self,
        since: i64,
    ) -> StockResult<HashMap<MovementType, TypeSummary>> {
        let rows = self.primary.aggregate_by_type(since).await?;
        let mut out = HashMap::new();
        for r in rows {
            let movement_type =
                MovementType::from_str(&r.movement_type).map_err(StockError::Database)?;
            out.insert(
                movement_type,
                TypeSummary {
                    count: r.movement_count as u64,
                    total_quantity: r.total_quantity,
                    total_value: r.total_value,
                },
            );
        }
        Ok(out)
    }

    /// Products ranked by absolute quantity moved within the window.
    pub async fn top_movers(&self, period: Period, limit: usize) -> StockResult<Vec<TopMover>> {
        let since = period.start_millis(now_millis());

        let mut movers = match self.secondary.aggregate_top_movers(since).await {
            Ok(rows) if !rows.is_empty() => {
                // The replica groups by (product_id, product_name); merge by
                // product before ranking.
                let mut merged: HashMap<i64, (Option<String>, u64, i64)> = HashMap::new();
                for r in rows {
                    let entry = merged.entry(r.product_id).or_insert((None, 0, 0));
                    if entry.0.is_none() {
                        entry.0 = r.product_name;
                    }
                    entry.1 += r.movement_count as u64;
                    entry.2 += r.total_quantity as i64;
                }

                let mut movers = Vec::with_capacity(merged.len());
                for (product_id, (name, movement_count, total_quantity)) in merged {
                    let current_stock = self
                        .primary
                        .get_product(product_id)
                        .await?
                        .map(|p| p.stock)
                        .unwrap_or(0);
                    movers.push(TopMover {
                        product_id,
                        product_name: name.unwrap_or_default(),
                        movement_count,
                        total_quantity,
                        current_stock,
                    });
                }
                movers
            }
            Ok(_) => self.top_movers_from_primary(since, limit).await?,
            Err(e) => {
                warn_fallback("top_movers", &e);
                self.top_movers_from_primary(since, limit).await?
            }
        };

        movers.sort_by(|a, b| {
            b.total_quantity
                .cmp(&a.total_quantity)
                .then(a.product_id.cmp(&b.product_id))
        });
        movers.truncate(limit);
        Ok(movers)
    }

    async fn top_movers_from_primary(
        &self,
        since: i64,
        limit: usize,
    ) -> StockResult<Vec<TopMover>> {
        let rows = self
            .primary
            .aggregate_top_movers(since, limit as i64)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| TopMover {
                product_id: r.product_id,
                product_name: r.product_name,
                movement_count: r.movement_count as u64,
                total_quantity: r.total_quantity,
                current_stock: r.current_stock,
            })
            .collect())
    }

    /// Products at or below `threshold`, each with enough ledger context to
    /// act on: recent movements, sale/restock recency and an urgency label.
    pub async fn low_stock_with_context(
        &self,
        threshold: i64,
    ) -> StockResult<Vec<LowStockReport>> {
        let now = now_millis();
        let products = self.primary.products_at_or_below(threshold).await?;

        let mut reports = Vec::with_capacity(products.len());
        for product in products {
            let recent_movements = self
                .primary
                .recent_movements(product.id, RECENT_MOVEMENT_LIMIT)
                .await?;
            let days_since_last_sale = self
                .primary
                .last_sale_at(product.id)
                .await?
                .map(|at| (now - at) / DAY_MS);
            let days_since_last_restock = self
                .primary
                .last_restock_at(product.id)
                .await?
                .map(|at| (now - at) / DAY_MS);

            let urgency = if product.stock <= CRITICAL_STOCK {
                Urgency::Critical
            } else {
                Urgency::Warning
            };
            let recommendation = recommend(&product, urgency, days_since_last_sale);

            reports.push(LowStockReport {
                product_id: product.id,
                product_name: product.name,
                current_stock: product.stock,
                recent_movements,
                days_since_last_sale,
                days_since_last_restock,
                urgency,
                recommendation,
            });
        }
        Ok(reports)
    }
}

fn recommend(product: &Product, urgency: Urgency, days_since_last_sale: Option<i64>) -> String {
    let selling = matches!(days_since_last_sale, Some(d) if d <= 7);
    match (urgency, selling) {
        (Urgency::Critical, true) => format!(
            "Restock immediately: {} units left and the product sold within the last week",
            product.stock
        ),
        (Urgency::Critical, false) => format!(
            "Restock or delist: {} units left with no sale in the last week",
            product.stock
        ),
        (Urgency::Warning, true) => {
            "Plan a restock: stock is below threshold and the product is selling".to_string()
        }
        (Urgency::Warning, false) => {
            "Monitor: stock is below threshold but demand is slow".to_string()
        }
    }
}

fn warn_fallback(operation: &str, error: &StockError) {
    tracing::warn!(
        target: "replica",
        operation,
        error = %error,
        "Secondary store read failed, falling back to primary"
    );
}

fn format_datetime(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn format_date(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string()
}

/// Reconstruct one closing-total point per UTC day in `[since, now]`.
///
/// `closing(day) = total_current - sum(changes strictly after day end)`,
/// so the newest day always equals the actual aggregate of current stocks
/// rather than a re-derivation from deltas alone.
fn derive_daily_points(
    total_current: i64,
    movements: &[(i64, i64)],
    since: i64,
    now: i64,
) -> Vec<GlobalPoint> {
    let start_day = DateTime::<Utc>::from_timestamp_millis(since)
        .unwrap_or_default()
        .date_naive();
    let end_day = DateTime::<Utc>::from_timestamp_millis(now)
        .unwrap_or_default()
        .date_naive();

    let mut sorted: Vec<(i64, i64)> = movements.to_vec();
    sorted.sort_by_key(|(at, _)| *at);

    let mut points = Vec::new();
    let mut day = start_day;
    while day <= end_day {
        let day_start = day.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        let day_end_exclusive = (day_start + Duration::days(1)).timestamp_millis();
        let day_start_ms = day_start.timestamp_millis();

        let changes_after_day: i64 = sorted
            .iter()
            .filter(|(at, _)| *at >= day_end_exclusive)
            .map(|(_, change)| change)
            .sum();
        let movement_count = sorted
            .iter()
            .filter(|(at, _)| *at >= day_start_ms && *at < day_end_exclusive)
            .count() as u64;

        points.push(GlobalPoint {
            date: day.format("%Y-%m-%d").to_string(),
            total_stock: total_current - changes_after_day,
            movement_count,
        });

        day = day.succ_opt().unwrap_or(end_day);
        if points.len() > 400 {
            break; // window is bounded by Period::OneYear
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_points_chain_back_from_current_total() {
        // Current total 100; yesterday a +30 purchase, today a -10 sale.
        let now = chrono::DateTime::parse_from_rfc3339("2026-08-25T12:00:00Z")
            .unwrap()
            .timestamp_millis();
        let yesterday = now - DAY_MS;
        let since = now - 3 * DAY_MS;
        let movements = vec![(yesterday, 30), (now - 1000, -10)];

        let points = derive_daily_points(100, &movements, since, now);
        assert_eq!(points.len(), 4);

        // Today's point is the live aggregate.
        let today = points.last().unwrap();
        assert_eq!(today.date, "2026-08-25");
        assert_eq!(today.total_stock, 100);
        assert_eq!(today.movement_count, 1);

        // Yesterday closed at 100 + 10 (today's sale not yet applied).
        let y = &points[points.len() - 2];
        assert_eq!(y.total_stock, 110);
        assert_eq!(y.movement_count, 1);

        // Two days ago: before the purchase and the sale.
        let d2 = &points[points.len() - 3];
        assert_eq!(d2.total_stock, 80);
        assert_eq!(d2.movement_count, 0);
    }

    #[test]
    fn recommendation_mentions_urgency() {
        let product = Product {
            id: 1,
            name: "Widget".into(),
            category: "tools".into(),
            price: 2.0,
            stock: 2,
            updated_at: 0,
        };
        let critical = recommend(&product, Urgency::Critical, Some(2));
        assert!(critical.contains("Restock immediately"));
        let warning = recommend(&product, Urgency::Warning, None);
        assert!(warning.contains("Monitor"));
    }
}
