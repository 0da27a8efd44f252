//! Consistency Checker / Reconciler
//!
//! Detects drift between the primary and secondary stock values and heals
//! the secondary from the primary. Primary always wins; drift is a logged,
//! auto-corrected condition, never a caller-facing failure.

use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db::PrimaryStore;
use crate::db::models::ProductProjection;
use crate::error::{StockError, StockResult};
use crate::replica::SecondaryStore;

/// Pre-correction comparison returned by [`Reconciler::verify`].
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub product_id: i64,
    pub consistent: bool,
    pub primary_stock: i64,
    /// `None` when the projection was missing or unreadable.
    pub secondary_stock: Option<i64>,
}

/// Result of a full reconciliation sweep.
#[derive(Debug, Clone, Default)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub drifted: usize,
    pub failed: usize,
}

pub struct Reconciler {
    primary: PrimaryStore,
    secondary: SecondaryStore,
}

impl Reconciler {
    pub fn new(primary: PrimaryStore, secondary: SecondaryStore) -> Self {
        Self { primary, secondary }
    }

    /// Compare both stores for one product and heal the secondary when they
    /// disagree. Returns the pre-correction values for observability; the
    /// primary store is never written.
    pub async fn verify(&self, product_id: i64) -> StockResult<VerifyReport> {
        let product = self
            .primary
            .get_product(product_id)
            .await?
            .ok_or(StockError::ProductNotFound { product_id })?;

        let secondary_stock = match self.secondary.get_stock(product_id).await {
            Ok(stock) => stock,
            Err(e) => {
                tracing::warn!(
                    target: "replica",
                    product_id,
                    error = %e,
                    "Secondary store unreadable during verify"
                );
                None
            }
        };

        let consistent = secondary_stock == Some(product.stock);
        if !consistent {
            tracing::info!(
                target: "reconcile",
                product_id,
                primary_stock = product.stock,
                secondary_stock = ?secondary_stock,
                "Stock drift detected, correcting secondary from primary"
            );
            if let Err(e) = self
                .secondary
                .upsert_product(&ProductProjection::from(&product))
                .await
            {
                tracing::warn!(
                    target: "replica",
                    product_id,
                    error = %e,
                    "Drift correction failed; will retry on next sweep"
                );
            }
        }

        Ok(VerifyReport {
            product_id,
            consistent,
            primary_stock: product.stock,
            secondary_stock,
        })
    }

    /// Verify every product. Single-product failures are logged and counted,
    /// never abort the sweep.
    pub async fn verify_all(&self) -> StockResult<ReconcileSummary> {
        let products = self.primary.list_products().await?;

        let mut summary = ReconcileSummary::default();
        for product in products {
            summary.checked += 1;
            match self.verify(product.id).await {
                Ok(report) if !report.consistent => summary.drifted += 1,
                Ok(_) => {}
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        target: "reconcile",
                        product_id = product.id,
                        error = %e,
                        "Verify failed for product, continuing sweep"
                    );
                }
            }
        }

        if summary.drifted > 0 || summary.failed > 0 {
            tracing::info!(
                target: "reconcile",
                checked = summary.checked,
                drifted = summary.drifted,
                failed = summary.failed,
                "Reconciliation sweep complete"
            );
        }
        Ok(summary)
    }
}

/// Periodic reconciliation sweep, registered as a `Periodic` task.
pub struct ReconcileWorker {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl ReconcileWorker {
    pub fn new(
        reconciler: Arc<Reconciler>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            interval,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!("Reconcile worker started");

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await; // skip immediate tick

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Reconcile worker shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.reconciler.verify_all().await {
                        tracing::error!("Reconciliation sweep failed: {e}");
                    }
                }
            }
        }

        tracing::info!("Reconcile worker stopped");
    }
}
