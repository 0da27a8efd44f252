//! Stock engine facade: wires the mutation service, analytics reader,
//! reconciler and background workers over the two store adapters.

pub mod analytics;
pub mod reconcile;
pub mod service;
pub mod sweeper;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::Duration;

use crate::config::{EnvThresholdSource, ThresholdCache, ThresholdSource};
use crate::db::PrimaryStore;
use crate::db::models::{MovementType, NewMovement, Period, Product};
use crate::error::{StockError, StockResult};
use crate::replica::SecondaryStore;
use crate::tasks::{BackgroundTasks, TaskKind};
use analytics::{Analytics, EvolutionPoint, GlobalEvolution, LowStockReport, TopMover, TypeSummary};
use reconcile::{ReconcileSummary, ReconcileWorker, Reconciler, VerifyReport};
use service::{LogNotifier, LowStockNotifier, MutationOutcome, StockService};
use sweeper::{DEFAULT_SWEEP_INTERVAL, ReservationSweeper};

/// Engine tunables. Intervals are operational knobs, not correctness
/// values, as long as the sweep stays below the minimum reservation TTL.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sweep_interval: Duration,
    pub reconcile_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            reconcile_interval: Duration::from_secs(300),
        }
    }
}

/// In-process entry point for controllers and webhooks.
pub struct StockEngine {
    primary: PrimaryStore,
    service: Arc<StockService>,
    analytics: Analytics,
    reconciler: Arc<Reconciler>,
    threshold: Arc<ThresholdCache>,
    config: EngineConfig,
}

impl StockEngine {
    pub fn new(
        primary: PrimaryStore,
        secondary: SecondaryStore,
        notifier: Arc<dyn LowStockNotifier>,
        threshold_source: Arc<dyn ThresholdSource>,
        config: EngineConfig,
    ) -> Self {
        let threshold = Arc::new(ThresholdCache::new(threshold_source));
        let service = Arc::new(StockService::new(
            primary.clone(),
            secondary.clone(),
            threshold.clone(),
            notifier,
        ));
        let analytics = Analytics::new(primary.clone(), secondary.clone());
        let reconciler = Arc::new(Reconciler::new(primary.clone(), secondary));

        Self {
            primary,
            service,
            analytics,
            reconciler,
            threshold,
            config,
        }
    }

    /// Default wiring: env-var threshold source, log-only notifier.
    pub fn with_defaults(primary: PrimaryStore, secondary: SecondaryStore) -> Self {
        Self::new(
            primary,
            secondary,
            Arc::new(LogNotifier),
            Arc::new(EnvThresholdSource),
            EngineConfig::default(),
        )
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub async fn apply_delta(&self, new: NewMovement) -> StockResult<MutationOutcome> {
        self.service.apply_delta(new).await
    }

    pub async fn set_absolute(
        &self,
        product_id: i64,
        new_stock: i64,
        user_id: Option<i64>,
        reason: impl Into<String>,
    ) -> StockResult<Product> {
        self.service
            .set_absolute(product_id, new_stock, user_id, reason)
            .await
    }

    /// Register a product and ledger its opening balance as an `initial`
    /// movement, so the stock field and the ledger agree from day one.
    pub async fn register_product(
        &self,
        id: i64,
        name: impl Into<String>,
        category: impl Into<String>,
        price: f64,
        initial_stock: i64,
        user_id: Option<i64>,
    ) -> StockResult<Product> {
        if initial_stock < 0 {
            return Err(StockError::InvalidQuantity(format!(
                "Initial stock must be non-negative, got {initial_stock}"
            )));
        }

        let product = Product {
            id,
            name: name.into(),
            category: category.into(),
            price,
            stock: 0,
            updated_at: crate::utils::now_millis(),
        };
        self.primary.insert_product(&product).await?;

        if initial_stock > 0 {
            let mut new = NewMovement::new(id, initial_stock, MovementType::Initial)
                .with_reason("initial stock");
            new.user_id = user_id;
            let outcome = self.service.apply_delta(new).await?;
            return Ok(Product {
                stock: outcome.new_stock,
                updated_at: outcome.movement.created_at,
                ..product
            });
        }
        Ok(product)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn evolution_for_product(
        &self,
        product_id: i64,
        period: Period,
    ) -> StockResult<Vec<EvolutionPoint>> {
        self.analytics.evolution_for_product(product_id, period).await
    }

    pub async fn global_evolution(&self, period: Period) -> StockResult<GlobalEvolution> {
        self.analytics.global_evolution(period).await
    }

    pub async fn movements_by_type(
        &self,
        period: Period,
    ) -> StockResult<HashMap<MovementType, TypeSummary>> {
        self.analytics.movements_by_type(period).await
    }

    pub async fn top_movers(&self, period: Period, limit: usize) -> StockResult<Vec<TopMover>> {
        self.analytics.top_movers(period, limit).await
    }

    /// `threshold: None` uses the configured low-stock threshold.
    pub async fn low_stock_with_context(
        &self,
        threshold: Option<i64>,
    ) -> StockResult<Vec<LowStockReport>> {
        let threshold = match threshold {
            Some(t) => t,
            None => self.threshold.get().await,
        };
        self.analytics.low_stock_with_context(threshold).await
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    pub async fn verify(&self, product_id: i64) -> StockResult<VerifyReport> {
        self.reconciler.verify(product_id).await
    }

    pub async fn verify_all(&self) -> StockResult<ReconcileSummary> {
        self.reconciler.verify_all().await
    }

    /// Invalidate the cached low-stock threshold after a configuration write.
    pub async fn invalidate_threshold(&self) {
        self.threshold.invalidate().await;
    }

    // ========================================================================
    // Background tasks
    // ========================================================================

    /// Start the expiry sweeper and the periodic reconciler. The caller owns
    /// the returned registry and drives graceful shutdown.
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        let sweeper = ReservationSweeper::new(
            self.primary.clone(),
            self.service.clone(),
            self.config.sweep_interval,
            tasks.shutdown_token(),
        );
        tasks.spawn("reservation_sweeper", TaskKind::Periodic, sweeper.run());

        let worker = ReconcileWorker::new(
            self.reconciler.clone(),
            self.config.reconcile_interval,
            tasks.shutdown_token(),
        );
        tasks.spawn("reconcile_worker", TaskKind::Periodic, worker.run());

        tasks
    }

    /// Direct access for embedders that manage their own catalog writes.
    pub fn primary(&self) -> &PrimaryStore {
        &self.primary
    }

    pub fn service(&self) -> &Arc<StockService> {
        &self.service
    }
}
