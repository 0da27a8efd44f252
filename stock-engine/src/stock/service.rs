//! Stock Mutation Service
//!
//! The only writer of product stock and ledger rows. Serializes the
//! read-validate-write span per product, commits the primary store
//! transactionally, then mirrors to the secondary store best-effort.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::ThresholdCache;
use crate::db::PrimaryStore;
use crate::db::models::{MovementRecord, MovementType, NewMovement, Product, ProductProjection};
use crate::error::{StockError, StockResult};
use crate::replica::{MovementDoc, SecondaryStore};
use crate::utils::{now_millis, snowflake_id};

/// Signal sent to the (external) notification collaborator when a product
/// crosses the low-stock threshold.
#[derive(Debug, Clone)]
pub struct LowStockAlert {
    pub product_id: i64,
    pub product_name: String,
    pub current_stock: i64,
    pub threshold: i64,
}

/// Fire-and-forget low-stock collaborator.
#[async_trait::async_trait]
pub trait LowStockNotifier: Send + Sync {
    async fn low_stock(&self, alert: LowStockAlert);
}

/// Default notifier: structured log only.
pub struct LogNotifier;

#[async_trait::async_trait]
impl LowStockNotifier for LogNotifier {
    async fn low_stock(&self, alert: LowStockAlert) {
        tracing::warn!(
            target: "stock_alert",
            product_id = alert.product_id,
            product = %alert.product_name,
            stock = alert.current_stock,
            threshold = alert.threshold,
            "Product crossed the low-stock threshold"
        );
    }
}

/// Result of a successful mutation.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// The product's stock after the mutation.
    pub new_stock: i64,
    /// The appended ledger row.
    pub movement: MovementRecord,
}

/// Core orchestrator for every stock change.
pub struct StockService {
    primary: PrimaryStore,
    secondary: SecondaryStore,
    /// Per-product mutual exclusion for the read-validate-write span.
    /// Never held across the secondary-store mirror.
    locks: DashMap<i64, Arc<Mutex<()>>>,
    threshold: Arc<ThresholdCache>,
    notifier: Arc<dyn LowStockNotifier>,
}

impl StockService {
    pub fn new(
        primary: PrimaryStore,
        secondary: SecondaryStore,
        threshold: Arc<ThresholdCache>,
        notifier: Arc<dyn LowStockNotifier>,
    ) -> Self {
        Self {
            primary,
            secondary,
            locks: DashMap::new(),
            threshold,
            notifier,
        }
    }

    fn product_lock(&self, product_id: i64) -> Arc<Mutex<()>> {
        self.locks.entry(product_id).or_default().clone()
    }

    /// Apply a signed stock delta and append the ledger row.
    ///
    /// Fails with [`StockError::ProductNotFound`] or
    /// [`StockError::InsufficientStock`] without writing anything. A zero
    /// delta is rejected except for the `sale_confirmed` bookkeeping entry.
    pub async fn apply_delta(&self, new: NewMovement) -> StockResult<MutationOutcome> {
        if new.quantity_change == 0 && !new.movement_type.allows_zero_change() {
            return Err(StockError::InvalidQuantity(format!(
                "Zero quantity change is not valid for movement type '{}'",
                new.movement_type
            )));
        }

        let lock = self.product_lock(new.product_id);
        let guard = lock.lock().await;

        let product = self
            .primary
            .get_product(new.product_id)
            .await?
            .ok_or(StockError::ProductNotFound {
                product_id: new.product_id,
            })?;

        let outcome = self.mutate_locked(new, &product).await?;
        drop(guard);

        self.after_commit(&product, &outcome).await;
        Ok(outcome)
    }

    /// Admin correction to an absolute stock value. Always routed through
    /// the ledger as an `adjustment`; never a direct set.
    pub async fn set_absolute(
        &self,
        product_id: i64,
        new_stock: i64,
        user_id: Option<i64>,
        reason: impl Into<String>,
    ) -> StockResult<Product> {
        if new_stock < 0 {
            return Err(StockError::InvalidQuantity(format!(
                "Absolute stock must be non-negative, got {new_stock}"
            )));
        }

        let lock = self.product_lock(product_id);
        let guard = lock.lock().await;

        let product = self
            .primary
            .get_product(product_id)
            .await?
            .ok_or(StockError::ProductNotFound { product_id })?;

        let delta = new_stock - product.stock;
        if delta == 0 {
            return Ok(product);
        }

        let new = NewMovement {
            product_id,
            quantity_change: delta,
            movement_type: MovementType::Adjustment,
            user_id,
            reason: reason.into(),
            reference: None,
            cost: None,
            notes: None,
            metadata: Default::default(),
        };
        let outcome = self.mutate_locked(new, &product).await?;
        drop(guard);

        self.after_commit(&product, &outcome).await;

        Ok(Product {
            stock: outcome.new_stock,
            updated_at: outcome.movement.created_at,
            ..product
        })
    }

    /// The critical section body. Caller holds the product lock; `product`
    /// is the row read under that lock.
    async fn mutate_locked(
        &self,
        new: NewMovement,
        product: &Product,
    ) -> StockResult<MutationOutcome> {
        let resulting = product.stock + new.quantity_change;
        if resulting < 0 {
            return Err(StockError::InsufficientStock {
                product_id: new.product_id,
                current_stock: product.stock,
                requested_change: new.quantity_change,
            });
        }

        let created_at = now_millis();
        let mut metadata = new.metadata;
        metadata.product_name = Some(product.name.clone());
        metadata.product_category = Some(product.category.clone());

        let record = MovementRecord {
            id: snowflake_id(),
            product_id: new.product_id,
            user_id: new.user_id,
            movement_type: new.movement_type,
            // Provisional; the store rewrites these from the applied update.
            quantity_before: product.stock,
            quantity_change: new.quantity_change,
            quantity_after: resulting,
            reason: new.reason,
            reference: new.reference,
            cost: new.cost,
            total_value: MovementRecord::total_value_for(new.quantity_change, new.cost),
            notes: new.notes,
            metadata,
            created_at,
        };

        match self.primary.commit_mutation(record).await? {
            Some((movement, new_stock)) => Ok(MutationOutcome {
                new_stock,
                movement,
            }),
            None => {
                // The conditional update lost to a writer outside this
                // process. Report against the freshest stock we can read.
                let current_stock = self
                    .primary
                    .get_product(product.id)
                    .await?
                    .map(|p| p.stock)
                    .unwrap_or(product.stock);
                Err(StockError::InsufficientStock {
                    product_id: product.id,
                    current_stock,
                    requested_change: new.quantity_change,
                })
            }
        }
    }

    /// Post-commit effects: best-effort secondary mirror and the low-stock
    /// transition check. Runs outside the product lock; nothing here can
    /// fail the already-committed mutation.
    async fn after_commit(&self, product_before: &Product, outcome: &MutationOutcome) {
        let projection = ProductProjection {
            product_id: product_before.id,
            name: product_before.name.clone(),
            category: product_before.category.clone(),
            price: product_before.price,
            stock: outcome.new_stock,
            updated_at: outcome.movement.created_at,
        };
        if let Err(e) = self.mirror(&projection, &outcome.movement).await {
            tracing::warn!(
                target: "replica",
                product_id = product_before.id,
                movement_id = outcome.movement.id,
                error = %e,
                "Secondary store mirror failed; primary store committed"
            );
        }

        if outcome.movement.quantity_change < 0 {
            let threshold = self.threshold.get().await;
            let before = outcome.movement.quantity_before;
            // Transition only: already-below products stay quiet.
            if before > threshold && outcome.new_stock <= threshold {
                self.notifier
                    .low_stock(LowStockAlert {
                        product_id: product_before.id,
                        product_name: product_before.name.clone(),
                        current_stock: outcome.new_stock,
                        threshold,
                    })
                    .await;
            }
        }
    }

    /// 单一 best-effort 边界：副本的产品投影 + 富化流水一起镜像。
    async fn mirror(
        &self,
        projection: &ProductProjection,
        movement: &MovementRecord,
    ) -> StockResult<()> {
        self.secondary.upsert_product(projection).await?;
        self.secondary.insert_movement(MovementDoc::from(movement)).await?;
        Ok(())
    }
}
