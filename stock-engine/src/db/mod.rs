//! Primary Store Adapter
//!
//! SQLite system of record for product stock, the movement ledger and cart
//! reservations. Every stock-affecting write lands here first; the engine
//! fails the operation if this store rejects it.

pub mod models;

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use crate::error::{StockError, StockResult};
use crate::utils::now_millis;
use models::{CartReservation, MovementMetadata, MovementRecord, MovementType, Product};

/// Primary database service — owns a SQLite connection pool.
#[derive(Clone)]
pub struct PrimaryStore {
    pub pool: SqlitePool,
}

/// Raw ledger row; `movement_type` and `metadata` are stored as text.
#[derive(Debug, sqlx::FromRow)]
struct MovementRow {
    id: i64,
    product_id: i64,
    user_id: Option<i64>,
    movement_type: String,
    quantity_before: i64,
    quantity_change: i64,
    quantity_after: i64,
    reason: String,
    reference: Option<String>,
    cost: Option<f64>,
    total_value: Option<f64>,
    notes: Option<String>,
    metadata: String,
    created_at: i64,
}

impl TryFrom<MovementRow> for MovementRecord {
    type Error = StockError;

    fn try_from(r: MovementRow) -> Result<Self, Self::Error> {
        let movement_type = MovementType::from_str(&r.movement_type)
            .map_err(StockError::Database)?;
        let metadata: MovementMetadata =
            serde_json::from_str(&r.metadata).unwrap_or_default();
        Ok(MovementRecord {
            id: r.id,
            product_id: r.product_id,
            user_id: r.user_id,
            movement_type,
            quantity_before: r.quantity_before,
            quantity_change: r.quantity_change,
            quantity_after: r.quantity_after,
            reason: r.reason,
            reference: r.reference,
            cost: r.cost,
            total_value: r.total_value,
            notes: r.notes,
            metadata,
            created_at: r.created_at,
        })
    }
}

/// Per-type aggregate row for the analytics fallback path.
#[derive(Debug, sqlx::FromRow)]
pub struct TypeAggregateRow {
    pub movement_type: String,
    pub movement_count: i64,
    pub total_quantity: i64,
    pub total_value: f64,
}

/// Per-product aggregate row for the analytics fallback path.
#[derive(Debug, sqlx::FromRow)]
pub struct ProductAggregateRow {
    pub product_id: i64,
    pub product_name: String,
    pub movement_count: i64,
    pub total_quantity: i64,
    pub current_stock: i64,
}

impl PrimaryStore {
    /// Open (or create) the database at `db_path`, WAL mode, and apply
    /// migrations.
    pub async fn new(db_path: &str) -> StockResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| StockError::Database(format!("Invalid database path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StockError::Database(format!("Failed to open database: {e}")))?;

        // busy_timeout: 写冲突时等待 5s 而非立即失败
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .map_err(|e| StockError::Database(format!("Failed to set busy_timeout: {e}")))?;

        Self::migrate(&pool).await?;
        tracing::info!("Primary store ready (SQLite WAL, busy_timeout=5000ms)");

        Ok(Self { pool })
    }

    /// In-memory database for tests. A single connection keeps every query
    /// on the same in-memory instance.
    pub async fn open_in_memory() -> StockResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StockError::Database(e.to_string()))?
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StockError::Database(format!("Failed to open memory database: {e}")))?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> StockResult<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| StockError::Database(format!("Failed to apply migrations: {e}")))?;
        Ok(())
    }

    // ========================================================================
    // Products
    // ========================================================================

    pub async fn get_product(&self, id: i64) -> StockResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            "SELECT id, name, category, price, stock, updated_at FROM products WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    pub async fn list_products(&self) -> StockResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT id, name, category, price, stock, updated_at FROM products ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    /// Register a product with its starting stock field. Ledgering the
    /// opening balance is the service's job (`initial` movement).
    pub async fn insert_product(&self, product: &Product) -> StockResult<()> {
        sqlx::query(
            "INSERT INTO products (id, name, category, price, stock, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.price)
        .bind(product.stock)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Mutation (stock update + ledger append, one transaction)
    // ========================================================================

    /// Apply `record.quantity_change` to the product's stock and append the
    /// ledger row, in a single transaction.
    ///
    /// The stock update is an atomic conditional `UPDATE ... WHERE stock +
    /// change >= 0`; `Ok(None)` means the guard rejected the change and
    /// nothing was written. Before/after quantities on the returned record
    /// come from the actually-applied update, not the caller's earlier read.
    /// The second tuple element is the product's resulting stock, which for
    /// backfilled `initial` rows differs from `quantity_after`.
    pub async fn commit_mutation(
        &self,
        mut record: MovementRecord,
    ) -> StockResult<Option<(MovementRecord, i64)>> {
        let mut tx = self.pool.begin().await?;

        let after: Option<i64> = sqlx::query_scalar(
            "UPDATE products SET stock = stock + ?2, updated_at = ?3 \
             WHERE id = ?1 AND stock + ?2 >= 0 RETURNING stock",
        )
        .bind(record.product_id)
        .bind(record.quantity_change)
        .bind(record.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(after) = after else {
            // Guard failed; dropping the transaction rolls back.
            return Ok(None);
        };

        if record.movement_type == MovementType::Initial {
            // Backfilled opening balance: the product did not exist with
            // stock before this row, whatever the stock field said.
            record.quantity_before = 0;
            record.quantity_after = record.quantity_change;
        } else {
            record.quantity_after = after;
            record.quantity_before = after - record.quantity_change;
        }

        let metadata_json = serde_json::to_string(&record.metadata)?;
        sqlx::query(
            "INSERT INTO stock_movements \
             (id, product_id, user_id, movement_type, quantity_before, quantity_change, \
              quantity_after, reason, reference, cost, total_value, notes, metadata, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )
        .bind(record.id)
        .bind(record.product_id)
        .bind(record.user_id)
        .bind(record.movement_type.as_str())
        .bind(record.quantity_before)
        .bind(record.quantity_change)
        .bind(record.quantity_after)
        .bind(&record.reason)
        .bind(&record.reference)
        .bind(record.cost)
        .bind(record.total_value)
        .bind(&record.notes)
        .bind(metadata_json)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some((record, after)))
    }

    // ========================================================================
    // Ledger reads
    // ========================================================================

    /// All ledger rows for a product since `since` (millis), oldest first.
    pub async fn movements_for_product(
        &self,
        product_id: i64,
        since: i64,
    ) -> StockResult<Vec<MovementRecord>> {
        let rows = sqlx::query_as::<_, MovementRow>(
            "SELECT * FROM stock_movements \
             WHERE product_id = ?1 AND created_at >= ?2 ORDER BY created_at ASC, id ASC",
        )
        .bind(product_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MovementRecord::try_from).collect()
    }

    /// All ledger rows since `since` (millis), oldest first.
    pub async fn movements_since(&self, since: i64) -> StockResult<Vec<MovementRecord>> {
        let rows = sqlx::query_as::<_, MovementRow>(
            "SELECT * FROM stock_movements WHERE created_at >= ?1 ORDER BY created_at ASC, id ASC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MovementRecord::try_from).collect()
    }

    /// Latest `limit` rows for a product, newest first.
    pub async fn recent_movements(
        &self,
        product_id: i64,
        limit: i64,
    ) -> StockResult<Vec<MovementRecord>> {
        let rows = sqlx::query_as::<_, MovementRow>(
            "SELECT * FROM stock_movements \
             WHERE product_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )
        .bind(product_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MovementRecord::try_from).collect()
    }

    pub async fn last_sale_at(&self, product_id: i64) -> StockResult<Option<i64>> {
        let at: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM stock_movements \
             WHERE product_id = ?1 AND movement_type = 'sale'",
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(at)
    }

    pub async fn last_restock_at(&self, product_id: i64) -> StockResult<Option<i64>> {
        let at: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM stock_movements \
             WHERE product_id = ?1 AND quantity_change > 0 \
             AND movement_type IN ('purchase', 'return', 'adjustment', 'initial')",
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(at)
    }

    // ========================================================================
    // Analytics fallback aggregates (secondary store preferred)
    // ========================================================================

    pub async fn aggregate_by_type(&self, since: i64) -> StockResult<Vec<TypeAggregateRow>> {
        let rows = sqlx::query_as::<_, TypeAggregateRow>(
            "SELECT movement_type, \
                    COUNT(*)                          AS movement_count, \
                    SUM(ABS(quantity_change))         AS total_quantity, \
                    SUM(COALESCE(total_value, 0.0))   AS total_value \
             FROM stock_movements WHERE created_at >= ?1 \
             GROUP BY movement_type",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn aggregate_top_movers(
        &self,
        since: i64,
        limit: i64,
    ) -> StockResult<Vec<ProductAggregateRow>> {
        let rows = sqlx::query_as::<_, ProductAggregateRow>(
            "SELECT m.product_id                AS product_id, \
                    p.name                      AS product_name, \
                    COUNT(*)                    AS movement_count, \
                    SUM(ABS(m.quantity_change)) AS total_quantity, \
                    p.stock                     AS current_stock \
             FROM stock_movements m \
             JOIN products p ON p.id = m.product_id \
             WHERE m.created_at >= ?1 \
             GROUP BY m.product_id, p.name, p.stock \
             ORDER BY total_quantity DESC \
             LIMIT ?2",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn products_at_or_below(&self, threshold: i64) -> StockResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT id, name, category, price, stock, updated_at FROM products \
             WHERE stock <= ?1 ORDER BY stock ASC, id ASC",
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    // ========================================================================
    // Cart reservations (owned by the cart component; engine reads/releases)
    // ========================================================================

    pub async fn upsert_cart(&self, cart_id: i64) -> StockResult<()> {
        sqlx::query(
            "INSERT INTO carts (id, total_price, updated_at) VALUES (?1, 0, ?2) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(cart_id)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_reservation(&self, r: &CartReservation) -> StockResult<()> {
        sqlx::query(
            "INSERT INTO cart_reservations \
             (id, cart_id, product_id, quantity, unit_price, reservation_expiry) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(r.id)
        .bind(r.cart_id)
        .bind(r.product_id)
        .bind(r.quantity)
        .bind(r.unit_price)
        .bind(r.reservation_expiry)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Unclaimed reservations past their expiry, oldest expiry first.
    pub async fn expired_reservations(&self, now: i64) -> StockResult<Vec<CartReservation>> {
        let rows = sqlx::query_as::<_, CartReservation>(
            "SELECT id, cart_id, product_id, quantity, unit_price, reservation_expiry \
             FROM cart_reservations \
             WHERE reservation_expiry < ?1 AND released = 0 \
             ORDER BY reservation_expiry ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Claim a reservation for release by marking its row. Returns false
    /// when a concurrent tick already holds the claim. The row itself
    /// survives until the release lands, so a failed release can be
    /// retried by returning the claim.
    pub async fn claim_reservation(&self, id: i64) -> StockResult<bool> {
        let result = sqlx::query(
            "UPDATE cart_reservations SET released = 1 WHERE id = ?1 AND released = 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Return a claim after a failed release; the next sweep retries.
    pub async fn unclaim_reservation(&self, id: i64) -> StockResult<()> {
        sqlx::query("UPDATE cart_reservations SET released = 0 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a reservation row once its stock has been restored.
    pub async fn delete_reservation(&self, id: i64) -> StockResult<bool> {
        let result = sqlx::query("DELETE FROM cart_reservations WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Recompute a cart's total price from its remaining reservation lines.
    pub async fn recompute_cart_total(&self, cart_id: i64) -> StockResult<f64> {
        sqlx::query(
            "UPDATE carts SET \
                 total_price = (SELECT COALESCE(SUM(quantity * unit_price), 0.0) \
                                FROM cart_reservations WHERE cart_id = ?1), \
                 updated_at = ?2 \
             WHERE id = ?1",
        )
        .bind(cart_id)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        let total: Option<f64> =
            sqlx::query_scalar("SELECT total_price FROM carts WHERE id = ?1")
                .bind(cart_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(total.unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stock.db");
        let path = path.to_str().unwrap();

        {
            let store = PrimaryStore::new(path).await.unwrap();
            store
                .insert_product(&Product {
                    id: 1,
                    name: "Widget".into(),
                    category: "tools".into(),
                    price: 2.5,
                    stock: 7,
                    updated_at: now_millis(),
                })
                .await
                .unwrap();
            store.pool.close().await;
        }

        // Reopen: migrations are idempotent, data persists.
        let store = PrimaryStore::new(path).await.unwrap();
        let product = store.get_product(1).await.unwrap().unwrap();
        assert_eq!(product.name, "Widget");
        assert_eq!(product.stock, 7);
    }
}
