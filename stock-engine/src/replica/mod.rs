//! Secondary Store Adapter (SurrealDB)
//!
//! 读取优化的文档副本：产品投影 + 富化的库存流水。
//! 允许暂时不可用 — 所有失败映射为 [`StockError::SecondaryStore`]，
//! 由变更服务边界记录日志后吞掉，绝不阻塞主库写入。

use serde::{Deserialize, Serialize};
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

use crate::db::models::{DateInfo, MovementRecord, MovementType, ProductProjection};
use crate::error::StockResult;

const PRODUCT_TABLE: &str = "product_projection";
const MOVEMENT_TABLE: &str = "stock_movements";

/// Enriched movement document stored in the secondary store.
///
/// Flattens the correlation metadata and carries a precomputed `date_info`
/// bucket so time-grouped aggregation never needs to parse timestamps.
/// The ledger id lives in `movement_id`; `id` is the SurrealDB record id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementDoc {
    pub movement_id: i64,
    pub product_id: i64,
    pub user_id: Option<i64>,
    pub movement_type: MovementType,
    pub quantity_before: i64,
    pub quantity_change: i64,
    pub quantity_after: i64,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cart_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub date_info: DateInfo,
    pub created_at: i64,
}

impl From<&MovementRecord> for MovementDoc {
    fn from(r: &MovementRecord) -> Self {
        MovementDoc {
            movement_id: r.id,
            product_id: r.product_id,
            user_id: r.user_id,
            movement_type: r.movement_type,
            quantity_before: r.quantity_before,
            quantity_change: r.quantity_change,
            quantity_after: r.quantity_after,
            reason: r.reason.clone(),
            reference: r.reference.clone(),
            cost: r.cost,
            total_value: r.total_value,
            notes: r.notes.clone(),
            product_name: r.metadata.product_name.clone(),
            product_category: r.metadata.product_category.clone(),
            order_id: r.metadata.order_id.clone(),
            cart_id: r.metadata.cart_id.clone(),
            user_email: r.metadata.user_email.clone(),
            date_info: DateInfo::from_millis(r.created_at),
            created_at: r.created_at,
        }
    }
}

/// SurrealDB 反序列化用（包含 SurrealDB record id）
#[derive(Debug, Deserialize)]
struct ProjectionRecord {
    #[allow(dead_code)]
    id: surrealdb::RecordId,
    product_id: i64,
    name: String,
    category: String,
    price: f64,
    stock: i64,
    updated_at: i64,
}

impl From<ProjectionRecord> for ProductProjection {
    fn from(r: ProjectionRecord) -> Self {
        ProductProjection {
            product_id: r.product_id,
            name: r.name,
            category: r.category,
            price: r.price,
            stock: r.stock,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MovementDocRecord {
    #[allow(dead_code)]
    id: surrealdb::RecordId,
    #[serde(flatten)]
    doc: MovementDoc,
}

/// Per-type aggregate; SurrealDB returns aggregate numerics as floats.
#[derive(Debug, Deserialize)]
pub struct TypeAggregateDoc {
    pub movement_type: MovementType,
    pub movement_count: f64,
    pub total_quantity: f64,
    pub total_value: f64,
}

/// Per-product aggregate for top movers.
#[derive(Debug, Deserialize)]
pub struct ProductAggregateDoc {
    pub product_id: i64,
    pub product_name: Option<String>,
    pub movement_count: f64,
    pub total_quantity: f64,
}

/// 副本存储 (SurrealDB)
#[derive(Clone)]
pub struct SecondaryStore {
    db: Surreal<Db>,
}

impl SecondaryStore {
    pub fn new(db: Surreal<Db>) -> Self {
        Self { db }
    }

    /// In-memory instance, used by tests and local development.
    pub async fn open_memory() -> StockResult<Self> {
        let db = Surreal::new::<surrealdb::engine::local::Mem>(()).await?;
        db.use_ns("stock").use_db("stock").await?;
        Ok(Self::new(db))
    }

    /// Durable instance backed by RocksDB at `path`.
    pub async fn open_rocksdb(path: &str) -> StockResult<Self> {
        let db = Surreal::new::<surrealdb::engine::local::RocksDb>(path).await?;
        db.use_ns("stock").use_db("stock").await?;
        Ok(Self::new(db))
    }

    // ========================================================================
    // Product projections
    // ========================================================================

    /// Upsert the denormalized product document, keyed by product id.
    pub async fn upsert_product(&self, projection: &ProductProjection) -> StockResult<()> {
        let _: Option<ProjectionRecord> = self
            .db
            .upsert((PRODUCT_TABLE, projection.product_id))
            .content(projection.clone())
            .await?;
        Ok(())
    }

    pub async fn get_projection(&self, product_id: i64) -> StockResult<Option<ProductProjection>> {
        let record: Option<ProjectionRecord> =
            self.db.select((PRODUCT_TABLE, product_id)).await?;
        Ok(record.map(ProductProjection::from))
    }

    /// Replica's view of the product's stock; `None` when the projection
    /// has never been mirrored.
    pub async fn get_stock(&self, product_id: i64) -> StockResult<Option<i64>> {
        Ok(self.get_projection(product_id).await?.map(|p| p.stock))
    }

    // ========================================================================
    // Movement documents (append-only)
    // ========================================================================

    pub async fn insert_movement(&self, doc: MovementDoc) -> StockResult<()> {
        let _: Option<MovementDocRecord> =
            self.db.create(MOVEMENT_TABLE).content(doc).await?;
        Ok(())
    }

    /// Ledger documents for one product within the window, oldest first.
    pub async fn movements_for_product(
        &self,
        product_id: i64,
        since: i64,
    ) -> StockResult<Vec<MovementDoc>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE product_id = $product_id AND created_at >= $since \
                 ORDER BY created_at ASC",
            )
            .bind(("table", MOVEMENT_TABLE))
            .bind(("product_id", product_id))
            .bind(("since", since))
            .await?;
        let records: Vec<MovementDocRecord> = result.take(0)?;
        Ok(records.into_iter().map(|r| r.doc).collect())
    }

    /// All ledger documents within the window, oldest first.
    pub async fn movements_since(&self, since: i64) -> StockResult<Vec<MovementDoc>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE created_at >= $since ORDER BY created_at ASC",
            )
            .bind(("table", MOVEMENT_TABLE))
            .bind(("since", since))
            .await?;
        let records: Vec<MovementDocRecord> = result.take(0)?;
        Ok(records.into_iter().map(|r| r.doc).collect())
    }

    // ========================================================================
    // Aggregations (preferred read path for analytics)
    // ========================================================================

    pub async fn aggregate_by_type(&self, since: i64) -> StockResult<Vec<TypeAggregateDoc>> {
        let mut result = self
            .db
            .query(
                "SELECT movement_type, \
                        count() AS movement_count, \
                        math::sum(math::abs(quantity_change)) AS total_quantity, \
                        math::sum(total_value ?? 0) AS total_value \
                 FROM type::table($table) WHERE created_at >= $since \
                 GROUP BY movement_type",
            )
            .bind(("table", MOVEMENT_TABLE))
            .bind(("since", since))
            .await?;
        let rows: Vec<TypeAggregateDoc> = result.take(0)?;
        Ok(rows)
    }

    pub async fn aggregate_top_movers(&self, since: i64) -> StockResult<Vec<ProductAggregateDoc>> {
        let mut result = self
            .db
            .query(
                "SELECT product_id, product_name, \
                        count() AS movement_count, \
                        math::sum(math::abs(quantity_change)) AS total_quantity \
                 FROM type::table($table) WHERE created_at >= $since \
                 GROUP BY product_id, product_name",
            )
            .bind(("table", MOVEMENT_TABLE))
            .bind(("since", since))
            .await?;
        let rows: Vec<ProductAggregateDoc> = result.take(0)?;
        Ok(rows)
    }
}
