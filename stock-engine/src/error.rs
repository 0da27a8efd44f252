//! 统一错误处理
//!
//! Error taxonomy of the engine:
//!
//! | 分类 | 说明 |
//! |------|------|
//! | 调用方错误 | 产品不存在、库存不足、非法数量 |
//! | 主库错误 | 主存储故障，操作失败 |
//! | 副本错误 | 副本存储故障，记录日志后吞掉，永不上抛给调用方 |

/// Engine-level error type.
///
/// `ProductNotFound` and `InsufficientStock` are caller-correctable and
/// always propagate. `SecondaryStore` never crosses the mutation-service
/// boundary; it exists so the replica layer and the analytics fallback can
/// report failures internally.
#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: i64 },

    #[error(
        "Insufficient stock for product {product_id}: current {current_stock}, requested change {requested_change}"
    )]
    InsufficientStock {
        product_id: i64,
        current_stock: i64,
        requested_change: i64,
    },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Secondary store error: {0}")]
    SecondaryStore(String),
}

pub type StockResult<T> = Result<T, StockError>;

impl From<sqlx::Error> for StockError {
    fn from(e: sqlx::Error) -> Self {
        StockError::Database(e.to_string())
    }
}

impl From<surrealdb::Error> for StockError {
    fn from(e: surrealdb::Error) -> Self {
        StockError::SecondaryStore(e.to_string())
    }
}

impl From<serde_json::Error> for StockError {
    fn from(e: serde_json::Error) -> Self {
        StockError::Database(format!("Serialization error: {e}"))
    }
}

impl StockError {
    /// True for failures the caller can correct (4xx-class at the HTTP layer).
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            StockError::ProductNotFound { .. }
                | StockError::InsufficientStock { .. }
                | StockError::InvalidQuantity(_)
        )
    }
}
