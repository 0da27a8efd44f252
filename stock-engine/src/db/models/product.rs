//! Product Model

use serde::{Deserialize, Serialize};

pub type ProductId = i64;

/// Product row in the primary store (authoritative stock).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub price: f64,
    /// Never negative after a mutation; guarded at the storage layer.
    pub stock: i64,
    #[serde(default)]
    pub updated_at: i64,
}

/// Denormalized product document mirrored into the secondary store.
///
/// The secondary store keys records by `product_id`; the field is kept in
/// the document body as well so aggregation queries can reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductProjection {
    pub product_id: ProductId,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub stock: i64,
    pub updated_at: i64,
}

impl From<&Product> for ProductProjection {
    fn from(p: &Product) -> Self {
        ProductProjection {
            product_id: p.id,
            name: p.name.clone(),
            category: p.category.clone(),
            price: p.price,
            stock: p.stock,
            updated_at: p.updated_at,
        }
    }
}
