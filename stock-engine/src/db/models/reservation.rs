//! Cart Reservation Model
//!
//! Owned by the cart component; the engine only reads expired rows and
//! deletes them once their stock has been released.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CartReservation {
    pub id: i64,
    pub cart_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price: f64,
    /// Unix millis; the sweeper releases rows past this point.
    pub reservation_expiry: i64,
}
