//! Movement Ledger Model
//!
//! One immutable record per stock change. Rows are created exactly once by
//! the mutation service and never updated or deleted.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Closed enumeration of stock movement kinds.
///
/// Kept as a tagged enum rather than a free-form string so that the
/// ledger's valid states are exhaustively checkable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Purchase,
    Sale,
    Adjustment,
    Return,
    Reservation,
    Release,
    Damage,
    Theft,
    Transfer,
    Initial,
    SaleConfirmed,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Purchase => "purchase",
            MovementType::Sale => "sale",
            MovementType::Adjustment => "adjustment",
            MovementType::Return => "return",
            MovementType::Reservation => "reservation",
            MovementType::Release => "release",
            MovementType::Damage => "damage",
            MovementType::Theft => "theft",
            MovementType::Transfer => "transfer",
            MovementType::Initial => "initial",
            MovementType::SaleConfirmed => "sale_confirmed",
        }
    }

    /// Zero-delta rows are only meaningful for the sale-confirmation
    /// bookkeeping entry (stock already moved at reservation time).
    pub fn allows_zero_change(&self) -> bool {
        matches!(self, MovementType::SaleConfirmed)
    }

    /// Movement kinds that count as restocking for the low-stock report.
    pub fn is_restock(&self) -> bool {
        matches!(
            self,
            MovementType::Purchase
                | MovementType::Return
                | MovementType::Adjustment
                | MovementType::Initial
        )
    }
}

impl std::str::FromStr for MovementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(MovementType::Purchase),
            "sale" => Ok(MovementType::Sale),
            "adjustment" => Ok(MovementType::Adjustment),
            "return" => Ok(MovementType::Return),
            "reservation" => Ok(MovementType::Reservation),
            "release" => Ok(MovementType::Release),
            "damage" => Ok(MovementType::Damage),
            "theft" => Ok(MovementType::Theft),
            "transfer" => Ok(MovementType::Transfer),
            "initial" => Ok(MovementType::Initial),
            "sale_confirmed" => Ok(MovementType::SaleConfirmed),
            other => Err(format!("Unknown movement type: {other}")),
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Denormalized correlation metadata carried on each ledger row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovementMetadata {
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
}

/// One ledger row. `quantity_after == quantity_before + quantity_change`
/// always holds; for `initial` movements `quantity_before` is defined as 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: i64,
    pub product_id: i64,
    /// None denotes a system/automatic movement (e.g. the expiry sweeper).
    pub user_id: Option<i64>,
    pub movement_type: MovementType,
    pub quantity_before: i64,
    pub quantity_change: i64,
    pub quantity_after: i64,
    pub reason: String,
    /// External correlation id (cart/order id).
    pub reference: Option<String>,
    /// Unit cost, when known.
    pub cost: Option<f64>,
    /// abs(quantity_change) × cost, when cost is known.
    pub total_value: Option<f64>,
    pub notes: Option<String>,
    pub metadata: MovementMetadata,
    /// Unix millis.
    pub created_at: i64,
}

impl MovementRecord {
    pub fn total_value_for(quantity_change: i64, cost: Option<f64>) -> Option<f64> {
        cost.map(|c| quantity_change.unsigned_abs() as f64 * c)
    }
}

/// Input to the mutation service. The service fills in before/after
/// quantities, id, timestamp and the product name/category metadata.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub product_id: i64,
    pub quantity_change: i64,
    pub movement_type: MovementType,
    pub user_id: Option<i64>,
    pub reason: String,
    pub reference: Option<String>,
    pub cost: Option<f64>,
    pub notes: Option<String>,
    /// Caller-provided correlation metadata (order/cart/user email).
    pub metadata: MovementMetadata,
}

impl NewMovement {
    pub fn new(product_id: i64, quantity_change: i64, movement_type: MovementType) -> Self {
        Self {
            product_id,
            quantity_change,
            movement_type,
            user_id: None,
            reason: String::new(),
            reference: None,
            cost: None,
            notes: None,
            metadata: MovementMetadata::default(),
        }
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Precomputed temporal bucket stored with each secondary-store movement
/// for fast time-grouped aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateInfo {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    /// ISO weekday, Monday = 1 .. Sunday = 7.
    pub weekday: u32,
    pub iso_week: u32,
}

impl DateInfo {
    pub fn from_millis(millis: i64) -> Self {
        let dt: DateTime<Utc> = DateTime::from_timestamp_millis(millis).unwrap_or_default();
        DateInfo {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            weekday: dt.weekday().number_from_monday(),
            iso_week: dt.iso_week().week(),
        }
    }
}

/// Relative query window for ledger aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    OneWeek,
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
}

impl Period {
    pub fn days(&self) -> i64 {
        match self {
            Period::OneWeek => 7,
            Period::OneMonth => 30,
            Period::ThreeMonths => 90,
            Period::SixMonths => 180,
            Period::OneYear => 365,
        }
    }

    /// Window start (Unix millis), relative to `now`.
    pub fn start_millis(&self, now: i64) -> i64 {
        now - self.days() * 24 * 60 * 60 * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_type_round_trips_through_snake_case() {
        for mt in [
            MovementType::Purchase,
            MovementType::Sale,
            MovementType::SaleConfirmed,
            MovementType::Initial,
        ] {
            let s = serde_json::to_string(&mt).unwrap();
            assert_eq!(s, format!("\"{}\"", mt.as_str()));
            let back: MovementType = serde_json::from_str(&s).unwrap();
            assert_eq!(back, mt);
        }
        assert_eq!("sale_confirmed".parse::<MovementType>().unwrap(), MovementType::SaleConfirmed);
        assert!("refund".parse::<MovementType>().is_err());
    }

    #[test]
    fn only_sale_confirmed_allows_zero_change() {
        assert!(MovementType::SaleConfirmed.allows_zero_change());
        assert!(!MovementType::Sale.allows_zero_change());
        assert!(!MovementType::Adjustment.allows_zero_change());
    }

    #[test]
    fn date_info_buckets_known_timestamp() {
        // 2026-08-25 is a Tuesday (ISO week 35); 13:30 UTC.
        let millis = chrono::DateTime::parse_from_rfc3339("2026-08-25T13:30:00Z")
            .unwrap()
            .timestamp_millis();
        let info = DateInfo::from_millis(millis);
        assert_eq!(info.year, 2026);
        assert_eq!(info.month, 8);
        assert_eq!(info.day, 25);
        assert_eq!(info.hour, 13);
        assert_eq!(info.weekday, 2);
        assert_eq!(info.iso_week, 35);
    }

    #[test]
    fn period_windows_are_ordered() {
        let now = 1_000_000_000_000;
        assert!(Period::OneWeek.start_millis(now) > Period::OneMonth.start_millis(now));
        assert!(Period::OneMonth.start_millis(now) > Period::OneYear.start_millis(now));
    }

    #[test]
    fn total_value_uses_absolute_change() {
        assert_eq!(MovementRecord::total_value_for(-3, Some(2.5)), Some(7.5));
        assert_eq!(MovementRecord::total_value_for(4, None), None);
    }
}
