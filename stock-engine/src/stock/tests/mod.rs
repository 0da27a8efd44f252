use super::*;
use crate::config::FixedThresholdSource;
use crate::db::models::CartReservation;
use crate::stock::service::LowStockAlert;
use crate::utils::now_millis;

mod test_analytics;
mod test_reconcile;

/// Notifier that records every alert, for transition assertions.
pub struct RecordingNotifier {
    alerts: tokio::sync::Mutex<Vec<LowStockAlert>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            alerts: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn alerts(&self) -> Vec<LowStockAlert> {
        self.alerts.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.alerts.lock().await.len()
    }
}

#[async_trait::async_trait]
impl LowStockNotifier for RecordingNotifier {
    async fn low_stock(&self, alert: LowStockAlert) {
        self.alerts.lock().await.push(alert);
    }
}

/// 测试日志（RUST_LOG 控制级别），重复初始化会被忽略
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine over in-memory stores, fixed threshold 10, recording notifier.
async fn create_test_engine() -> (StockEngine, Arc<RecordingNotifier>) {
    init_logging();
    let primary = PrimaryStore::open_in_memory().await.unwrap();
    let secondary = SecondaryStore::open_memory().await.unwrap();
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = StockEngine::new(
        primary,
        secondary,
        notifier.clone(),
        Arc::new(FixedThresholdSource(10)),
        EngineConfig::default(),
    );
    (engine, notifier)
}

async fn seed_product(engine: &StockEngine, id: i64, stock: i64) -> Product {
    engine
        .register_product(id, format!("Product {id}"), "general", 9.99, stock, None)
        .await
        .unwrap()
}

fn expired_reservation(id: i64, cart_id: i64, product_id: i64, quantity: i64) -> CartReservation {
    CartReservation {
        id,
        cart_id,
        product_id,
        quantity,
        unit_price: 4.0,
        reservation_expiry: now_millis() - 60_000,
    }
}
