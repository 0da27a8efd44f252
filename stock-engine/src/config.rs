//! Low-stock threshold configuration.
//!
//! The threshold lives in external configuration storage; the engine reads
//! it through [`ThresholdCache`], an explicit cache struct with TTL and
//! invalidation-on-write rather than an ambient module-level value.
//!
//! # 环境变量
//!
//! | 环境变量 | 默认值 | 说明 |
//! |----------|--------|------|
//! | LOW_STOCK_THRESHOLD | 10 | 低库存告警阈值 |

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StockResult;
use crate::utils::now_millis;

/// Default alert threshold when configuration storage has no value.
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;

/// Default cache TTL for the read-through threshold value.
pub const DEFAULT_THRESHOLD_TTL_MS: i64 = 60_000;

/// External configuration storage the threshold is read from.
#[async_trait::async_trait]
pub trait ThresholdSource: Send + Sync {
    async fn low_stock_threshold(&self) -> StockResult<i64>;
}

/// Reads `LOW_STOCK_THRESHOLD` from the environment, falling back to the
/// default when unset or unparsable.
pub struct EnvThresholdSource;

#[async_trait::async_trait]
impl ThresholdSource for EnvThresholdSource {
    async fn low_stock_threshold(&self) -> StockResult<i64> {
        Ok(std::env::var("LOW_STOCK_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD))
    }
}

/// Fixed threshold, for tests and embedders with their own config layer.
pub struct FixedThresholdSource(pub i64);

#[async_trait::async_trait]
impl ThresholdSource for FixedThresholdSource {
    async fn low_stock_threshold(&self) -> StockResult<i64> {
        Ok(self.0)
    }
}

struct CachedValue {
    value: i64,
    loaded_at: i64,
}

/// Read-through cache over a [`ThresholdSource`].
///
/// A stale or failed read falls back to the last cached value, then to the
/// default; configuration writers call [`ThresholdCache::invalidate`].
pub struct ThresholdCache {
    source: Arc<dyn ThresholdSource>,
    ttl_ms: i64,
    cached: RwLock<Option<CachedValue>>,
}

impl ThresholdCache {
    pub fn new(source: Arc<dyn ThresholdSource>) -> Self {
        Self::with_ttl(source, DEFAULT_THRESHOLD_TTL_MS)
    }

    pub fn with_ttl(source: Arc<dyn ThresholdSource>, ttl_ms: i64) -> Self {
        Self {
            source,
            ttl_ms,
            cached: RwLock::new(None),
        }
    }

    /// Current threshold, served from cache while fresh.
    pub async fn get(&self) -> i64 {
        let now = now_millis();

        {
            let cached = self.cached.read().await;
            if let Some(c) = cached.as_ref()
                && now - c.loaded_at < self.ttl_ms
            {
                return c.value;
            }
        }

        match self.source.low_stock_threshold().await {
            Ok(value) => {
                let mut cached = self.cached.write().await;
                *cached = Some(CachedValue {
                    value,
                    loaded_at: now,
                });
                value
            }
            Err(e) => {
                tracing::warn!(error = %e, "Threshold source read failed, using fallback");
                let cached = self.cached.read().await;
                cached
                    .as_ref()
                    .map(|c| c.value)
                    .unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD)
            }
        }
    }

    /// Drop the cached value. Called whenever the external configuration
    /// storage is written to.
    pub async fn invalidate(&self) {
        let mut cached = self.cached.write().await;
        *cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        value: i64,
        reads: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ThresholdSource for CountingSource {
        async fn low_stock_threshold(&self) -> StockResult<i64> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.value)
        }
    }

    #[tokio::test]
    async fn cache_serves_fresh_value_without_rereading() {
        let source = Arc::new(CountingSource {
            value: 7,
            reads: AtomicUsize::new(0),
        });
        let cache = ThresholdCache::with_ttl(source.clone(), 60_000);

        assert_eq!(cache.get().await, 7);
        assert_eq!(cache.get().await, 7);
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_reread() {
        let source = Arc::new(CountingSource {
            value: 12,
            reads: AtomicUsize::new(0),
        });
        let cache = ThresholdCache::with_ttl(source.clone(), 60_000);

        assert_eq!(cache.get().await, 12);
        cache.invalidate().await;
        assert_eq!(cache.get().await, 12);
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn env_source_defaults_to_ten() {
        // Only meaningful when the variable is unset in the test environment.
        if std::env::var("LOW_STOCK_THRESHOLD").is_err() {
            assert_eq!(
                EnvThresholdSource.low_stock_threshold().await.unwrap(),
                DEFAULT_LOW_STOCK_THRESHOLD
            );
        }
    }
}
