//! Small shared helpers: timestamps and id generation.

use std::sync::atomic::{AtomicI64, Ordering};

/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

static SEQUENCE: AtomicI64 = AtomicI64::new(0);

/// Generate a Snowflake-style i64 for use as a movement id.
///
/// Layout (53 bits, fits in JavaScript's Number.MAX_SAFE_INTEGER):
///   - 41 bits: milliseconds since 2024-01-01 UTC (~69 years)
///   - 12 bits: process-wide sequence (4096 per ms)
///
/// The sequence bits keep ids strictly increasing in creation order within
/// one process, so `ORDER BY created_at, id` reads the ledger back in a
/// single linear history even when rows share a millisecond.
pub fn snowflake_id() -> i64 {
    // Custom epoch: 2024-01-01 00:00:00 UTC
    const EPOCH_MS: i64 = 1_704_067_200_000;
    let now = now_millis();
    let ts = (now - EPOCH_MS) & 0x1FF_FFFF_FFFF; // 41 bits
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0xFFF; // 12 bits
    (ts << 12) | seq
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn snowflake_ids_are_positive_and_unique() {
        let mut seen = HashSet::new();
        for _ in 0..256 {
            let id = snowflake_id();
            assert!(id > 0);
            seen.insert(id);
        }
        assert_eq!(seen.len(), 256);
    }
}
