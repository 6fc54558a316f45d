//! Claim lifecycle: height-based expiration and derived claim status.
//!
//! Expiration is a block-height concept, never a wall-clock timeout. A record at height
//! `a` observed at height `h` has `a + depth(a) - h` blocks left; zero or less is expired.

use serde::Serialize;
use crate::core::history::ClaimRecord;

/// Height at which claims switch to the long expiration depth.
pub const EXPIRATION_ERA_HEIGHT: u64 = 24_000;
/// Expiration depth for claims made before `EXPIRATION_ERA_HEIGHT`.
pub const SHORT_EXPIRATION_DEPTH: u64 = 12_000;
/// Expiration depth for claims made from `EXPIRATION_ERA_HEIGHT` on.
pub const LONG_EXPIRATION_DEPTH: u64 = 36_000;

/// Reference expiration depth used by the in-memory ledger.
pub fn default_expiration_depth(height: u64) -> u64 {
    if height < EXPIRATION_ERA_HEIGHT {
        SHORT_EXPIRATION_DEPTH
    } else {
        LONG_EXPIRATION_DEPTH
    }
}

/// `record.height + depth(record.height) - current_height`. Negative once expired.
pub fn expires_in<F>(record: &ClaimRecord, current_height: u64, depth: F) -> i64
where
    F: Fn(u64) -> u64,
{
    let end = record.height as i128 + depth(record.height) as i128;
    let left = end - current_height as i128;
    left.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

pub fn is_expired<F>(record: &ClaimRecord, current_height: u64, depth: F) -> bool
where
    F: Fn(u64) -> u64,
{
    expires_in(record, current_height, depth) <= 0
}

/// Derived state of a name. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "record", rename_all = "snake_case")]
pub enum ClaimStatus {
    Unclaimed,
    /// No confirmed record yet, but an operation on the name is in flight.
    PendingOnly,
    Active(ClaimRecord),
    Expired(ClaimRecord),
}

impl ClaimStatus {
    /// Evaluates the status from a name's history (most recent record last).
    pub fn evaluate<F>(history: &[ClaimRecord], has_pending: bool, current_height: u64, depth: F) -> Self
    where
        F: Fn(u64) -> u64,
    {
        match history.last() {
            Some(record) if is_expired(record, current_height, &depth) => ClaimStatus::Expired(record.clone()),
            Some(record) => ClaimStatus::Active(record.clone()),
            None if has_pending => ClaimStatus::PendingOnly,
            None => ClaimStatus::Unclaimed,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ClaimStatus::Active(_))
    }

    pub fn record(&self) -> Option<&ClaimRecord> {
        match self {
            ClaimStatus::Active(r) | ClaimStatus::Expired(r) => Some(r),
            ClaimStatus::Unclaimed | ClaimStatus::PendingOnly => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::name::Name;
    use crate::core::transaction::TxId;
    use proptest::prelude::*;

    fn record_at(height: u64) -> ClaimRecord {
        ClaimRecord {
            name: Name::new("bob").unwrap(),
            value: b"v".to_vec(),
            txid: TxId::from_bytes([1; 32]),
            height,
        }
    }

    #[test]
    fn test_expiration_boundary() {
        let record = record_at(100);
        let depth = |_| 50;
        assert_eq!(expires_in(&record, 149, depth), 1);
        assert!(!is_expired(&record, 149, depth));
        assert_eq!(expires_in(&record, 150, depth), 0);
        assert!(is_expired(&record, 150, depth));
        assert_eq!(expires_in(&record, 160, depth), -10);
    }

    #[test]
    fn test_default_depth_eras() {
        assert_eq!(default_expiration_depth(0), SHORT_EXPIRATION_DEPTH);
        assert_eq!(default_expiration_depth(EXPIRATION_ERA_HEIGHT - 1), SHORT_EXPIRATION_DEPTH);
        assert_eq!(default_expiration_depth(EXPIRATION_ERA_HEIGHT), LONG_EXPIRATION_DEPTH);
    }

    #[test]
    fn test_status_evaluation() {
        let depth = |_| 10;
        assert_eq!(ClaimStatus::evaluate(&[], false, 5, depth), ClaimStatus::Unclaimed);
        assert_eq!(ClaimStatus::evaluate(&[], true, 5, depth), ClaimStatus::PendingOnly);

        let history = vec![record_at(1), record_at(8)];
        let active = ClaimStatus::evaluate(&history, true, 12, depth);
        assert_eq!(active, ClaimStatus::Active(record_at(8)));
        assert!(active.is_active());

        let expired = ClaimStatus::evaluate(&history, false, 18, depth);
        assert_eq!(expired, ClaimStatus::Expired(record_at(8)));
        assert_eq!(expired.record().map(|r| r.height), Some(8));
    }

    proptest! {
        #[test]
        fn proptest_expiration_arithmetic(a in 0u64..1_000_000, h in 0u64..2_000_000, d in 0u64..100_000) {
            let record = record_at(a);
            let left = a as i64 + d as i64 - h as i64;
            prop_assert_eq!(expires_in(&record, h, |_| d), left);
            prop_assert_eq!(is_expired(&record, h, |_| d), left <= 0);
        }
    }
}
