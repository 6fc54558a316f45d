//! Anti-squat network fee. All arithmetic is integer base units; no float.
//!
//! **Model:** the chain parameters supply a raw, height-indexed, non-decreasing fee
//! schedule. The fee actually charged is the raw fee rounded *up* to the next multiple
//! of `CENT`, recomputed from the current best height every time an operation is emitted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Amount in base currency units.
///
/// 1 coin = `COIN` base units; `CENT` is the minimum denomination fees are rounded to.
///
/// # Examples
/// ```
/// use namereg_core::core::fee::{Amount, CENT};
///
/// let fee = Amount::new(CENT);
/// assert_eq!(fee.to_string(), "0.01000000");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Underlying base units.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whole coins (integer part only).
    pub fn as_coins(&self) -> u64 {
        self.0 / COIN
    }

    /// Base units left after removing whole coins.
    pub fn remainder_units(&self) -> u64 {
        self.0 % COIN
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn is_cent_multiple(&self) -> bool {
        self.0 % CENT == 0
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl std::ops::Mul<u64> for Amount {
    type Output = Self;

    fn mul(self, multiplier: u64) -> Self {
        Self(self.0.saturating_mul(multiplier))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.as_coins(), self.remainder_units())
    }
}

/// Base units per coin.
pub const COIN: u64 = 100_000_000;

/// Minimum denomination; every anti-squat fee is a multiple of it.
pub const CENT: u64 = 1_000_000;

/// Largest amount that is a multiple of `CENT`.
pub const MAX_CENT_MULTIPLE: u64 = u64::MAX / CENT * CENT;

/// Value locked in each claim output.
pub const MIN_AMOUNT: Amount = Amount(CENT);

/// Rounds `raw` up to the next multiple of `CENT`: `ceil(raw / CENT) * CENT`.
///
/// The result is always a multiple of `CENT`. Raw amounts above the largest
/// representable multiple clamp to `MAX_CENT_MULTIPLE`.
///
/// # Examples
/// ```
/// use namereg_core::core::fee::{round_up_to_cent, Amount, CENT};
///
/// assert_eq!(round_up_to_cent(Amount::new(0)), Amount::new(0));
/// assert_eq!(round_up_to_cent(Amount::new(1)), Amount::new(CENT));
/// assert_eq!(round_up_to_cent(Amount::new(CENT)), Amount::new(CENT));
/// assert_eq!(round_up_to_cent(Amount::new(CENT + 1)), Amount::new(2 * CENT));
/// ```
pub fn round_up_to_cent(raw: Amount) -> Amount {
    let cents = raw.0.div_ceil(CENT);
    Amount(cents.checked_mul(CENT).unwrap_or(MAX_CENT_MULTIPLE))
}

/// Reference raw fee schedule: `base + (height / interval) * step`.
///
/// Non-decreasing in height for any parameters, which is the only property the registry
/// relies on. Real deployments take the raw fee from consensus parameters instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearFeeSchedule {
    pub base: Amount,
    pub step: Amount,
    pub interval: u64,
}

impl LinearFeeSchedule {
    pub fn raw_fee(&self, height: u64) -> Amount {
        let steps = if self.interval == 0 { 0 } else { height / self.interval };
        self.base + self.step * steps
    }
}

impl Default for LinearFeeSchedule {
    fn default() -> Self {
        Self {
            base: Amount::new(COIN / 2 + 1234),
            step: Amount::new(COIN / 10 + 17),
            interval: 10_000,
        }
    }
}

/// Fee charged on Update operations.
///
/// Activation always pays the rounded network fee. What an update pays differs between
/// the alias and data flavours of the protocol, so it is configured explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "amount")]
pub enum UpdateFeePolicy {
    /// Same rounded network fee as activation.
    NetworkFee,
    /// No anti-squat fee.
    Zero,
    /// A fixed amount, rounded up to `CENT`.
    Fixed(Amount),
}

impl UpdateFeePolicy {
    /// Resolves the policy against the network fee at the current height.
    pub fn resolve(&self, network_fee: Amount) -> Amount {
        match self {
            UpdateFeePolicy::NetworkFee => network_fee,
            UpdateFeePolicy::Zero => Amount::ZERO,
            UpdateFeePolicy::Fixed(amount) => round_up_to_cent(*amount),
        }
    }
}
