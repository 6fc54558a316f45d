//! Registry configuration, loaded from JSON.
//!
//! Every field has a default, so `{}` is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::core::fee::{Amount, UpdateFeePolicy, MIN_AMOUNT};
use crate::core::history::DEFAULT_SCAN_MAX_COUNT;
use crate::core::lifecycle::LONG_EXPIRATION_DEPTH;
use crate::error::{RegistryError, Result};

/// Maximum alias value length in bytes.
pub const MAX_VALUE_LENGTH: usize = 1023;
/// Maximum data payload length in bytes.
pub const MAX_DATA_LENGTH: usize = 65_536;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Fee charged by alias updates.
    pub update_fee: UpdateFeePolicy,
    /// Fee charged by data updates.
    pub data_update_fee: UpdateFeePolicy,
    /// Value locked in every claim output.
    pub claim_amount: Amount,
    pub max_value_length: usize,
    pub max_data_length: usize,
    /// Default `max_age` of filter queries, in blocks.
    pub filter_max_age: u64,
    /// Default entry cap of `scan` queries.
    pub scan_max_count: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            update_fee: UpdateFeePolicy::NetworkFee,
            data_update_fee: UpdateFeePolicy::Zero,
            claim_amount: MIN_AMOUNT,
            max_value_length: MAX_VALUE_LENGTH,
            max_data_length: MAX_DATA_LENGTH,
            filter_max_age: LONG_EXPIRATION_DEPTH,
            scan_max_count: DEFAULT_SCAN_MAX_COUNT,
        }
    }
}

impl RegistryConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RegistryConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_value_length == 0 {
            return Err(RegistryError::Config("max_value_length must be positive".to_string()));
        }
        if self.max_data_length == 0 {
            return Err(RegistryError::Config("max_data_length must be positive".to_string()));
        }
        if self.scan_max_count == 0 {
            return Err(RegistryError::Config("scan_max_count must be positive".to_string()));
        }
        if self.claim_amount == Amount::ZERO {
            return Err(RegistryError::Config("claim_amount must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(RegistryConfig::from_json_str("{}").unwrap(), RegistryConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = RegistryConfig::from_json_str(
            r#"{"update_fee": {"kind": "fixed", "amount": 1500000}, "scan_max_count": 20}"#,
        )
        .unwrap();
        assert_eq!(config.update_fee, UpdateFeePolicy::Fixed(Amount::new(1_500_000)));
        assert_eq!(config.scan_max_count, 20);
        assert_eq!(config.data_update_fee, UpdateFeePolicy::Zero);
        assert_eq!(config.max_value_length, MAX_VALUE_LENGTH);
    }

    #[test]
    fn test_zero_policy_parses() {
        let config = RegistryConfig::from_json_str(r#"{"update_fee": {"kind": "zero"}}"#).unwrap();
        assert_eq!(config.update_fee, UpdateFeePolicy::Zero);
    }

    #[test]
    fn test_validation_rejects_zero_lengths() {
        assert!(matches!(
            RegistryConfig::from_json_str(r#"{"max_data_length": 0}"#),
            Err(RegistryError::Config(_))
        ));
        assert!(RegistryConfig::from_json_str("not json").is_err());
    }
}
