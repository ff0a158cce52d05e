//! Purchase configuration
//!
//! Loaded from JSON; every field has a default so a partial file is valid.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::amount::{platform_fee_raw, PLATFORM_FEE_UNITS, TOKEN_DECIMALS};
use crate::chain::Address;
use crate::error::ConfigError;

/// Namespace under which the ticket list is persisted
pub const DEFAULT_STORE_NAMESPACE: &str = "ticket-purchases";

/// Contract cooldown between funding and emergency recovery
pub const RECOVERY_DELAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurchaseConfig {
    /// Platform token (MJPY) contract
    pub token_address: Address,
    /// Flat fee per ticket, in display units
    pub platform_fee_units: u128,
    /// Implied decimals of the platform token
    pub token_decimals: u32,
    /// Interval for balance and receipt polling
    pub poll_interval_ms: u64,
    /// How long to wait for the stealth address to be funded
    pub funding_timeout_ms: u64,
    /// How long to wait for a submitted transaction to be mined
    pub receipt_timeout_ms: u64,
    /// Confirmations required before a receipt counts
    pub confirmations: u64,
    pub recovery_delay_secs: u64,
    pub store_namespace: String,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            token_address: Address::ZERO,
            platform_fee_units: PLATFORM_FEE_UNITS,
            token_decimals: TOKEN_DECIMALS,
            poll_interval_ms: 2_000,
            funding_timeout_ms: 120_000,
            receipt_timeout_ms: 120_000,
            confirmations: 1,
            recovery_delay_secs: RECOVERY_DELAY_SECS,
            store_namespace: DEFAULT_STORE_NAMESPACE.to_string(),
        }
    }
}

impl PurchaseConfig {
    pub fn with_token(token_address: Address) -> Self {
        Self {
            token_address,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn funding_timeout(&self) -> Duration {
        Duration::from_millis(self.funding_timeout_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }

    /// Platform fee in raw token units
    pub fn platform_fee_raw(&self) -> Option<u128> {
        platform_fee_raw(self.platform_fee_units, self.token_decimals)
    }

    /// Reject values the purchase flow cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.confirmations == 0 {
            return Err(ConfigError::Invalid("confirmations must be at least 1".into()));
        }
        if self.platform_fee_raw().is_none() {
            return Err(ConfigError::Invalid("platform fee overflows".into()));
        }
        if self.store_namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("store_namespace must not be empty".into()));
        }
        // The namespace becomes a file name inside the data directory
        if self.store_namespace.contains(['/', '\\'])
            || self.store_namespace.starts_with('.')
        {
            return Err(ConfigError::Invalid(format!(
                "store_namespace '{}' must be a plain file name",
                self.store_namespace
            )));
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PurchaseConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.platform_fee_raw(), Some(10_000));
        assert_eq!(config.recovery_delay_secs, 86_400);
        assert_eq!(config.store_namespace, "ticket-purchases");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "token_address": "0x1111111111111111111111111111111111111111", "poll_interval_ms": 50 }"#,
        )
        .unwrap();

        let config = PurchaseConfig::from_file(&path).unwrap();
        assert_eq!(config.token_address, Address([0x11; 20]));
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.confirmations, 1);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = PurchaseConfig {
            poll_interval_ms: 0,
            ..PurchaseConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PurchaseConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_namespace_must_stay_in_data_dir() {
        for namespace in ["../outside", "nested/tickets", "..\\win", ".hidden"] {
            let config = PurchaseConfig {
                store_namespace: namespace.into(),
                ..PurchaseConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "accepted {}",
                namespace
            );
        }

        let config = PurchaseConfig {
            store_namespace: "tickets-2026".into(),
            ..PurchaseConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
