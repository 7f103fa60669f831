//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{DexError, Result};
use crate::U256;

/// Fee and resource parameters of the matching engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Denominator of maker/taker fee rates.
    pub fee_base: U256,
    /// Native-token fee debited from each relayer's reserve per trade.
    pub matching_fee: U256,
    /// Denominator of the cancel fee rate.
    pub cancel_fee_base: U256,
    /// Native-token fee debited from the relayer's reserve per cancel.
    pub relayer_cancel_fee: U256,
    /// Opposing price levels one order may visit.
    pub max_price_levels: usize,
    /// Read-cache capacity of the keyed store.
    pub store_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_base: U256::from(constants::DEFAULT_FEE_BASE),
            matching_fee: U256::from(constants::DEFAULT_MATCHING_FEE),
            cancel_fee_base: U256::from(constants::DEFAULT_CANCEL_FEE_BASE),
            relayer_cancel_fee: U256::from(constants::DEFAULT_RELAYER_CANCEL_FEE),
            max_price_levels: constants::DEFAULT_MAX_PRICE_LEVELS,
            store_cache_size: constants::DEFAULT_STORE_CACHE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fee_base.is_zero() {
            return Err(DexError::Configuration("fee_base must be positive".into()));
        }
        if self.cancel_fee_base.is_zero() {
            return Err(DexError::Configuration(
                "cancel_fee_base must be positive".into(),
            ));
        }
        if self.max_price_levels == 0 {
            return Err(DexError::Configuration(
                "max_price_levels must be positive".into(),
            ));
        }
        if self.store_cache_size == 0 {
            return Err(DexError::Configuration(
                "store_cache_size must be positive".into(),
            ));
        }
        Ok(())
    }
}
