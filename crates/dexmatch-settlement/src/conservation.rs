//! Supply conservation checks.
//!
//! Per trade, nothing is created or destroyed in either token:
//! ```text
//! quote paid = quote received + taker fee + maker fee
//! base paid  = base received
//! ```
//! The fees are credited to the relayer owners, so the quote identity is
//! exactly balanced once fees are counted as received.
//!
//! [`SupplyAudit`] applies the same idea across many settlements: it records
//! the expected total supply of each token and compares it against the
//! ledger's actual sum of balances.

use std::collections::BTreeMap;

use dexmatch_types::{Address, DexError, Result, Side, U256};

use crate::balance::SettleBalance;

/// Re-derive the per-token identities of one trade.
pub fn verify_conservation(balance: &SettleBalance, taker_side: Side) -> Result<()> {
    let quote_payer = balance.quote_payer(taker_side);
    let base_payer = balance.base_payer(taker_side);

    if quote_payer.out_token != base_payer.in_token || base_payer.out_token != quote_payer.in_token
    {
        return Err(DexError::SupplyInvariantViolation {
            reason: "token legs do not pair up".into(),
        });
    }

    let received = base_payer
        .in_total
        .checked_add(balance.taker.fee)
        .and_then(|v| v.checked_add(balance.maker.fee))
        .ok_or_else(|| DexError::ArithmeticOverflow {
            context: "quote received plus fees".into(),
        })?;
    if quote_payer.out_total != received {
        return Err(DexError::SupplyInvariantViolation {
            reason: format!(
                "quote paid {} != quote received {} + fees {} + {}",
                quote_payer.out_total, base_payer.in_total, balance.taker.fee, balance.maker.fee
            ),
        });
    }
    if base_payer.out_total != quote_payer.in_total {
        return Err(DexError::SupplyInvariantViolation {
            reason: format!(
                "base paid {} != base received {}",
                base_payer.out_total, quote_payer.in_total
            ),
        });
    }
    Ok(())
}

/// Tracks expected per-token supply and validates it against the ledger.
#[derive(Debug, Clone, Default)]
pub struct SupplyAudit {
    expected: BTreeMap<Address, U256>,
}

impl SupplyAudit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mint into the ledger (genesis funding, deposit).
    pub fn record_mint(&mut self, token: Address, amount: U256) {
        let entry = self.expected.entry(token).or_default();
        *entry = entry.saturating_add(amount);
    }

    #[must_use]
    pub fn expected_supply(&self, token: &Address) -> U256 {
        self.expected.get(token).copied().unwrap_or_default()
    }

    /// Compare the actual sum of balances against the expected supply.
    pub fn verify(&self, token: &Address, actual_supply: U256) -> Result<()> {
        let expected = self.expected_supply(token);
        if actual_supply != expected {
            return Err(DexError::SupplyInvariantViolation {
                reason: format!(
                    "token {token:?}: actual supply {actual_supply} != expected {expected}"
                ),
            });
        }
        Ok(())
    }

    pub fn tracked_tokens(&self) -> impl Iterator<Item = &Address> {
        self.expected.keys()
    }
}
