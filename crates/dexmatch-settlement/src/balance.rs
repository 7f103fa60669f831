//! Turning an agreed quantity into per-party token movements and fees.

use serde::{Deserialize, Serialize};

use dexmatch_types::{Address, DexError, Result, Side, U256, mul_div};

use crate::conservation::verify_conservation;

/// Everything needed to price one fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeTerms {
    pub base_token: Address,
    pub quote_token: Address,
    pub taker_side: Side,
    /// Execution (maker) price.
    pub price: U256,
    pub quantity: U256,
    pub taker_fee_rate: U256,
    pub maker_fee_rate: U256,
    /// `10^decimals` of the base token.
    pub base_decimal: U256,
}

/// What one party pays and receives. Fees are in the quote token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideBalance {
    pub in_token: Address,
    pub in_total: U256,
    pub out_token: Address,
    pub out_total: U256,
    pub fee: U256,
}

/// Token movements of one trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleBalance {
    pub taker: SideBalance,
    pub maker: SideBalance,
}

impl SettleBalance {
    /// The side paying quote tokens.
    #[must_use]
    pub fn quote_payer(&self, taker_side: Side) -> &SideBalance {
        match taker_side {
            Side::Bid => &self.taker,
            Side::Ask => &self.maker,
        }
    }

    /// The side paying base tokens.
    #[must_use]
    pub fn base_payer(&self, taker_side: Side) -> &SideBalance {
        match taker_side {
            Side::Bid => &self.maker,
            Side::Ask => &self.taker,
        }
    }
}

/// Compute the taker/maker in/out totals and fees for `terms`.
///
/// The quote payer pays `quote + own fee`; the quote receiver receives
/// `quote − own fee`. Fails with [`DexError::SettlementFailed`] if either fee
/// is not strictly below the gross quote amount.
pub fn get_settle_balance(terms: &TradeTerms, fee_base: &U256) -> Result<SettleBalance> {
    let quote = mul_div(&terms.quantity, &terms.price, &terms.base_decimal)?;
    let taker_fee = mul_div(&quote, &terms.taker_fee_rate, fee_base)?;
    let maker_fee = mul_div(&quote, &terms.maker_fee_rate, fee_base)?;
    if taker_fee >= quote || maker_fee >= quote {
        return Err(DexError::SettlementFailed {
            reason: format!(
                "fee exceeds gross quote amount: quote={quote}, taker_fee={taker_fee}, maker_fee={maker_fee}"
            ),
        });
    }

    let pays_quote = |fee: U256| -> Result<SideBalance> {
        Ok(SideBalance {
            in_token: terms.base_token,
            in_total: terms.quantity,
            out_token: terms.quote_token,
            out_total: quote
                .checked_add(fee)
                .ok_or_else(|| DexError::ArithmeticOverflow {
                    context: "quote plus fee".into(),
                })?,
            fee,
        })
    };
    let pays_base = |fee: U256| SideBalance {
        in_token: terms.quote_token,
        in_total: quote - fee,
        out_token: terms.base_token,
        out_total: terms.quantity,
        fee,
    };

    let balance = match terms.taker_side {
        Side::Bid => SettleBalance {
            taker: pays_quote(taker_fee)?,
            maker: pays_base(maker_fee),
        },
        Side::Ask => SettleBalance {
            taker: pays_base(taker_fee),
            maker: pays_quote(maker_fee)?,
        },
    };
    verify_conservation(&balance, terms.taker_side)?;
    Ok(balance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(taker_side: Side) -> TradeTerms {
        TradeTerms {
            base_token: Address::from_low_u64_be(0xB),
            quote_token: Address::from_low_u64_be(0xC),
            taker_side,
            price: U256::from(100),
            quantity: U256::from(40_000),
            taker_fee_rate: U256::from(10),
            maker_fee_rate: U256::from(20),
            base_decimal: U256::from(1_000),
        }
    }

    fn fee_base() -> U256 {
        U256::from(10_000)
    }

    #[test]
    fn bid_taker_pays_quote_plus_fee() {
        let sb = get_settle_balance(&terms(Side::Bid), &fee_base()).unwrap();
        // quote = 40000 × 100 / 1000 = 4000; taker fee 4; maker fee 8
        assert_eq!(sb.taker.out_token, Address::from_low_u64_be(0xC));
        assert_eq!(sb.taker.out_total, U256::from(4_004));
        assert_eq!(sb.taker.in_total, U256::from(40_000));
        assert_eq!(sb.maker.out_total, U256::from(40_000));
        assert_eq!(sb.maker.in_total, U256::from(3_992));
        assert_eq!(sb.taker.fee, U256::from(4));
        assert_eq!(sb.maker.fee, U256::from(8));
    }

    #[test]
    fn ask_taker_mirror() {
        let sb = get_settle_balance(&terms(Side::Ask), &fee_base()).unwrap();
        assert_eq!(sb.taker.out_token, Address::from_low_u64_be(0xB));
        assert_eq!(sb.taker.out_total, U256::from(40_000));
        assert_eq!(sb.taker.in_total, U256::from(3_996));
        assert_eq!(sb.maker.out_total, U256::from(4_008));
        assert_eq!(sb.maker.in_total, U256::from(40_000));
        assert_eq!(sb.quote_payer(Side::Ask), &sb.maker);
        assert_eq!(sb.base_payer(Side::Ask), &sb.taker);
    }

    #[test]
    fn fee_at_or_above_gross_fails() {
        let mut t = terms(Side::Bid);
        t.taker_fee_rate = U256::from(10_000);
        let err = get_settle_balance(&t, &fee_base()).unwrap_err();
        assert!(matches!(err, DexError::SettlementFailed { .. }));
        assert!(err.is_fatal());

        // Zero gross quote with zero fee is still degenerate.
        let mut t = terms(Side::Ask);
        t.quantity = U256::from(1);
        t.taker_fee_rate = U256::zero();
        t.maker_fee_rate = U256::zero();
        assert!(get_settle_balance(&t, &fee_base()).is_err());
    }
}
