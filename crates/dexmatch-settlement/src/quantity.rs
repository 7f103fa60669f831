//! Maximum tradable quantity between a taker and a maker.
//!
//! The quote payer (the bid) must cover `quote + fee`, where
//! `quote = qty × price / base_decimal` and `fee = quote × rate / fee_base`.
//! The base payer (the ask) must cover `qty`. When a side is short the
//! quantity is recomputed from its balance:
//!
//! ```text
//! quote payer: qty = balance × base_decimal × fee_base / (price × (fee_base + rate))
//! base payer:  qty = balance
//! ```
//!
//! A side whose affordable quantity rounds to zero, or moves no quote
//! tokens, is rejected.

use dexmatch_types::{EngineConfig, Order, RejectReason, Result, Side, U256, U512, mul_div};

use crate::ledger::Ledger;

/// Outcome of [`get_trade_quantity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeQuantity {
    /// Both sides can honour this quantity (> 0).
    Trade(U256),
    RejectTaker(QuantityReject),
    RejectMaker(QuantityReject),
}

/// Why a side cannot trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityReject {
    InsufficientBalance,
    FeeRateTooHigh,
    /// The traded quantity would move no quote tokens.
    Dust,
}

impl From<QuantityReject> for RejectReason {
    fn from(why: QuantityReject) -> Self {
        match why {
            QuantityReject::InsufficientBalance => Self::InsufficientBalance,
            QuantityReject::FeeRateTooHigh => Self::FeeRateTooHigh,
            QuantityReject::Dust => Self::DustTrade,
        }
    }
}

/// Fee rate the order pays in this role.
#[must_use]
pub fn fee_rate(order: &Order, is_taker: bool) -> U256 {
    if is_taker { order.taker_fee } else { order.maker_fee }
}

/// Compute the quantity the taker and maker can both honour, capped at
/// `min(taker.quantity, maker.quantity)`. Trades execute at the maker's price.
pub fn get_trade_quantity<L: Ledger + ?Sized>(
    ledger: &L,
    taker: &Order,
    maker: &Order,
    cfg: &EngineConfig,
) -> Result<TradeQuantity> {
    let reject = |taker_side: bool, why| {
        if taker_side {
            TradeQuantity::RejectTaker(why)
        } else {
            TradeQuantity::RejectMaker(why)
        }
    };

    if taker.taker_fee >= cfg.fee_base {
        return Ok(TradeQuantity::RejectTaker(QuantityReject::FeeRateTooHigh));
    }
    if maker.maker_fee >= cfg.fee_base {
        return Ok(TradeQuantity::RejectMaker(QuantityReject::FeeRateTooHigh));
    }

    let price = maker.price;
    let decimal = ledger.token_decimal(&maker.base_token)?;
    let mut quantity = taker.quantity.min(maker.quantity);

    let taker_is_bid = taker.side == Side::Bid;
    let (buyer, seller) = if taker_is_bid { (taker, maker) } else { (maker, taker) };
    let buyer_rate = fee_rate(buyer, taker_is_bid);
    // Which side's balance last shrank the quantity: `Some(true)` for the taker.
    let mut capped_by: Option<bool> = None;

    // Quote payer.
    let quote_balance = ledger.token_balance(&buyer.quote_token, &buyer.user_address);
    let quote = mul_div(&quantity, &price, &decimal)?;
    let fee = mul_div(&quote, &buyer_rate, &cfg.fee_base)?;
    if quote_balance < quote.saturating_add(fee) {
        let affordable = affordable_by_quote(&quote_balance, &decimal, &price, &buyer_rate, cfg)?;
        if affordable.is_zero() {
            return Ok(reject(taker_is_bid, QuantityReject::InsufficientBalance));
        }
        if affordable < quantity {
            quantity = affordable;
            capped_by = Some(taker_is_bid);
        }
    }

    // Base payer.
    let base_balance = ledger.token_balance(&seller.base_token, &seller.user_address);
    if base_balance < quantity {
        if base_balance.is_zero() {
            return Ok(reject(!taker_is_bid, QuantityReject::InsufficientBalance));
        }
        quantity = base_balance;
        capped_by = Some(!taker_is_bid);
    }

    // Dust: blame the side whose balance shrank the fill; with no balance
    // cap, the side whose remainder is that small.
    if mul_div(&quantity, &price, &decimal)?.is_zero() {
        let taker_side = capped_by.unwrap_or(taker.quantity <= maker.quantity);
        return Ok(reject(taker_side, QuantityReject::Dust));
    }
    Ok(TradeQuantity::Trade(quantity))
}

fn affordable_by_quote(
    balance: &U256,
    decimal: &U256,
    price: &U256,
    rate: &U256,
    cfg: &EngineConfig,
) -> Result<U256> {
    let numerator = balance.full_mul(*decimal);
    // balance × decimal × fee_base can exceed 512 bits only if both factors
    // are near the top of their range; saturate instead of failing.
    let numerator = mul_u512(numerator, cfg.fee_base);
    let denominator = price.full_mul(cfg.fee_base.saturating_add(*rate));
    if denominator.is_zero() {
        return Ok(U256::zero());
    }
    let qty = numerator / denominator;
    Ok(U256::try_from(qty).unwrap_or(U256::MAX))
}

fn mul_u512(a: U512, b: U256) -> U512 {
    a.checked_mul(U512::from(b)).unwrap_or(U512::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use dexmatch_types::Address;

    const UNIT: u64 = 1_000;

    fn setup(bid_quote: u64, ask_base: u64) -> (MemoryLedger, Order, Order) {
        let bid = Order::dummy_limit_for_user(
            Address::from_low_u64_be(1),
            Side::Bid,
            U256::from(100),
            U256::from(10 * UNIT),
            0,
        );
        let ask = Order::dummy_limit_for_user(
            Address::from_low_u64_be(2),
            Side::Ask,
            U256::from(100),
            U256::from(10 * UNIT),
            0,
        );
        let mut ledger = MemoryLedger::new();
        ledger.register_token(bid.base_token, 3);
        ledger.deposit(bid.quote_token, bid.user_address, U256::from(bid_quote));
        ledger.deposit(ask.base_token, ask.user_address, U256::from(ask_base));
        (ledger, bid, ask)
    }

    #[test]
    fn fully_funded_trades_min_quantity() {
        let (ledger, bid, mut ask) = setup(1_000_000, 1_000_000);
        ask.quantity = U256::from(4 * UNIT);
        let q = get_trade_quantity(&ledger, &bid, &ask, &EngineConfig::default()).unwrap();
        assert_eq!(q, TradeQuantity::Trade(U256::from(4 * UNIT)));
    }

    #[test]
    fn short_quote_payer_is_scaled_down() {
        // 10 units at 100 = 1000 quote + 0.1% fee = 1001. Balance 500.
        let (ledger, bid, ask) = setup(500, 1_000_000);
        let cfg = EngineConfig::default();
        let q = get_trade_quantity(&ledger, &bid, &ask, &cfg).unwrap();
        let TradeQuantity::Trade(qty) = q else {
            panic!("expected trade, got {q:?}");
        };
        // 500 × 1000 × 10000 / (100 × 10010) = 4995
        assert_eq!(qty, U256::from(4_995));
        let quote = mul_div(&qty, &U256::from(100), &U256::from(UNIT)).unwrap();
        let fee = mul_div(&quote, &bid.taker_fee, &cfg.fee_base).unwrap();
        assert!(quote + fee <= U256::from(500));
    }

    #[test]
    fn broke_taker_rejected() {
        let (ledger, bid, ask) = setup(0, 1_000_000);
        let q = get_trade_quantity(&ledger, &bid, &ask, &EngineConfig::default()).unwrap();
        assert_eq!(q, TradeQuantity::RejectTaker(QuantityReject::InsufficientBalance));
    }

    #[test]
    fn broke_maker_rejected() {
        let (ledger, bid, ask) = setup(1_000_000, 0);
        let q = get_trade_quantity(&ledger, &bid, &ask, &EngineConfig::default()).unwrap();
        assert_eq!(q, TradeQuantity::RejectMaker(QuantityReject::InsufficientBalance));
    }

    #[test]
    fn ask_taker_mirror() {
        let (ledger, bid, ask) = setup(1_000_000, 3 * UNIT);
        // Ask is the taker: its base balance caps the trade.
        let q = get_trade_quantity(&ledger, &ask, &bid, &EngineConfig::default()).unwrap();
        assert_eq!(q, TradeQuantity::Trade(U256::from(3 * UNIT)));
        // Bid maker with no quote is the one rejected.
        let (ledger, bid, ask) = setup(0, 1_000_000);
        let q = get_trade_quantity(&ledger, &ask, &bid, &EngineConfig::default()).unwrap();
        assert_eq!(q, TradeQuantity::RejectMaker(QuantityReject::InsufficientBalance));
    }

    #[test]
    fn excessive_fee_rate_rejected() {
        let (ledger, mut bid, ask) = setup(1_000_000, 1_000_000);
        bid.taker_fee = U256::from(10_000);
        let q = get_trade_quantity(&ledger, &bid, &ask, &EngineConfig::default()).unwrap();
        assert_eq!(q, TradeQuantity::RejectTaker(QuantityReject::FeeRateTooHigh));
    }

    #[test]
    fn dust_remainder_rejected() {
        let (ledger, mut bid, ask) = setup(1_000_000, 1_000_000);
        // 5 base units × 100 / 1000 = 0 quote.
        bid.quantity = U256::from(5);
        let q = get_trade_quantity(&ledger, &bid, &ask, &EngineConfig::default()).unwrap();
        assert_eq!(q, TradeQuantity::RejectTaker(QuantityReject::Dust));
    }

    #[test]
    fn dust_blames_short_maker_not_funded_taker() {
        // Bid maker holds 1 quote unit: affordable 9 base units, 0 quote.
        let (ledger, bid, ask) = setup(1, 1_000_000);
        let q = get_trade_quantity(&ledger, &ask, &bid, &EngineConfig::default()).unwrap();
        assert_eq!(q, TradeQuantity::RejectMaker(QuantityReject::Dust));
    }

    #[test]
    fn dust_blames_short_taker_not_funded_maker() {
        let (ledger, bid, mut ask) = setup(1, 1_000_000);
        ask.quantity = U256::from(5 * UNIT);
        let q = get_trade_quantity(&ledger, &bid, &ask, &EngineConfig::default()).unwrap();
        assert_eq!(q, TradeQuantity::RejectTaker(QuantityReject::Dust));
    }

    #[test]
    fn dust_blames_short_base_payer() {
        // Ask holds 5 base units: 5 × 100 / 1000 = 0 quote.
        let (ledger, bid, ask) = setup(1_000_000, 5);
        let q = get_trade_quantity(&ledger, &bid, &ask, &EngineConfig::default()).unwrap();
        assert_eq!(q, TradeQuantity::RejectMaker(QuantityReject::Dust));
        let q = get_trade_quantity(&ledger, &ask, &bid, &EngineConfig::default()).unwrap();
        assert_eq!(q, TradeQuantity::RejectTaker(QuantityReject::Dust));
    }

    #[test]
    fn unknown_token_is_an_error() {
        let (_, bid, ask) = setup(0, 0);
        let ledger = MemoryLedger::new();
        assert!(get_trade_quantity(&ledger, &bid, &ask, &EngineConfig::default()).is_err());
    }
}
