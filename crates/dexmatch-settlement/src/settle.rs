//! Applying trades and cancels to the ledger.
//!
//! Settlement of one trade:
//! 1. Resolve both relayer owners and check both fee reserves
//!    (taker side first; a shared relayer must cover two matching fees)
//! 2. Compute the token movements with [`get_settle_balance`]
//! 3. Stage every balance change, debits first, and check them
//! 4. Apply: relayer reserves −matching fee each, proposer owner
//!    +2×matching fee, the four balance movements, then both fee credits
//!
//! Nothing is written to the ledger until every check has passed, so a
//! rejected trade leaves the ledger untouched.

use std::collections::BTreeMap;

use dexmatch_types::{
    Address, DexError, EngineConfig, Order, RejectReason, Result, Side, U256, mul_div,
};

use crate::balance::{SettleBalance, TradeTerms, get_settle_balance};
use crate::ledger::Ledger;
use crate::quantity::fee_rate;

/// Outcome of [`settle_balance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled(SettleBalance),
    RejectTaker(RejectReason),
    RejectMaker(RejectReason),
}

/// Outcome of [`settle_cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Fee charged, in `token`.
    Settled { token: Address, fee: U256 },
    Rejected(RejectReason),
}

/// Balance changes staged against the ledger before any write.
struct Staged<'l, L: Ledger + ?Sized> {
    ledger: &'l L,
    balances: BTreeMap<(Address, Address), U256>,
}

impl<'l, L: Ledger + ?Sized> Staged<'l, L> {
    fn new(ledger: &'l L) -> Self {
        Self {
            ledger,
            balances: BTreeMap::new(),
        }
    }

    fn current(&self, token: Address, owner: Address) -> U256 {
        self.balances
            .get(&(token, owner))
            .copied()
            .unwrap_or_else(|| self.ledger.token_balance(&token, &owner))
    }

    fn debit(&mut self, token: Address, owner: Address, amount: U256) -> Result<()> {
        let available = self.current(token, owner);
        let next = available
            .checked_sub(amount)
            .ok_or(DexError::InsufficientBalance {
                needed: amount,
                available,
            })?;
        self.balances.insert((token, owner), next);
        Ok(())
    }

    fn credit(&mut self, token: Address, owner: Address, amount: U256) -> Result<()> {
        let next = self
            .current(token, owner)
            .checked_add(amount)
            .ok_or_else(|| DexError::ArithmeticOverflow {
                context: "token balance credit".into(),
            })?;
        self.balances.insert((token, owner), next);
        Ok(())
    }

    fn into_writes(self) -> BTreeMap<(Address, Address), U256> {
        self.balances
    }
}

/// Owner of a registered relayer.
fn relayer_owner<L: Ledger + ?Sized>(ledger: &L, relayer: &Address) -> Result<Address> {
    ledger
        .relayer_owner(relayer)
        .ok_or(DexError::RelayerNotRegistered(*relayer))
}

/// Check that a relayer reserve covers `needed`.
fn check_reserve(relayer: &Address, available: U256, needed: U256) -> Result<()> {
    if available < needed {
        return Err(DexError::InsufficientRelayerFee {
            relayer: *relayer,
            needed,
            available,
        });
    }
    Ok(())
}

/// Turn a permanent-reject error into its reason; anything else propagates.
fn reject_reason(err: DexError) -> Result<RejectReason> {
    match RejectReason::from_error(&err) {
        Some(reason) => {
            tracing::debug!(%err, "Settlement refused");
            Ok(reason)
        }
        None => Err(err),
    }
}

/// Settle a fill of `quantity` between `taker` and `maker` at the maker's
/// price. `coinbase` is the block proposer.
pub fn settle_balance<L: Ledger + ?Sized>(
    ledger: &mut L,
    cfg: &EngineConfig,
    coinbase: &Address,
    taker: &Order,
    maker: &Order,
    quantity: U256,
) -> Result<SettleOutcome> {
    let reject_taker = |err: DexError| -> Result<SettleOutcome> {
        Ok(SettleOutcome::RejectTaker(reject_reason(err)?))
    };
    let reject_maker = |err: DexError| -> Result<SettleOutcome> {
        Ok(SettleOutcome::RejectMaker(reject_reason(err)?))
    };

    // 1. Relayers.
    let taker_owner = match relayer_owner(&*ledger, &taker.exchange_address) {
        Ok(owner) => owner,
        Err(err) => return reject_taker(err),
    };
    let maker_owner = match relayer_owner(&*ledger, &maker.exchange_address) {
        Ok(owner) => owner,
        Err(err) => return reject_maker(err),
    };
    let taker_reserve = ledger.relayer_fee(&taker.exchange_address);
    if let Err(err) = check_reserve(&taker.exchange_address, taker_reserve, cfg.matching_fee) {
        return reject_taker(err);
    }
    let maker_reserve = if maker.exchange_address == taker.exchange_address {
        taker_reserve - cfg.matching_fee
    } else {
        ledger.relayer_fee(&maker.exchange_address)
    };
    if let Err(err) = check_reserve(&maker.exchange_address, maker_reserve, cfg.matching_fee) {
        return reject_maker(err);
    }

    // 2. Token movements.
    let terms = TradeTerms {
        base_token: maker.base_token,
        quote_token: maker.quote_token,
        taker_side: taker.side,
        price: maker.price,
        quantity,
        taker_fee_rate: fee_rate(taker, true),
        maker_fee_rate: fee_rate(maker, false),
        base_decimal: ledger.token_decimal(&maker.base_token)?,
    };
    let balance = get_settle_balance(&terms, &cfg.fee_base)?;

    // 3. Stage, debits first.
    let mut staged = Staged::new(&*ledger);
    if let Err(err) = staged.debit(
        balance.taker.out_token,
        taker.user_address,
        balance.taker.out_total,
    ) {
        return reject_taker(err);
    }
    if let Err(err) = staged.debit(
        balance.maker.out_token,
        maker.user_address,
        balance.maker.out_total,
    ) {
        return reject_maker(err);
    }
    staged.credit(balance.taker.in_token, taker.user_address, balance.taker.in_total)?;
    staged.credit(balance.maker.in_token, maker.user_address, balance.maker.in_total)?;
    staged.credit(terms.quote_token, taker_owner, balance.taker.fee)?;
    staged.credit(terms.quote_token, maker_owner, balance.maker.fee)?;
    let writes = staged.into_writes();

    // 4. Apply.
    let reward = cfg
        .matching_fee
        .checked_mul(U256::from(2))
        .ok_or_else(|| DexError::ArithmeticOverflow {
            context: "proposer reward".into(),
        })?;
    ledger.set_relayer_fee(&taker.exchange_address, taker_reserve - cfg.matching_fee);
    let maker_relayer_left = ledger.relayer_fee(&maker.exchange_address) - cfg.matching_fee;
    ledger.set_relayer_fee(&maker.exchange_address, maker_relayer_left);
    let proposer = ledger.proposer_owner(coinbase).unwrap_or(*coinbase);
    ledger.add_native_balance(&proposer, reward)?;
    for ((token, owner), amount) in writes {
        ledger.set_token_balance(&token, &owner, amount);
    }

    tracing::debug!(
        taker = ?taker.user_address,
        maker = ?maker.user_address,
        %quantity,
        price = %maker.price,
        taker_fee = %balance.taker.fee,
        maker_fee = %balance.maker.fee,
        "Trade settled"
    );
    Ok(SettleOutcome::Settled(balance))
}

/// Cancel fee for `order`: BID pays `qty × price / decimal × rate / base`
/// in quote, ASK pays `qty × rate / base` in base.
pub fn cancel_fee(order: &Order, base_decimal: &U256, cfg: &EngineConfig) -> Result<(Address, U256)> {
    match order.side {
        Side::Bid => {
            let quote = mul_div(&order.quantity, &order.price, base_decimal)?;
            let fee = mul_div(&quote, &order.taker_fee, &cfg.cancel_fee_base)?;
            Ok((order.quote_token, fee))
        }
        Side::Ask => {
            let fee = mul_div(&order.quantity, &order.taker_fee, &cfg.cancel_fee_base)?;
            Ok((order.base_token, fee))
        }
    }
}

/// Charge the cancel fee of the resting `order`.
///
/// The fee moves from the user to the relayer owner; the relayer's reserve
/// pays `relayer_cancel_fee` to the proposer owner.
pub fn settle_cancel<L: Ledger + ?Sized>(
    ledger: &mut L,
    cfg: &EngineConfig,
    coinbase: &Address,
    order: &Order,
) -> Result<CancelOutcome> {
    let rejected = |err: DexError| -> Result<CancelOutcome> {
        Ok(CancelOutcome::Rejected(reject_reason(err)?))
    };
    let owner = match relayer_owner(&*ledger, &order.exchange_address) {
        Ok(owner) => owner,
        Err(err) => return rejected(err),
    };
    let reserve = ledger.relayer_fee(&order.exchange_address);
    if let Err(err) = check_reserve(&order.exchange_address, reserve, cfg.relayer_cancel_fee) {
        return rejected(err);
    }
    let decimal = ledger.token_decimal(&order.base_token)?;
    let (token, fee) = cancel_fee(order, &decimal, cfg)?;

    let mut staged = Staged::new(&*ledger);
    if let Err(err) = staged.debit(token, order.user_address, fee) {
        return rejected(err);
    }
    staged.credit(token, owner, fee)?;
    let writes = staged.into_writes();

    ledger.set_relayer_fee(&order.exchange_address, reserve - cfg.relayer_cancel_fee);
    let proposer = ledger.proposer_owner(coinbase).unwrap_or(*coinbase);
    ledger.add_native_balance(&proposer, cfg.relayer_cancel_fee)?;
    for ((token, owner), amount) in writes {
        ledger.set_token_balance(&token, &owner, amount);
    }
    tracing::debug!(user = ?order.user_address, %fee, "Cancel fee settled");
    Ok(CancelOutcome::Settled { token, fee })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn cfg() -> EngineConfig {
        EngineConfig {
            matching_fee: U256::from(10),
            relayer_cancel_fee: U256::from(3),
            ..EngineConfig::default()
        }
    }

    /// Bid taker (user 1) vs ask maker (user 2), both via relayer 0xE0.
    fn setup() -> (MemoryLedger, Order, Order) {
        let bid = Order::dummy_limit_for_user(addr(1), Side::Bid, U256::from(100), U256::from(40_000), 0);
        let ask = Order::dummy_limit_for_user(addr(2), Side::Ask, U256::from(100), U256::from(40_000), 0);
        let mut ledger = MemoryLedger::new();
        ledger.register_token(bid.base_token, 3);
        ledger.register_relayer(bid.exchange_address, addr(0x0E), U256::from(100));
        ledger.register_proposer(addr(0xC0), addr(0xC1));
        ledger.deposit(bid.quote_token, addr(1), U256::from(10_000));
        ledger.deposit(ask.base_token, addr(2), U256::from(100_000));
        (ledger, bid, ask)
    }

    #[test]
    fn settles_and_moves_fees() {
        let (mut ledger, bid, ask) = setup();
        let out = settle_balance(&mut ledger, &cfg(), &addr(0xC0), &bid, &ask, U256::from(40_000)).unwrap();
        assert!(matches!(out, SettleOutcome::Settled(_)));

        // quote 4000, taker fee 4, maker fee 4 (both rates 10 bps)
        assert_eq!(ledger.token_balance(&bid.quote_token, &addr(1)), U256::from(5_996));
        assert_eq!(ledger.token_balance(&bid.base_token, &addr(1)), U256::from(40_000));
        assert_eq!(ledger.token_balance(&ask.base_token, &addr(2)), U256::from(60_000));
        assert_eq!(ledger.token_balance(&ask.quote_token, &addr(2)), U256::from(3_996));
        assert_eq!(ledger.token_balance(&bid.quote_token, &addr(0x0E)), U256::from(8));
        assert_eq!(ledger.relayer_fee(&bid.exchange_address), U256::from(80));
        assert_eq!(ledger.native_balance(&addr(0xC1)), U256::from(20));

        // Nothing created or destroyed.
        assert_eq!(ledger.total_supply(&bid.quote_token), U256::from(10_000));
        assert_eq!(ledger.total_supply(&bid.base_token), U256::from(100_000));
    }

    #[test]
    fn unknown_relayer_rejects_side() {
        let (mut ledger, bid, mut ask) = setup();
        ask.exchange_address = addr(0xFF);
        let out = settle_balance(&mut ledger, &cfg(), &addr(0xC0), &bid, &ask, U256::from(1_000)).unwrap();
        assert_eq!(out, SettleOutcome::RejectMaker(RejectReason::RelayerNotRegistered));
        assert_eq!(ledger.relayer_fee(&bid.exchange_address), U256::from(100));
    }

    #[test]
    fn shared_relayer_needs_two_fees() {
        let (mut ledger, bid, ask) = setup();
        ledger.register_relayer(bid.exchange_address, addr(0x0E), U256::from(15));
        let out = settle_balance(&mut ledger, &cfg(), &addr(0xC0), &bid, &ask, U256::from(1_000)).unwrap();
        assert_eq!(out, SettleOutcome::RejectMaker(RejectReason::InsufficientRelayerFee));
        ledger.register_relayer(bid.exchange_address, addr(0x0E), U256::from(5));
        let out = settle_balance(&mut ledger, &cfg(), &addr(0xC0), &bid, &ask, U256::from(1_000)).unwrap();
        assert_eq!(out, SettleOutcome::RejectTaker(RejectReason::InsufficientRelayerFee));
    }

    #[test]
    fn short_balance_rejects_without_writes() {
        let (mut ledger, bid, ask) = setup();
        let snap = ledger.snapshot();
        let out = settle_balance(&mut ledger, &cfg(), &addr(0xC0), &bid, &ask, U256::from(200_000)).unwrap();
        assert_eq!(out, SettleOutcome::RejectTaker(RejectReason::InsufficientBalance));
        assert_eq!(ledger.snapshot(), snap);
    }

    #[test]
    fn proposer_without_owner_is_paid_directly() {
        let (mut ledger, bid, ask) = setup();
        settle_balance(&mut ledger, &cfg(), &addr(0xAB), &bid, &ask, U256::from(1_000)).unwrap();
        assert_eq!(ledger.native_balance(&addr(0xAB)), U256::from(20));
    }

    #[test]
    fn staged_debit_reports_shortfall() {
        let (ledger, bid, _) = setup();
        let mut staged = Staged::new(&ledger);
        staged.debit(bid.quote_token, addr(1), U256::from(4_000)).unwrap();
        let err = staged
            .debit(bid.quote_token, addr(1), U256::from(7_000))
            .unwrap_err();
        assert!(matches!(
            err,
            DexError::InsufficientBalance { needed, available }
                if needed == U256::from(7_000) && available == U256::from(6_000)
        ));
        assert!(err.to_string().starts_with("DEX_ERR_200"));
    }

    #[test]
    fn relayer_checks_raise_coded_errors() {
        let (ledger, _, _) = setup();
        let err = relayer_owner(&ledger, &addr(0xFF)).unwrap_err();
        assert!(matches!(err, DexError::RelayerNotRegistered(a) if a == addr(0xFF)));
        let err = check_reserve(&addr(0xE0), U256::from(5), U256::from(10)).unwrap_err();
        assert_eq!(
            reject_reason(err).unwrap(),
            RejectReason::InsufficientRelayerFee
        );
        let fatal = DexError::Internal("boom".into());
        assert!(reject_reason(fatal).is_err());
    }

    #[test]
    fn cancel_fee_per_side() {
        let (_, bid, ask) = setup();
        let decimal = U256::from(1_000);
        // BID: 40000 × 100 / 1000 = 4000 quote × 10 / 100000 = 0
        assert_eq!(cancel_fee(&bid, &decimal, &cfg()).unwrap(), (bid.quote_token, U256::zero()));
        // ASK: 40000 × 10 / 100000 = 4 base
        assert_eq!(cancel_fee(&ask, &decimal, &cfg()).unwrap(), (ask.base_token, U256::from(4)));
    }

    #[test]
    fn settle_cancel_charges_user_and_relayer() {
        let (mut ledger, _, ask) = setup();
        let out = settle_cancel(&mut ledger, &cfg(), &addr(0xC0), &ask).unwrap();
        assert_eq!(
            out,
            CancelOutcome::Settled {
                token: ask.base_token,
                fee: U256::from(4)
            }
        );
        assert_eq!(ledger.token_balance(&ask.base_token, &addr(2)), U256::from(99_996));
        assert_eq!(ledger.token_balance(&ask.base_token, &addr(0x0E)), U256::from(4));
        assert_eq!(ledger.relayer_fee(&ask.exchange_address), U256::from(97));
        assert_eq!(ledger.native_balance(&addr(0xC1)), U256::from(3));
    }

    #[test]
    fn cancel_without_funds_is_rejected() {
        let (mut ledger, _, mut ask) = setup();
        ask.user_address = addr(77);
        let out = settle_cancel(&mut ledger, &cfg(), &addr(0xC0), &ask).unwrap();
        assert_eq!(out, CancelOutcome::Rejected(RejectReason::InsufficientBalance));
    }
}
