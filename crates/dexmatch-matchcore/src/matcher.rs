//! The matching engine: one incoming order against the book.
//!
//! ```text
//! process_order(state, ledger, ctx, order) -> OrderOutcome { order, trades, rejects }
//! ```
//!
//! ## Steps
//!
//! 1. Nonce: must equal the user's ledger nonce. Lower or higher is a
//!    retryable error that touches neither the nonce nor the book.
//!    Otherwise the nonce is consumed, whatever happens next.
//! 2. Validation: positive price (limit orders and cancels), positive
//!    quantity, known base token, pair name that fits its record field.
//! 3. Cancels remove the target from the book and charge the cancel fee.
//! 4. Crossing: walk the opposing side best price first and, within a
//!    level, lowest order id first. Each fill is sized by
//!    [`get_trade_quantity`] and applied by [`settle_balance`].
//!    - a taker that cannot trade is rejected and crossing stops
//!    - a maker that cannot trade is removed from the book and crossing
//!      continues
//!    - at most `max_price_levels` opposing levels are visited
//! 5. Remainder: a limit order rests under a fresh order id, a market
//!    order's remainder is dropped.
//!
//! Steps 2 to 5 run under a journal snapshot: a permanent reject raised as
//! an error rolls them back and is reported as a rejected order, with the
//! nonce still consumed.

use dexmatch_settlement::{
    CancelOutcome, Ledger, SettleOutcome, TradeQuantity, get_trade_quantity, settle_balance,
    settle_cancel,
};
use dexmatch_trie::Database;
use dexmatch_types::constants::PAIR_NAME_LENGTH;
use dexmatch_types::{
    Address, DexError, EngineConfig, MarketId, Order, OrderStatus, OrderType, RejectReason,
    RejectedOrder, Result, Trade, U256,
};

use crate::state::TradingState;

/// Block-level inputs shared by every order of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    /// Block proposer; receives matching and relayer cancel fees.
    pub coinbase: Address,
    pub timestamp: u64,
}

/// Result of processing one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderOutcome {
    /// The incoming order after processing. Carries its order id if it
    /// rested; for a cancel, the cancelled target.
    pub order: Order,
    pub trades: Vec<Trade>,
    /// The incoming order if it was rejected, plus any makers removed
    /// from the book on the way.
    pub rejects: Vec<RejectedOrder>,
}

impl OrderOutcome {
    fn rejected(mut order: Order, reason: RejectReason, timestamp: u64) -> Self {
        order.reject(timestamp);
        Self {
            rejects: vec![RejectedOrder {
                order: order.clone(),
                reason,
            }],
            order,
            trades: Vec::new(),
        }
    }

    /// Whether the incoming order itself was rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.order.status == OrderStatus::Rejected
    }
}

/// Deterministic single-order matcher.
#[derive(Debug, Clone)]
pub struct MatchingEngine {
    config: EngineConfig,
}

impl MatchingEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process one order. Retryable nonce errors and fatal errors are
    /// returned as `Err`; every permanent reject is an `Ok` outcome.
    pub fn process_order<D: Database, L: Ledger + ?Sized>(
        &self,
        state: &mut TradingState<D>,
        ledger: &mut L,
        ctx: &BlockContext,
        order: Order,
    ) -> Result<OrderOutcome> {
        consume_nonce(ledger, &order)?;

        let state_rev = state.snapshot();
        let ledger_rev = ledger.snapshot();
        let outcome = match self.execute(state, ledger, ctx, order.clone()) {
            Ok(outcome) => outcome,
            Err(err) if !err.is_fatal() => {
                let Some(reason) = RejectReason::from_error(&err) else {
                    return Err(err);
                };
                state.revert_to_snapshot(state_rev)?;
                ledger.revert_to_snapshot(ledger_rev)?;
                OrderOutcome::rejected(order, reason, ctx.timestamp)
            }
            Err(err) => return Err(err),
        };

        if let Some(reject) = outcome.rejects.iter().find(|r| r.order.hash == outcome.order.hash) {
            tracing::warn!(
                user = ?reject.order.user_address,
                hash = %reject.order.hash,
                reason = %reject.reason,
                "Order rejected"
            );
        }
        tracing::info!(
            market = %outcome.order.market(),
            side = %outcome.order.side,
            status = %outcome.order.status,
            order_id = outcome.order.order_id,
            trades = outcome.trades.len(),
            rejects = outcome.rejects.len(),
            "Order processed"
        );
        Ok(outcome)
    }

    fn execute<D: Database, L: Ledger + ?Sized>(
        &self,
        state: &mut TradingState<D>,
        ledger: &mut L,
        ctx: &BlockContext,
        mut order: Order,
    ) -> Result<OrderOutcome> {
        order.updated_at = ctx.timestamp;
        validate(ledger, &order)?;
        if order.is_cancel() {
            return self.cancel(state, ledger, ctx, order);
        }
        self.cross(state, ledger, ctx, order)
    }

    // =====================================================================
    // Crossing
    // =====================================================================

    fn cross<D: Database, L: Ledger + ?Sized>(
        &self,
        state: &mut TradingState<D>,
        ledger: &mut L,
        ctx: &BlockContext,
        mut order: Order,
    ) -> Result<OrderOutcome> {
        let market = order.market();
        let opposite = order.side.opposite();
        let mut trades = Vec::new();
        let mut rejects = Vec::new();
        let mut levels_visited = 0usize;
        let mut budget_exhausted = false;
        let mut taker_reject: Option<RejectReason> = None;

        'levels: while !order.quantity.is_zero() {
            let Some(price) = state.best_price(&market, opposite)? else {
                break;
            };
            if !order.crosses(&price) {
                break;
            }
            if levels_visited == self.config.max_price_levels {
                budget_exhausted = true;
                break;
            }
            levels_visited += 1;

            while !order.quantity.is_zero() {
                let Some(maker) = state.best_order_at(&market, opposite, &price)? else {
                    break;
                };
                let quantity = match get_trade_quantity(&*ledger, &order, &maker, &self.config)? {
                    TradeQuantity::Trade(quantity) => quantity,
                    TradeQuantity::RejectTaker(why) => {
                        taker_reject = Some(why.into());
                        break 'levels;
                    }
                    TradeQuantity::RejectMaker(why) => {
                        drop_maker(state, &market, &maker, why.into(), ctx, &mut rejects)?;
                        continue;
                    }
                };
                let balance = match settle_balance(
                    ledger,
                    &self.config,
                    &ctx.coinbase,
                    &order,
                    &maker,
                    quantity,
                )? {
                    SettleOutcome::Settled(balance) => balance,
                    SettleOutcome::RejectTaker(reason) => {
                        taker_reject = Some(reason);
                        break 'levels;
                    }
                    SettleOutcome::RejectMaker(reason) => {
                        drop_maker(state, &market, &maker, reason, ctx, &mut rejects)?;
                        continue;
                    }
                };

                state.reduce_order(&market, maker.order_id, quantity, ctx.timestamp)?;
                order.apply_fill(&quantity, ctx.timestamp);
                let trade = Trade::new(
                    &order,
                    &maker,
                    quantity,
                    balance.taker.fee,
                    balance.maker.fee,
                    ctx.timestamp,
                );
                tracing::debug!(
                    trade = %trade.hash,
                    taker = ?trade.taker,
                    maker = ?trade.maker,
                    maker_order = maker.order_id,
                    price = %trade.price,
                    qty = %trade.quantity,
                    "Trade matched"
                );
                trades.push(trade);
            }
        }

        if let Some(reason) = taker_reject {
            order.reject(ctx.timestamp);
            rejects.push(RejectedOrder {
                order: order.clone(),
                reason,
            });
            return Ok(OrderOutcome {
                order,
                trades,
                rejects,
            });
        }

        if !order.quantity.is_zero() {
            match order.order_type {
                OrderType::Market => {
                    tracing::debug!(
                        market = %market,
                        remainder = %order.quantity,
                        "Market order remainder dropped"
                    );
                }
                OrderType::Limit if budget_exhausted => {
                    tracing::warn!(
                        market = %market,
                        levels = levels_visited,
                        remainder = %order.quantity,
                        "Level budget exhausted with the book still crossing"
                    );
                    order.reject(ctx.timestamp);
                    rejects.push(RejectedOrder {
                        order: order.clone(),
                        reason: RejectReason::LevelBudgetExhausted,
                    });
                }
                OrderType::Limit => {
                    state.insert_resting_order(&mut order, ctx.timestamp)?;
                }
            }
        }

        Ok(OrderOutcome {
            order,
            trades,
            rejects,
        })
    }

    // =====================================================================
    // Cancellation
    // =====================================================================

    fn cancel<D: Database, L: Ledger + ?Sized>(
        &self,
        state: &mut TradingState<D>,
        ledger: &mut L,
        ctx: &BlockContext,
        request: Order,
    ) -> Result<OrderOutcome> {
        let market = request.market();
        let refuse = |request: Order, reason: String| {
            Ok(OrderOutcome::rejected(
                request,
                RejectReason::CancelRejected(reason),
                ctx.timestamp,
            ))
        };

        let order_id = request.order_id;
        let Some(target) = state.order_by_id(&market, order_id)? else {
            return refuse(request, format!("order {order_id} not found"));
        };
        if target.user_address != request.user_address {
            return refuse(request, "not the order owner".into());
        }
        if target.hash != request.hash {
            return refuse(request, "order hash mismatch".into());
        }
        if !target.status.is_live() {
            return refuse(request, format!("order is {}", target.status));
        }

        match settle_cancel(ledger, &self.config, &ctx.coinbase, &target)? {
            CancelOutcome::Rejected(reason) => {
                Ok(OrderOutcome::rejected(request, reason, ctx.timestamp))
            }
            CancelOutcome::Settled { fee, .. } => {
                state.remove_order(&market, target.order_id, OrderStatus::Cancelled, ctx.timestamp)?;
                let cancelled = state.order_by_id(&market, target.order_id)?.ok_or(
                    DexError::OrderNotFound {
                        order_id: target.order_id,
                    },
                )?;
                tracing::debug!(
                    market = %market,
                    order_id = target.order_id,
                    remaining = %target.quantity,
                    %fee,
                    "Order cancelled"
                );
                Ok(OrderOutcome {
                    order: cancelled,
                    trades: Vec::new(),
                    rejects: Vec::new(),
                })
            }
        }
    }
}

/// Check the order nonce against the ledger and consume it.
fn consume_nonce<L: Ledger + ?Sized>(ledger: &mut L, order: &Order) -> Result<()> {
    let expected = ledger.nonce(&order.user_address);
    let current = U256::from(expected);
    if order.nonce < current {
        return Err(DexError::NonceTooLow {
            expected,
            got: order.nonce,
        });
    }
    if order.nonce > current {
        return Err(DexError::NonceTooHigh {
            expected,
            got: order.nonce,
        });
    }
    let next = expected
        .checked_add(1)
        .ok_or_else(|| DexError::ArithmeticOverflow {
            context: "user nonce".into(),
        })?;
    ledger.set_nonce(&order.user_address, next);
    Ok(())
}

/// Structural checks; every failure is a permanent reject.
fn validate<L: Ledger + ?Sized>(ledger: &L, order: &Order) -> Result<()> {
    let invalid = |reason: String| Err(DexError::InvalidOrder { reason });
    let needs_price = order.order_type == OrderType::Limit || order.is_cancel();
    if needs_price && order.price.is_zero() {
        return Err(DexError::InvalidPrice { price: order.price });
    }
    if order.quantity.is_zero() {
        return Err(DexError::InvalidQuantity {
            quantity: order.quantity,
        });
    }
    if order.base_token == order.quote_token {
        return invalid("base and quote token are the same".into());
    }
    if order.pair_name.len() > PAIR_NAME_LENGTH {
        return invalid(format!("pair name longer than {PAIR_NAME_LENGTH} bytes"));
    }
    // The record field is zero padded.
    if order.pair_name.contains('\0') {
        return invalid("pair name contains a NUL byte".into());
    }
    if ledger.token_decimal(&order.base_token).is_err() {
        return invalid("unknown base token".into());
    }
    Ok(())
}

fn drop_maker<D: Database>(
    state: &mut TradingState<D>,
    market: &MarketId,
    maker: &Order,
    reason: RejectReason,
    ctx: &BlockContext,
    rejects: &mut Vec<RejectedOrder>,
) -> Result<()> {
    state.remove_order(market, maker.order_id, OrderStatus::Rejected, ctx.timestamp)?;
    tracing::warn!(
        market = %market,
        maker = ?maker.user_address,
        order_id = maker.order_id,
        %reason,
        "Maker removed from book"
    );
    let mut removed = maker.clone();
    removed.reject(ctx.timestamp);
    rejects.push(RejectedOrder {
        order: removed,
        reason,
    });
    Ok(())
}
