//! Applying a block's orders in sequence.
//!
//! - `NonceTooLow`: the order is stale and skipped
//! - `NonceTooHigh`: the order and every later order of the same user in
//!   this block are skipped, since none of them can become valid
//! - permanent rejects are collected in the [`BlockOutcome`]
//! - any fatal error reverts the failing order's state and ledger effects
//!   and aborts the block

use std::collections::BTreeSet;

use dexmatch_settlement::Ledger;
use dexmatch_trie::Database;
use dexmatch_types::{Address, DexError, Order, RejectedOrder, Result, Trade};

use crate::determinism::compute_trade_root;
use crate::matcher::{BlockContext, MatchingEngine};
use crate::state::TradingState;

/// Why an order of a block was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NonceTooLow { expected: u64 },
    NonceTooHigh { expected: u64 },
    /// An earlier order of the same user had a nonce gap.
    UserBlocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOrder {
    pub order: Order,
    pub reason: SkipReason,
}

/// Everything a block's orders produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockOutcome {
    /// Each processed order as it ended up (resting, filled, cancelled or
    /// rejected).
    pub processed: Vec<Order>,
    pub trades: Vec<Trade>,
    pub rejects: Vec<RejectedOrder>,
    pub skipped: Vec<SkippedOrder>,
}

impl BlockOutcome {
    /// Trade root of this block's trades.
    #[must_use]
    pub fn trade_root(&self) -> [u8; 32] {
        compute_trade_root(&self.trades)
    }
}

/// Process `orders` in the given order.
pub fn apply_orders<D, L, I>(
    engine: &MatchingEngine,
    state: &mut TradingState<D>,
    ledger: &mut L,
    ctx: &BlockContext,
    orders: I,
) -> Result<BlockOutcome>
where
    D: Database,
    L: Ledger + ?Sized,
    I: IntoIterator<Item = Order>,
{
    let mut block = BlockOutcome::default();
    let mut blocked: BTreeSet<Address> = BTreeSet::new();

    for order in orders {
        if blocked.contains(&order.user_address) {
            block.skipped.push(SkippedOrder {
                order,
                reason: SkipReason::UserBlocked,
            });
            continue;
        }

        let state_rev = state.snapshot();
        let ledger_rev = ledger.snapshot();
        match engine.process_order(state, ledger, ctx, order.clone()) {
            Ok(outcome) => {
                block.processed.push(outcome.order);
                block.trades.extend(outcome.trades);
                block.rejects.extend(outcome.rejects);
            }
            Err(DexError::NonceTooLow { expected, got }) => {
                tracing::debug!(user = ?order.user_address, expected, %got, "Stale nonce, order skipped");
                block.skipped.push(SkippedOrder {
                    order,
                    reason: SkipReason::NonceTooLow { expected },
                });
            }
            Err(DexError::NonceTooHigh { expected, got }) => {
                tracing::debug!(
                    user = ?order.user_address,
                    expected,
                    %got,
                    "Nonce gap, skipping user for the rest of the block"
                );
                blocked.insert(order.user_address);
                block.skipped.push(SkippedOrder {
                    order,
                    reason: SkipReason::NonceTooHigh { expected },
                });
            }
            Err(err) => {
                tracing::error!(
                    user = ?order.user_address,
                    hash = %order.hash,
                    error = %err,
                    "Order processing failed, block aborted"
                );
                state.revert_to_snapshot(state_rev)?;
                ledger.revert_to_snapshot(ledger_rev)?;
                return Err(err);
            }
        }
    }

    tracing::info!(
        processed = block.processed.len(),
        trades = block.trades.len(),
        rejects = block.rejects.len(),
        skipped = block.skipped.len(),
        trade_root = hex::encode(block.trade_root()),
        "Block orders applied"
    );
    Ok(block)
}
