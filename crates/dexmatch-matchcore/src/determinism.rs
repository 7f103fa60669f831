//! Determinism verification utilities for cross-node consistency.
//!
//! Every node applying the same orders to the same state must produce the
//! same trades. The `trade_root` is a hash over all trades that enables
//! quick verification without comparing full payloads; the state root of
//! [`TradingState`](crate::TradingState) covers the resulting book.

use sha2::{Digest, Sha256};

use dexmatch_types::{DexError, Result, Trade, u256_to_bytes};

/// Compute the trade root hash over a set of trades.
///
/// Covers, per trade in order: the trade and order hashes, timestamp,
/// quantity, price, both parties, both fees and the taker side.
#[must_use]
pub fn compute_trade_root(trades: &[Trade]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"dexmatch:trade_root:v1:");
    hasher.update((trades.len() as u64).to_le_bytes());

    for trade in trades {
        hasher.update(trade.hash.as_bytes());
        hasher.update(trade.taker_order_hash.as_bytes());
        hasher.update(trade.maker_order_hash.as_bytes());
        hasher.update(trade.timestamp.to_le_bytes());
        hasher.update(u256_to_bytes(&trade.quantity));
        hasher.update(u256_to_bytes(&trade.price));
        hasher.update(trade.taker.as_bytes());
        hasher.update(trade.maker.as_bytes());
        hasher.update(u256_to_bytes(&trade.taker_fee));
        hasher.update(u256_to_bytes(&trade.maker_fee));
        hasher.update([trade.taker_side.code()]);
    }

    let result = hasher.finalize();
    let mut root = [0u8; 32];
    root.copy_from_slice(&result);
    root
}

/// Verify that `trades` hash to the root another node reported.
pub fn verify_trade_root(trades: &[Trade], expected_root: &[u8; 32]) -> Result<()> {
    let actual = compute_trade_root(trades);
    if actual != *expected_root {
        return Err(DexError::DeterminismViolation {
            expected: hex::encode(expected_root),
            actual: hex::encode(actual),
        });
    }
    Ok(())
}
