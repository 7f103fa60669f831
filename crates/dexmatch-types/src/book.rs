//! Order-book aggregates: price levels, book sides and the per-market
//! exchange object.

use serde::{Deserialize, Serialize};

use crate::{EMPTY_KEY, H256, Side, U256};

/// One price level: the orders resting at a single price.
///
/// `head` and `tail` are the min/max keys of the level's order-id
/// sub-index, whose commitment is `orders_root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Sum of the remaining quantities indexed under this price.
    pub volume: U256,
    pub price: U256,
    pub head: H256,
    pub tail: H256,
    /// Number of resting orders.
    pub length: u64,
    pub orders_root: H256,
}

impl PriceLevel {
    #[must_use]
    pub fn empty(price: U256) -> Self {
        Self {
            volume: U256::zero(),
            price,
            head: EMPTY_KEY,
            tail: EMPTY_KEY,
            length: 0,
            orders_root: EMPTY_KEY,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volume.is_zero()
    }
}

/// Aggregate for one side (ask or bid) of a market.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSide {
    pub volume: U256,
    /// Commitment of the price-level index.
    pub root: H256,
    pub order_count: u64,
    /// Number of price levels.
    pub level_count: u64,
}

/// Per-market aggregate. Created lazily, never deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeObject {
    /// Last order id handed out; ids start at 1.
    pub order_counter: u64,
    pub ask_root: H256,
    pub bid_root: H256,
}

impl ExchangeObject {
    #[must_use]
    pub fn root(&self, side: Side) -> H256 {
        match side {
            Side::Ask => self.ask_root,
            Side::Bid => self.bid_root,
        }
    }

    pub fn set_root(&mut self, side: Side, root: H256) {
        match side {
            Side::Ask => self.ask_root = root,
            Side::Bid => self.bid_root = root,
        }
    }
}

/// A row of a depth query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: U256,
    pub volume: U256,
    pub orders: u64,
}
