//! Trade types produced by the dexmatch matching engine.
//!
//! A [`Trade`] is the immutable record of a fill between a taker and a
//! resting maker at the maker's price.

use serde::{Deserialize, Serialize};

use crate::{Address, H256, Order, Side, U256, keccak256};

/// A trade produced by the matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// `keccak256(maker_hash ‖ taker_hash)`.
    pub hash: H256,
    pub taker_order_hash: H256,
    pub maker_order_hash: H256,
    /// Block timestamp of execution.
    pub timestamp: u64,
    /// Executed quantity in base-token units.
    pub quantity: U256,
    /// Execution price (the maker's limit price).
    pub price: U256,
    pub taker_exchange: Address,
    pub maker_exchange: Address,
    pub taker: Address,
    pub maker: Address,
    pub base_token: Address,
    pub quote_token: Address,
    /// Fee charged to the taker, in quote-token units.
    pub taker_fee: U256,
    /// Fee charged to the maker, in quote-token units.
    pub maker_fee: U256,
    pub taker_side: Side,
    pub pair_name: String,
}

impl Trade {
    /// Build the record for a fill of `quantity` between `taker` and `maker`.
    #[must_use]
    pub fn new(
        taker: &Order,
        maker: &Order,
        quantity: U256,
        taker_fee: U256,
        maker_fee: U256,
        timestamp: u64,
    ) -> Self {
        Self {
            hash: trade_hash(&maker.hash, &taker.hash),
            taker_order_hash: taker.hash,
            maker_order_hash: maker.hash,
            timestamp,
            quantity,
            price: maker.price,
            taker_exchange: taker.exchange_address,
            maker_exchange: maker.exchange_address,
            taker: taker.user_address,
            maker: maker.user_address,
            base_token: maker.base_token,
            quote_token: maker.quote_token,
            taker_fee,
            maker_fee,
            taker_side: taker.side,
            pair_name: maker.pair_name.clone(),
        }
    }

    /// Returns `true` if the taker was buying.
    #[must_use]
    pub fn taker_is_buyer(&self) -> bool {
        self.taker_side == Side::Bid
    }

    /// Address paying base tokens in this trade.
    #[must_use]
    pub fn seller(&self) -> Address {
        if self.taker_is_buyer() { self.maker } else { self.taker }
    }

    /// Address paying quote tokens in this trade.
    #[must_use]
    pub fn buyer(&self) -> Address {
        if self.taker_is_buyer() { self.taker } else { self.maker }
    }
}

/// Trade identity derived from the two order hashes.
#[must_use]
pub fn trade_hash(maker_hash: &H256, taker_hash: &H256) -> H256 {
    keccak256(&[maker_hash.as_bytes(), taker_hash.as_bytes()])
}

impl std::fmt::Display for Trade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Trade[{}] {} {} {} @ {}",
            hex::encode(&self.hash.as_bytes()[..8]),
            self.pair_name,
            self.taker_side,
            self.quantity,
            self.price,
        )
    }
}
