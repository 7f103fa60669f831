//! Order-book operations and queries on a [`TradingState`].
//!
//! Each (market, side) has a price-level index keyed by the 32-byte price,
//! whose values are encoded [`PriceLevel`] records. Each price level has
//! its own order-id index keyed by the 8-byte order id, whose values are the
//! 32-byte remaining quantities. FIFO within a level is the ascending order
//! of that sub-index.
//!
//! ```text
//! levels(market, side)        = sha256("dexmatch:ns:levels:v1:" ‖ market ‖ side)
//! orders(market, side, price) = sha256("dexmatch:ns:orders:v1:" ‖ market ‖ side ‖ price)
//! ```
//!
//! Every mutation keeps the level record, the [`BookSide`] aggregate and the
//! exchange object's side root in step.

use sha2::{Digest, Sha256};

use dexmatch_trie::{Database, OrderedIndex};
use dexmatch_types::{
    BookSide, DepthLevel, DexError, EMPTY_KEY, ExchangeObject, H256, MarketId, Order,
    OrderStatus, PriceLevel, Result, Side, U256, key_to_u256, key_to_u64, u256_key,
    u256_to_bytes, u64_key,
};

use crate::state::TradingState;

const LEVELS_DOMAIN: &[u8] = b"dexmatch:ns:levels:v1:";
const ORDERS_DOMAIN: &[u8] = b"dexmatch:ns:orders:v1:";

/// Price-level index of one side of a market.
#[must_use]
pub fn price_index(market: &MarketId, side: Side) -> OrderedIndex {
    let mut hasher = Sha256::new();
    hasher.update(LEVELS_DOMAIN);
    hasher.update(market.as_bytes());
    hasher.update([side.code()]);
    OrderedIndex::new(H256::from_slice(&hasher.finalize()))
}

/// Order-id index of one price level.
#[must_use]
pub fn order_index(market: &MarketId, side: Side, price: &U256) -> OrderedIndex {
    let mut hasher = Sha256::new();
    hasher.update(ORDERS_DOMAIN);
    hasher.update(market.as_bytes());
    hasher.update([side.code()]);
    hasher.update(u256_to_bytes(price));
    OrderedIndex::new(H256::from_slice(&hasher.finalize()))
}

fn decode_quantity(raw: &[u8]) -> Result<U256> {
    if raw.len() != 32 {
        return Err(DexError::CorruptRecord {
            kind: "order quantity",
            reason: format!("{} bytes", raw.len()),
        });
    }
    Ok(U256::from_big_endian(raw))
}

fn add(a: U256, b: U256, context: &str) -> Result<U256> {
    a.checked_add(b).ok_or_else(|| DexError::ArithmeticOverflow {
        context: context.into(),
    })
}

fn sub(a: U256, b: U256, context: &str) -> Result<U256> {
    a.checked_sub(b)
        .ok_or_else(|| DexError::Internal(format!("{context} underflow: {a} - {b}")))
}

/// How a level changes under one order.
#[derive(Debug, Clone, Copy)]
enum LevelChange {
    /// The order joins the level with its full quantity.
    Add,
    /// The order stays, smaller by this amount.
    Reduce(U256),
    /// The order leaves, taking this much volume with it.
    Remove(U256),
}

impl<D: Database> TradingState<D> {
    // =====================================================================
    // Mutations
    // =====================================================================

    /// Hand out the next order id of `market`, creating the exchange object
    /// on first use.
    pub fn next_order_id(&mut self, market: &MarketId) -> Result<u64> {
        let mut exchange = self.load_exchange(market)?.unwrap_or_default();
        exchange.order_counter =
            exchange
                .order_counter
                .checked_add(1)
                .ok_or_else(|| DexError::ArithmeticOverflow {
                    context: "order id counter".into(),
                })?;
        let order_id = exchange.order_counter;
        self.put_exchange(*market, exchange)?;
        Ok(order_id)
    }

    /// Rest `order` in the book under a fresh order id and return the id.
    pub fn insert_resting_order(&mut self, order: &mut Order, timestamp: u64) -> Result<u64> {
        if order.quantity.is_zero() {
            return Err(DexError::InvalidQuantity {
                quantity: order.quantity,
            });
        }
        let market = order.market();
        order.order_id = self.next_order_id(&market)?;
        order.order_list = order_index(&market, order.side, &order.price).namespace();
        order.status = if order.filled_amount.is_zero() {
            OrderStatus::Open
        } else {
            OrderStatus::PartialFilled
        };
        order.updated_at = timestamp;
        self.adjust_level(order, LevelChange::Add)?;
        self.put_order(order.clone())?;
        tracing::debug!(
            market = %market,
            order_id = order.order_id,
            side = %order.side,
            price = %order.price,
            quantity = %order.quantity,
            "Order rested"
        );
        Ok(order.order_id)
    }

    /// Fill `quantity` of a resting order. The order leaves the book when
    /// nothing remains. Returns the updated order.
    pub fn reduce_order(
        &mut self,
        market: &MarketId,
        order_id: u64,
        quantity: U256,
        timestamp: u64,
    ) -> Result<Order> {
        let mut order = self.resting_order(market, order_id)?;
        if quantity.is_zero() || quantity > order.quantity {
            return Err(DexError::MatchingFailed {
                reason: format!(
                    "fill {quantity} against order {order_id} with {} remaining",
                    order.quantity
                ),
            });
        }
        order.apply_fill(&quantity, timestamp);
        let change = if order.is_filled() {
            LevelChange::Remove(quantity)
        } else {
            LevelChange::Reduce(quantity)
        };
        self.adjust_level(&order, change)?;
        self.put_order(order.clone())?;
        Ok(order)
    }

    /// Take a resting order out of the book with its remaining quantity and
    /// mark it `status`. Returns the order as it was removed.
    pub fn remove_order(
        &mut self,
        market: &MarketId,
        order_id: u64,
        status: OrderStatus,
        timestamp: u64,
    ) -> Result<Order> {
        let order = self.resting_order(market, order_id)?;
        self.adjust_level(&order, LevelChange::Remove(order.quantity))?;
        let mut stored = order.clone();
        stored.quantity = U256::zero();
        stored.status = status;
        stored.updated_at = timestamp;
        self.put_order(stored)?;
        Ok(order)
    }

    fn resting_order(&self, market: &MarketId, order_id: u64) -> Result<Order> {
        match self.load_order(market, order_id)? {
            Some(order) if order.status.is_live() => Ok(order),
            _ => Err(DexError::OrderNotFound { order_id }),
        }
    }

    fn adjust_level(&mut self, order: &Order, change: LevelChange) -> Result<()> {
        let market = order.market();
        let side = order.side;
        let levels = price_index(&market, side);
        let orders = order_index(&market, side, &order.price);
        let price_key = u256_key(&order.price);
        let id_key = u64_key(order.order_id);

        let existing = levels.get(&self.view(), &price_key)?;
        let existed = existing.is_some();
        let mut level = match existing {
            Some(raw) => PriceLevel::decode(&raw)?,
            None => PriceLevel::empty(order.price),
        };
        let mut aggregate = self.load_side(&market, side)?.unwrap_or_default();

        match change {
            LevelChange::Add => {
                orders.insert(
                    &mut self.store(),
                    id_key,
                    u256_to_bytes(&order.quantity).to_vec(),
                )?;
                level.volume = add(level.volume, order.quantity, "level volume")?;
                level.length += 1;
                aggregate.volume = add(aggregate.volume, order.quantity, "side volume")?;
                aggregate.order_count += 1;
            }
            LevelChange::Reduce(amount) => {
                orders.insert(
                    &mut self.store(),
                    id_key,
                    u256_to_bytes(&order.quantity).to_vec(),
                )?;
                level.volume = sub(level.volume, amount, "level volume")?;
                aggregate.volume = sub(aggregate.volume, amount, "side volume")?;
            }
            LevelChange::Remove(amount) => {
                if !orders.delete(&mut self.store(), &id_key)? {
                    return Err(DexError::OrderNotFound {
                        order_id: order.order_id,
                    });
                }
                level.volume = sub(level.volume, amount, "level volume")?;
                level.length = level.length.saturating_sub(1);
                aggregate.volume = sub(aggregate.volume, amount, "side volume")?;
                aggregate.order_count = aggregate.order_count.saturating_sub(1);
            }
        }

        if level.length == 0 {
            if !level.volume.is_zero() {
                return Err(DexError::Internal(format!(
                    "empty level at {} still holds volume {}",
                    level.price, level.volume
                )));
            }
            levels.delete(&mut self.store(), &price_key)?;
            if existed {
                aggregate.level_count = aggregate.level_count.saturating_sub(1);
            }
        } else {
            let view = self.view();
            level.head = orders.best_left(&view)?.map_or(EMPTY_KEY, |(key, _)| key);
            level.tail = orders.best_right_key(&view)?.unwrap_or(EMPTY_KEY);
            level.orders_root = orders.root(&view)?;
            levels.insert(&mut self.store(), price_key, level.encode())?;
            if !existed {
                aggregate.level_count += 1;
            }
        }

        aggregate.root = levels.root(&self.view())?;
        let root = aggregate.root;
        self.put_side(market, side, aggregate)?;
        let mut exchange = self.load_exchange(&market)?.ok_or_else(|| {
            DexError::Internal(format!("{market} has a book but no exchange object"))
        })?;
        exchange.set_root(side, root);
        self.put_exchange(market, exchange)
    }

    // =====================================================================
    // Queries
    // =====================================================================

    /// Lowest ask price.
    pub fn best_ask(&self, market: &MarketId) -> Result<Option<U256>> {
        Ok(price_index(market, Side::Ask)
            .best_left(&self.view())?
            .map(|(key, _)| key_to_u256(&key)))
    }

    /// Highest bid price.
    pub fn best_bid(&self, market: &MarketId) -> Result<Option<U256>> {
        Ok(price_index(market, Side::Bid)
            .best_right_key(&self.view())?
            .map(|key| key_to_u256(&key)))
    }

    /// Best price on `side`: lowest ask or highest bid.
    pub fn best_price(&self, market: &MarketId, side: Side) -> Result<Option<U256>> {
        match side {
            Side::Ask => self.best_ask(market),
            Side::Bid => self.best_bid(market),
        }
    }

    pub fn price_level(
        &self,
        market: &MarketId,
        side: Side,
        price: &U256,
    ) -> Result<Option<PriceLevel>> {
        price_index(market, side)
            .get(&self.view(), &u256_key(price))?
            .map(|raw| PriceLevel::decode(&raw))
            .transpose()
    }

    /// Remaining volume resting at `price`; zero if there is no level.
    pub fn volume_at(&self, market: &MarketId, side: Side, price: &U256) -> Result<U256> {
        Ok(self
            .price_level(market, side, price)?
            .map_or_else(U256::zero, |level| level.volume))
    }

    /// The order with the lowest id at `price`, i.e. the next to fill.
    pub fn best_order_at(&self, market: &MarketId, side: Side, price: &U256) -> Result<Option<Order>> {
        let Some((key, _)) = order_index(market, side, price).best_left(&self.view())? else {
            return Ok(None);
        };
        let order_id = key_to_u64(&key)?;
        self.load_order(market, order_id)?
            .map(Some)
            .ok_or_else(|| DexError::CorruptRecord {
                kind: "order",
                reason: format!("order {order_id} indexed at {price} but not stored"),
            })
    }

    /// Resting order ids and remaining quantities at `price`, in fill order.
    pub fn orders_at(&self, market: &MarketId, side: Side, price: &U256) -> Result<Vec<(u64, U256)>> {
        order_index(market, side, price)
            .entries(&self.view())?
            .into_iter()
            .map(|(key, raw)| Ok((key_to_u64(&key)?, decode_quantity(&raw)?)))
            .collect()
    }

    /// Stored order record, whatever its status.
    pub fn order_by_id(&self, market: &MarketId, order_id: u64) -> Result<Option<Order>> {
        self.load_order(market, order_id)
    }

    /// Up to `levels` price levels of `side`, best first.
    pub fn depth(&self, market: &MarketId, side: Side, levels: usize) -> Result<Vec<DepthLevel>> {
        let mut entries = price_index(market, side).entries(&self.view())?;
        if side == Side::Bid {
            entries.reverse();
        }
        entries
            .into_iter()
            .take(levels)
            .map(|(_, raw)| {
                let level = PriceLevel::decode(&raw)?;
                Ok(DepthLevel {
                    price: level.price,
                    volume: level.volume,
                    orders: level.length,
                })
            })
            .collect()
    }

    /// Aggregate of one side; empty for an unknown market.
    pub fn book_side(&self, market: &MarketId, side: Side) -> Result<BookSide> {
        Ok(self.load_side(market, side)?.unwrap_or_default())
    }

    pub fn exchange(&self, market: &MarketId) -> Result<Option<ExchangeObject>> {
        self.load_exchange(market)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexmatch_trie::MemoryStore;
    use dexmatch_types::Address;

    fn order(side: Side, price: u64, quantity: u64) -> Order {
        Order::dummy_limit(side, U256::from(price), U256::from(quantity))
    }

    fn rest(state: &mut TradingState<MemoryStore>, side: Side, price: u64, quantity: u64) -> Order {
        let mut o = order(side, price, quantity);
        state.insert_resting_order(&mut o, 1).unwrap();
        o
    }

    fn market() -> MarketId {
        order(Side::Bid, 1, 1).market()
    }

    #[test]
    fn ids_are_sequential_and_shared_by_both_sides() {
        let mut state = TradingState::new(MemoryStore::default());
        let a = rest(&mut state, Side::Bid, 100, 5);
        let b = rest(&mut state, Side::Ask, 110, 5);
        let c = rest(&mut state, Side::Bid, 100, 5);
        assert_eq!((a.order_id, b.order_id, c.order_id), (1, 2, 3));
        assert_eq!(a.status, OrderStatus::Open);
        assert_eq!(state.exchange(&market()).unwrap().unwrap().order_counter, 3);
    }

    #[test]
    fn best_prices_and_aggregates() {
        let mut state = TradingState::new(MemoryStore::default());
        rest(&mut state, Side::Bid, 99, 5);
        rest(&mut state, Side::Bid, 100, 7);
        rest(&mut state, Side::Bid, 100, 3);
        rest(&mut state, Side::Ask, 105, 2);
        rest(&mut state, Side::Ask, 103, 4);

        let m = market();
        assert_eq!(state.best_bid(&m).unwrap(), Some(U256::from(100)));
        assert_eq!(state.best_ask(&m).unwrap(), Some(U256::from(103)));
        assert_eq!(state.volume_at(&m, Side::Bid, &U256::from(100)).unwrap(), U256::from(10));
        assert_eq!(state.volume_at(&m, Side::Bid, &U256::from(101)).unwrap(), U256::zero());

        let bids = state.book_side(&m, Side::Bid).unwrap();
        assert_eq!(bids.volume, U256::from(15));
        assert_eq!(bids.order_count, 3);
        assert_eq!(bids.level_count, 2);
        assert_eq!(bids.root, price_index(&m, Side::Bid).root(&state.view()).unwrap());
        assert_eq!(state.exchange(&m).unwrap().unwrap().bid_root, bids.root);

        let level = state.price_level(&m, Side::Bid, &U256::from(100)).unwrap().unwrap();
        assert_eq!(level.length, 2);
        assert_eq!(level.head, u64_key(2));
        assert_eq!(level.tail, u64_key(3));
    }

    #[test]
    fn fifo_within_level() {
        let mut state = TradingState::new(MemoryStore::default());
        let first = rest(&mut state, Side::Ask, 100, 5);
        rest(&mut state, Side::Ask, 100, 6);
        let next = state
            .best_order_at(&market(), Side::Ask, &U256::from(100))
            .unwrap()
            .unwrap();
        assert_eq!(next.order_id, first.order_id);
        assert_eq!(
            state.orders_at(&market(), Side::Ask, &U256::from(100)).unwrap(),
            vec![(1, U256::from(5)), (2, U256::from(6))]
        );
    }

    #[test]
    fn reduce_then_fill_removes_level() {
        let mut state = TradingState::new(MemoryStore::default());
        let o = rest(&mut state, Side::Ask, 100, 10);
        let m = market();

        let partial = state.reduce_order(&m, o.order_id, U256::from(4), 2).unwrap();
        assert_eq!(partial.quantity, U256::from(6));
        assert_eq!(partial.status, OrderStatus::PartialFilled);
        assert_eq!(state.volume_at(&m, Side::Ask, &U256::from(100)).unwrap(), U256::from(6));

        let filled = state.reduce_order(&m, o.order_id, U256::from(6), 3).unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert!(state.price_level(&m, Side::Ask, &U256::from(100)).unwrap().is_none());
        assert_eq!(state.best_ask(&m).unwrap(), None);
        let side = state.book_side(&m, Side::Ask).unwrap();
        assert_eq!(side, BookSide::default());
        assert_eq!(state.exchange(&m).unwrap().unwrap().ask_root, EMPTY_KEY);

        // The record survives for lookups.
        assert_eq!(
            state.order_by_id(&m, o.order_id).unwrap().unwrap().filled_amount,
            U256::from(10)
        );
    }

    #[test]
    fn overfill_is_refused() {
        let mut state = TradingState::new(MemoryStore::default());
        let o = rest(&mut state, Side::Ask, 100, 3);
        let err = state
            .reduce_order(&market(), o.order_id, U256::from(4), 2)
            .unwrap_err();
        assert!(matches!(err, DexError::MatchingFailed { .. }));
    }

    #[test]
    fn remove_marks_status_and_keeps_other_orders() {
        let mut state = TradingState::new(MemoryStore::default());
        let a = rest(&mut state, Side::Bid, 100, 4);
        let b = rest(&mut state, Side::Bid, 100, 6);
        let m = market();

        let removed = state
            .remove_order(&m, a.order_id, OrderStatus::Cancelled, 9)
            .unwrap();
        assert_eq!(removed.quantity, U256::from(4));
        let stored = state.order_by_id(&m, a.order_id).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert!(stored.quantity.is_zero());

        assert_eq!(state.volume_at(&m, Side::Bid, &U256::from(100)).unwrap(), U256::from(6));
        let next = state.best_order_at(&m, Side::Bid, &U256::from(100)).unwrap().unwrap();
        assert_eq!(next.order_id, b.order_id);

        // A second removal finds nothing live.
        let err = state
            .remove_order(&m, a.order_id, OrderStatus::Cancelled, 10)
            .unwrap_err();
        assert!(matches!(err, DexError::OrderNotFound { .. }));
    }

    #[test]
    fn depth_is_best_first() {
        let mut state = TradingState::new(MemoryStore::default());
        for (price, qty) in [(98, 1), (100, 2), (99, 3), (100, 4)] {
            rest(&mut state, Side::Bid, price, qty);
        }
        let depth = state.depth(&market(), Side::Bid, 2).unwrap();
        assert_eq!(depth.len(), 2);
        assert_eq!(depth[0].price, U256::from(100));
        assert_eq!(depth[0].volume, U256::from(6));
        assert_eq!(depth[0].orders, 2);
        assert_eq!(depth[1].price, U256::from(99));

        let asks = state.depth(&market(), Side::Ask, 10).unwrap();
        assert!(asks.is_empty());
    }

    #[test]
    fn markets_are_isolated() {
        let mut state = TradingState::new(MemoryStore::default());
        rest(&mut state, Side::Bid, 100, 1);
        let other = MarketId::from_tokens(&Address::from_low_u64_be(1), &Address::from_low_u64_be(2));
        assert_eq!(state.best_bid(&other).unwrap(), None);
        assert!(state.exchange(&other).unwrap().is_none());
        assert_eq!(state.markets().unwrap(), vec![market()]);
    }
}
