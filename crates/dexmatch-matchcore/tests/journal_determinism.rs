//! Integration test: journal, persistence and cross-node determinism
//!
//! Random order streams are replayed on independent states; every
//! replay must land on the same trades, trade root and state root, and
//! every revert must restore roots bit-for-bit.

mod common;

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use common::{Fixture, addr};
use dexmatch_matchcore::{
    TradingState, apply_orders, compute_trade_root, price_index, verify_trade_root,
};
use dexmatch_settlement::Ledger;
use dexmatch_trie::{Database, MemoryStore};
use dexmatch_types::codec::index_node_key;
use dexmatch_types::{
    DexError, H256, Order, OrderStatus, OrderType, Side, U256, u256_key,
};

/// A deterministic stream of limit and market orders from five users.
fn order_stream(seed: u64, len: usize) -> Vec<(u64, Side, OrderType, u64, u64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| {
            let user = rng.gen_range(1..=5u64);
            let side = if rng.gen_range(0..2) == 0 { Side::Bid } else { Side::Ask };
            let kind = if rng.gen_range(0..10) == 0 {
                OrderType::Market
            } else {
                OrderType::Limit
            };
            (user, side, kind, rng.gen_range(95..=105u64), rng.gen_range(1..40u64))
        })
        .collect()
}

fn to_order(fx: &Fixture, spec: &(u64, Side, OrderType, u64, u64)) -> Order {
    let (user, side, kind, price, qty) = *spec;
    match kind {
        OrderType::Limit => fx.limit(user, side, price, qty),
        OrderType::Market => fx.market_order(user, side, qty),
    }
}

fn replay(fx: &mut Fixture, stream: &[(u64, Side, OrderType, u64, u64)]) -> Vec<[u8; 32]> {
    stream
        .iter()
        .map(|spec| {
            let order = to_order(fx, spec);
            let out = fx.process(order);
            compute_trade_root(&out.trades)
        })
        .collect()
}

fn assert_indexes_valid(fx: &Fixture) {
    let market = fx.market();
    for side in [Side::Ask, Side::Bid] {
        let view = TradingStateView(&fx.state);
        price_index(&market, side).verify(&view).unwrap();
    }
}

/// Read the committed store through the state's query surface.
struct TradingStateView<'a>(&'a TradingState<Arc<MemoryStore>>);

impl dexmatch_trie::StoreReader for TradingStateView<'_> {
    fn get(&self, key: &[u8]) -> dexmatch_types::Result<Option<Vec<u8>>> {
        Database::get(self.0.database(), key)
    }
}

#[test]
fn independent_replays_agree() {
    let stream = order_stream(11, 300);
    let mut a = Fixture::with_users(5);
    let mut b = Fixture::with_users(5);

    let roots_a = replay(&mut a, &stream);
    let roots_b = replay(&mut b, &stream);
    assert_eq!(roots_a, roots_b);

    // A node replaying one order checks its trades against the reported root.
    let order = to_order(&a, &(1, Side::Ask, OrderType::Market, 0, 25));
    let trades_a = a.process(order.clone()).trades;
    let trades_b = b.process(order).trades;
    verify_trade_root(&trades_b, &compute_trade_root(&trades_a)).unwrap();
    if !trades_b.is_empty() {
        let err = verify_trade_root(&trades_b[1..], &compute_trade_root(&trades_a)).unwrap_err();
        assert!(matches!(err, DexError::DeterminismViolation { .. }));
    }
    assert_eq!(a.state.state_root().unwrap(), b.state.state_root().unwrap());
    assert_eq!(
        a.state.depth(&a.market(), Side::Bid, 20).unwrap(),
        b.state.depth(&b.market(), Side::Bid, 20).unwrap()
    );
    a.assert_supply();

    let committed_a = a.state.commit().unwrap();
    let committed_b = b.state.commit().unwrap();
    assert_eq!(committed_a, committed_b);
}

#[test]
fn book_invariants_hold_along_random_stream() {
    let mut fx = Fixture::with_users(5);
    let market = fx.market();
    for spec in order_stream(23, 250) {
        let order = to_order(&fx, &spec);
        fx.process(order);

        // Never crossed after an order completes.
        if let (Some(bid), Some(ask)) = (
            fx.state.best_bid(&market).unwrap(),
            fx.state.best_ask(&market).unwrap(),
        ) {
            assert!(bid < ask, "crossed book: bid {bid} ask {ask}");
        }
        // Side aggregates match their levels.
        for side in [Side::Ask, Side::Bid] {
            let aggregate = fx.state.book_side(&market, side).unwrap();
            let depth = fx.state.depth(&market, side, usize::MAX).unwrap();
            let volume = depth.iter().fold(U256::zero(), |acc, l| acc + l.volume);
            let orders: u64 = depth.iter().map(|l| l.orders).sum();
            assert_eq!(aggregate.volume, volume);
            assert_eq!(aggregate.order_count, orders);
            assert_eq!(aggregate.level_count, depth.len() as u64);
        }
    }
    fx.assert_supply();
    fx.state.commit().unwrap();
    assert_indexes_valid(&fx);
}

#[test]
fn revert_restores_roots_bit_for_bit() {
    let stream = order_stream(5, 200);
    let (head, tail) = stream.split_at(80);
    let mut fx = Fixture::with_users(5);
    replay(&mut fx, head);

    let market = fx.market();
    let state_root = fx.state.state_root().unwrap();
    let market_root = fx.state.market_root(&market).unwrap();
    let bid_depth = fx.state.depth(&market, Side::Bid, usize::MAX).unwrap();
    let state_rev = fx.state.snapshot();
    let ledger_rev = fx.ledger.snapshot();
    let pending = fx.state.pending_writes();

    replay(&mut fx, tail);
    assert_ne!(fx.state.state_root().unwrap(), state_root);

    fx.state.revert_to_snapshot(state_rev).unwrap();
    fx.ledger.revert_to_snapshot(ledger_rev).unwrap();
    assert_eq!(fx.state.state_root().unwrap(), state_root);
    assert_eq!(fx.state.market_root(&market).unwrap(), market_root);
    assert_eq!(fx.state.depth(&market, Side::Bid, usize::MAX).unwrap(), bid_depth);
    assert_eq!(fx.state.pending_writes(), pending);
    fx.assert_supply();

    // Replaying the tail after the revert lands where it did before.
    let mut reference = Fixture::with_users(5);
    replay(&mut reference, &stream);
    replay(&mut fx, tail);
    assert_eq!(fx.state.state_root().unwrap(), reference.state.state_root().unwrap());
}

#[test]
fn full_revert_to_empty() {
    let mut fx = Fixture::with_users(5);
    let empty = fx.state.state_root().unwrap();
    replay(&mut fx, &order_stream(9, 60));
    fx.state.revert_to_snapshot(0).unwrap();
    assert_eq!(fx.state.state_root().unwrap(), empty);
    assert!(fx.state.markets().unwrap().is_empty());
    assert_eq!(fx.state.pending_writes(), 0);
}

#[test]
fn commit_then_reload_sees_same_book() {
    let mut fx = Fixture::with_users(5);
    replay(&mut fx, &order_stream(31, 150));
    let market = fx.market();
    let bids = fx.state.depth(&market, Side::Bid, usize::MAX).unwrap();
    let asks = fx.state.depth(&market, Side::Ask, usize::MAX).unwrap();
    let root = fx.state.commit().unwrap();
    fx.ledger.commit();
    assert_eq!(fx.ledger.snapshot(), 0);

    let reloaded = TradingState::new(fx.store.clone());
    assert_eq!(reloaded.state_root().unwrap(), root);
    assert_eq!(reloaded.depth(&market, Side::Bid, usize::MAX).unwrap(), bids);
    assert_eq!(reloaded.depth(&market, Side::Ask, usize::MAX).unwrap(), asks);
    assert_eq!(reloaded.exchange(&market).unwrap(), fx.state.exchange(&market).unwrap());
    if let Some(best) = asks.first() {
        let next = reloaded
            .best_order_at(&market, Side::Ask, &best.price)
            .unwrap()
            .unwrap();
        assert!(next.status.is_live());
    }
}

#[test]
fn uncommitted_writes_stay_private() {
    let mut fx = Fixture::with_users(2);
    fx.submit(1, Side::Bid, 100, 10);
    let other = TradingState::new(fx.store.clone());
    assert_eq!(other.best_bid(&fx.market()).unwrap(), None);
    assert!(fx.store.is_empty().unwrap());

    fx.state.discard();
    assert_eq!(fx.state.best_bid(&fx.market()).unwrap(), None);
}

#[test]
fn missing_index_node_aborts_block_and_reverts() {
    let mut fx = Fixture::with_users(3);
    fx.submit(1, Side::Ask, 100, 5);
    fx.state.commit().unwrap();

    // Drop the ask-side root node behind the state's back.
    let market = fx.market();
    let levels = price_index(&market, Side::Ask);
    let key = index_node_key(&levels.namespace(), &u256_key(&U256::from(100)));
    Database::delete(&*fx.store, &key).unwrap();
    Database::commit(&*fx.store).unwrap();

    let order = fx.limit(2, Side::Bid, 100, 5);
    let result = apply_orders(
        &fx.engine,
        &mut fx.state,
        &mut fx.ledger,
        &fx.ctx,
        vec![order],
    );
    let err = result.unwrap_err();
    assert!(matches!(err, DexError::MissingNode { .. }), "{err}");
    assert!(err.is_fatal());
    assert_eq!(fx.ledger.nonce(&addr(2)), 0);
    assert_eq!(fx.state.snapshot(), 0);
}

#[test]
fn shuffled_cancels_empty_the_book() {
    let mut fx = Fixture::new();
    let mut rng = StdRng::seed_from_u64(3);
    let t = common::template();
    fx.fund_address(addr(1), t.base_token, 1_000_000);
    fx.fund_address(addr(1), t.quote_token, 1_000_000_000);

    let mut resting = Vec::new();
    for _ in 0..40 {
        let side = if rng.gen_range(0..2) == 0 { Side::Bid } else { Side::Ask };
        // Bids below 100, asks above: nothing crosses.
        let price = match side {
            Side::Bid => rng.gen_range(80..100u64),
            Side::Ask => rng.gen_range(101..120u64),
        };
        let out = fx.submit(1, side, price, rng.gen_range(1..50u64));
        resting.push(out.order);
    }
    resting.shuffle(&mut rng);

    for target in &resting {
        let mut cancel = fx.limit(1, target.side, 0, 0);
        cancel.quantity = target.quantity;
        cancel.price = target.price;
        cancel.status = OrderStatus::Cancelled;
        cancel.order_id = target.order_id;
        cancel.hash = target.hash;
        let out = fx.process(cancel);
        assert_eq!(out.order.status, OrderStatus::Cancelled, "{:?}", out.rejects);
    }

    let market = fx.market();
    for side in [Side::Ask, Side::Bid] {
        let aggregate = fx.state.book_side(&market, side).unwrap();
        assert_eq!(aggregate.volume, U256::zero());
        assert_eq!(aggregate.order_count, 0);
        assert_eq!(aggregate.root, H256::zero());
    }
    fx.assert_supply();
}
