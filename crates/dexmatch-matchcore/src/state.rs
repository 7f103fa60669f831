//! Journaled trading state over a keyed store.
//!
//! A [`TradingState`] keeps three kinds of uncommitted data in front of
//! the [`Database`]:
//!
//! - an arena of exchange objects, book sides and orders with a dirty set,
//!   written out as fixed-width records on [`commit`](TradingState::commit)
//! - an overlay of raw index writes (nodes, commitments, root pointers)
//!   produced by [`OrderedIndex`] operations
//! - the [`Journal`] of undo records for both
//!
//! Nothing reaches the database before `commit`, so another state over the
//! same database never sees these writes.
//!
//! ## Roots
//!
//! ```text
//! market_root = sha256("dexmatch:market_root:v1:" ‖ exchange ‖ ask side ‖ bid side)
//! state_root  = sha256("dexmatch:state_root:v1:" ‖ registry root ‖ n ‖ (market ‖ market_root)*)
//! ```
//!
//! The registry is an ordered index of every market ever created, so the
//! state root covers markets this state never loaded.

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

use dexmatch_trie::{Database, OrderedIndex, StoreReader, StoreWriter};
use dexmatch_types::codec::{book_side_key, exchange_key, order_key};
use dexmatch_types::{
    BookSide, DexError, ExchangeObject, H256, MarketId, Order, Result, Side,
};

use crate::journal::{Journal, JournalEntry};

const MARKET_ROOT_DOMAIN: &[u8] = b"dexmatch:market_root:v1:";
const STATE_ROOT_DOMAIN: &[u8] = b"dexmatch:state_root:v1:";
const REGISTRY_DOMAIN: &[u8] = b"dexmatch:ns:markets:v1";

/// Arena object awaiting flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Dirty {
    Exchange(MarketId),
    Side(MarketId, Side),
    Order(MarketId, u64),
}

/// Index of every market that has an exchange object.
#[must_use]
pub fn market_registry() -> OrderedIndex {
    OrderedIndex::new(H256::from_slice(&Sha256::digest(REGISTRY_DOMAIN)))
}

// ---------------------------------------------------------------------------
// Store views
// ---------------------------------------------------------------------------

/// Read-only view: overlay first, then the database.
pub struct StateView<'a, D: Database> {
    db: &'a D,
    writes: &'a BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<D: Database> StoreReader for StateView<'_, D> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(slot) => Ok(slot.clone()),
            None => self.db.get(key),
        }
    }
}

/// Writable view used by index mutations; every write is journaled.
pub struct JournaledStore<'a, D: Database> {
    db: &'a D,
    writes: &'a mut BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    journal: &'a mut Journal,
}

impl<D: Database> JournaledStore<'_, D> {
    fn record(&mut self, key: &[u8], slot: Option<Vec<u8>>) {
        let prev = self.writes.insert(key.to_vec(), slot);
        self.journal.push(JournalEntry::StoreWrite {
            key: key.to_vec(),
            prev,
        });
    }
}

impl<D: Database> StoreReader for JournaledStore<'_, D> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(slot) => Ok(slot.clone()),
            None => self.db.get(key),
        }
    }
}

impl<D: Database> StoreWriter for JournaledStore<'_, D> {
    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.record(key, Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.record(key, None);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TradingState
// ---------------------------------------------------------------------------

/// Order-book state of every market, journaled for snapshot/revert.
pub struct TradingState<D: Database> {
    db: D,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    exchanges: BTreeMap<MarketId, ExchangeObject>,
    sides: BTreeMap<(MarketId, Side), BookSide>,
    orders: BTreeMap<(MarketId, u64), Order>,
    dirty: BTreeSet<Dirty>,
    journal: Journal,
}

impl<D: Database> TradingState<D> {
    pub fn new(db: D) -> Self {
        Self {
            db,
            writes: BTreeMap::new(),
            exchanges: BTreeMap::new(),
            sides: BTreeMap::new(),
            orders: BTreeMap::new(),
            dirty: BTreeSet::new(),
            journal: Journal::new(),
        }
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    pub(crate) fn view(&self) -> StateView<'_, D> {
        StateView {
            db: &self.db,
            writes: &self.writes,
        }
    }

    pub(crate) fn store(&mut self) -> JournaledStore<'_, D> {
        JournaledStore {
            db: &self.db,
            writes: &mut self.writes,
            journal: &mut self.journal,
        }
    }

    // =====================================================================
    // Arena
    // =====================================================================

    pub(crate) fn load_exchange(&self, market: &MarketId) -> Result<Option<ExchangeObject>> {
        if let Some(exchange) = self.exchanges.get(market) {
            return Ok(Some(exchange.clone()));
        }
        self.db
            .get(&exchange_key(market))?
            .map(|raw| ExchangeObject::decode(&raw))
            .transpose()
    }

    /// Store `exchange`, registering the market on first write.
    pub(crate) fn put_exchange(&mut self, market: MarketId, exchange: ExchangeObject) -> Result<()> {
        match self.load_exchange(&market)? {
            Some(prev) => self.journal.push(JournalEntry::ExchangeChanged { market, prev }),
            None => {
                self.journal.push(JournalEntry::ExchangeCreated { market });
                market_registry().insert(&mut self.store(), market.0, Vec::new())?;
            }
        }
        self.exchanges.insert(market, exchange);
        self.dirty.insert(Dirty::Exchange(market));
        Ok(())
    }

    pub(crate) fn load_side(&self, market: &MarketId, side: Side) -> Result<Option<BookSide>> {
        if let Some(aggregate) = self.sides.get(&(*market, side)) {
            return Ok(Some(aggregate.clone()));
        }
        self.db
            .get(&book_side_key(market, side))?
            .map(|raw| BookSide::decode(&raw))
            .transpose()
    }

    pub(crate) fn put_side(&mut self, market: MarketId, side: Side, aggregate: BookSide) -> Result<()> {
        let entry = match self.load_side(&market, side)? {
            Some(prev) => JournalEntry::SideChanged { market, side, prev },
            None => JournalEntry::SideCreated { market, side },
        };
        self.journal.push(entry);
        self.sides.insert((market, side), aggregate);
        self.dirty.insert(Dirty::Side(market, side));
        Ok(())
    }

    pub(crate) fn load_order(&self, market: &MarketId, order_id: u64) -> Result<Option<Order>> {
        if let Some(order) = self.orders.get(&(*market, order_id)) {
            return Ok(Some(order.clone()));
        }
        self.db
            .get(&order_key(market, order_id))?
            .map(|raw| Order::decode(&raw))
            .transpose()
    }

    pub(crate) fn put_order(&mut self, order: Order) -> Result<()> {
        let market = order.market();
        let order_id = order.order_id;
        let entry = match self.load_order(&market, order_id)? {
            Some(prev) => JournalEntry::OrderChanged {
                market,
                order_id,
                prev: Box::new(prev),
            },
            None => JournalEntry::OrderCreated { market, order_id },
        };
        self.journal.push(entry);
        self.orders.insert((market, order_id), order);
        self.dirty.insert(Dirty::Order(market, order_id));
        Ok(())
    }

    // =====================================================================
    // Snapshots
    // =====================================================================

    /// Current journal revision.
    #[must_use]
    pub fn snapshot(&self) -> usize {
        self.journal.len()
    }

    /// Undo every mutation made after `revision`.
    pub fn revert_to_snapshot(&mut self, revision: usize) -> Result<()> {
        let len = self.journal.len();
        let undone = self.journal.unwind(revision).ok_or_else(|| {
            DexError::Internal(format!("snapshot {revision} is ahead of the journal ({len})"))
        })?;
        tracing::debug!(revision, undone = undone.len(), "Reverting trading state");
        for entry in undone {
            self.undo(entry);
        }
        Ok(())
    }

    fn undo(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::ExchangeCreated { market } => {
                self.exchanges.remove(&market);
            }
            JournalEntry::ExchangeChanged { market, prev } => {
                self.exchanges.insert(market, prev);
            }
            JournalEntry::SideCreated { market, side } => {
                self.sides.remove(&(market, side));
            }
            JournalEntry::SideChanged { market, side, prev } => {
                self.sides.insert((market, side), prev);
            }
            JournalEntry::OrderCreated { market, order_id } => {
                self.orders.remove(&(market, order_id));
            }
            JournalEntry::OrderChanged {
                market,
                order_id,
                prev,
            } => {
                self.orders.insert((market, order_id), *prev);
            }
            JournalEntry::StoreWrite { key, prev } => match prev {
                Some(slot) => {
                    self.writes.insert(key, slot);
                }
                None => {
                    self.writes.remove(&key);
                }
            },
        }
    }

    /// Number of uncommitted index writes.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Flush the overlay and dirty objects into the database, commit it and
    /// clear the journal. Returns the committed state root.
    pub fn commit(&mut self) -> Result<H256> {
        let root = self.state_root()?;
        let mut records = 0usize;
        for (key, slot) in &self.writes {
            match slot {
                Some(value) => self.db.put(key, value.clone())?,
                None => self.db.delete(key)?,
            }
            records += 1;
        }
        for dirty in &self.dirty {
            match *dirty {
                Dirty::Exchange(market) => {
                    if let Some(exchange) = self.exchanges.get(&market) {
                        self.db.put(&exchange_key(&market), exchange.encode())?;
                    }
                }
                Dirty::Side(market, side) => {
                    if let Some(aggregate) = self.sides.get(&(market, side)) {
                        self.db.put(&book_side_key(&market, side), aggregate.encode())?;
                    }
                }
                Dirty::Order(market, order_id) => {
                    if let Some(order) = self.orders.get(&(market, order_id)) {
                        self.db.put(&order_key(&market, order_id), order.encode()?)?;
                    }
                }
            }
            records += 1;
        }
        self.db.commit()?;
        self.writes.clear();
        self.dirty.clear();
        self.journal.clear();
        tracing::info!(
            records,
            state_root = hex::encode(root.as_bytes()),
            "Trading state committed"
        );
        Ok(root)
    }

    /// Drop every uncommitted change.
    pub fn discard(&mut self) {
        self.writes.clear();
        self.exchanges.clear();
        self.sides.clear();
        self.orders.clear();
        self.dirty.clear();
        self.journal.clear();
    }

    // =====================================================================
    // Roots
    // =====================================================================

    /// Commitment to one market's exchange object and both side aggregates;
    /// zero for a market that does not exist.
    pub fn market_root(&self, market: &MarketId) -> Result<H256> {
        let Some(exchange) = self.load_exchange(market)? else {
            return Ok(H256::zero());
        };
        let mut hasher = Sha256::new();
        hasher.update(MARKET_ROOT_DOMAIN);
        hasher.update(exchange.encode());
        for side in [Side::Ask, Side::Bid] {
            let aggregate = self.load_side(market, side)?.unwrap_or_default();
            hasher.update(aggregate.encode());
        }
        Ok(H256::from_slice(&hasher.finalize()))
    }

    /// Every market with an exchange object, in key order.
    pub fn markets(&self) -> Result<Vec<MarketId>> {
        Ok(market_registry()
            .keys(&self.view())?
            .into_iter()
            .map(MarketId)
            .collect())
    }

    /// Commitment to the whole trading state.
    pub fn state_root(&self) -> Result<H256> {
        let view = self.view();
        let registry = market_registry();
        let markets = registry.keys(&view)?;
        let mut hasher = Sha256::new();
        hasher.update(STATE_ROOT_DOMAIN);
        hasher.update(registry.root(&view)?.as_bytes());
        hasher.update((markets.len() as u64).to_be_bytes());
        for key in markets {
            let market = MarketId(key);
            hasher.update(market.as_bytes());
            hasher.update(self.market_root(&market)?.as_bytes());
        }
        Ok(H256::from_slice(&hasher.finalize()))
    }
}
