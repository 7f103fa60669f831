//! Undo log of a [`TradingState`](crate::TradingState).
//!
//! Every mutation pushes one [`JournalEntry`] carrying what was there
//! before. A snapshot is just the journal length; reverting pops entries
//! back to it and undoes each one in reverse order.

use dexmatch_types::{BookSide, ExchangeObject, MarketId, Order, Side};

/// One undo record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// The exchange object did not exist before.
    ExchangeCreated { market: MarketId },
    ExchangeChanged {
        market: MarketId,
        prev: ExchangeObject,
    },
    SideCreated { market: MarketId, side: Side },
    SideChanged {
        market: MarketId,
        side: Side,
        prev: BookSide,
    },
    OrderCreated { market: MarketId, order_id: u64 },
    OrderChanged {
        market: MarketId,
        order_id: u64,
        prev: Box<Order>,
    },
    /// A write to an index record (node, commitment or root pointer).
    ///
    /// `prev` is the overlay slot before the write: `None` if the key had
    /// no uncommitted write, `Some(None)` for a pending delete.
    StoreWrite {
        key: Vec<u8>,
        prev: Option<Option<Vec<u8>>>,
    },
}

/// Append-only list of undo records since the last commit.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    /// Current revision.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return the entries after `revision`, newest first.
    ///
    /// Returns `None` if `revision` is ahead of the journal.
    pub fn unwind(&mut self, revision: usize) -> Option<Vec<JournalEntry>> {
        if revision > self.entries.len() {
            return None;
        }
        let mut undone = self.entries.split_off(revision);
        undone.reverse();
        Some(undone)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexmatch_types::H256;

    fn market() -> MarketId {
        MarketId(H256::repeat_byte(1))
    }

    #[test]
    fn unwind_is_newest_first() {
        let mut journal = Journal::new();
        journal.push(JournalEntry::ExchangeCreated { market: market() });
        journal.push(JournalEntry::SideCreated {
            market: market(),
            side: Side::Bid,
        });
        journal.push(JournalEntry::OrderCreated {
            market: market(),
            order_id: 1,
        });

        let undone = journal.unwind(1).unwrap();
        assert_eq!(undone.len(), 2);
        assert!(matches!(undone[0], JournalEntry::OrderCreated { order_id: 1, .. }));
        assert!(matches!(undone[1], JournalEntry::SideCreated { .. }));
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn unwind_past_end_is_refused() {
        let mut journal = Journal::new();
        assert!(journal.unwind(1).is_none());
        assert!(journal.unwind(0).unwrap().is_empty());
        assert!(journal.is_empty());
    }
}
