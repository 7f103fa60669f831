//! # dexmatch-trie
//!
//! Storage plane of the dexmatch engine.
//!
//! - [`store`]: the keyed-store interfaces ([`StoreReader`], [`StoreWriter`],
//!   [`Database`]) and [`MemoryStore`], an in-memory store with a pending
//!   write batch and a bounded read cache.
//! - [`tree`]: [`OrderedIndex`], a persistent red-black tree whose nodes live
//!   in the keyed store and whose root is a Merkle commitment over its
//!   contents. One index per (market, side) holds price levels; one index per
//!   price level holds resting orders by order id.

pub mod store;
pub mod tree;

pub use store::{CacheStats, Database, MemoryStore, StoreReader, StoreWriter};
pub use tree::{IndexStats, OrderedIndex};
