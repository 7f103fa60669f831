//! # dexmatch-matchcore
//!
//! **Deterministic order matching over the journaled order book.**
//!
//! - [`TradingState`]: arena of exchange objects, book sides and orders plus
//!   an overlay of index writes, all undoable through the [`Journal`]
//! - book operations and queries on `TradingState` (best prices, levels,
//!   depth, resting, filling and removing orders)
//! - [`MatchingEngine::process_order`]: nonce check, validation, cancels and
//!   price-time crossing with settlement
//! - [`apply_orders`]: a block's orders in sequence, with fatal errors
//!   reverted
//! - [`compute_trade_root`]: cross-node verification of trades
//!
//! Given the same starting state, ledger and orders, every node produces
//! the same trades, the same trade root and the same state root.

pub mod determinism;
pub mod journal;
pub mod matcher;
pub mod orderbook;
pub mod processor;
pub mod state;

pub use determinism::{compute_trade_root, verify_trade_root};
pub use journal::{Journal, JournalEntry};
pub use matcher::{BlockContext, MatchingEngine, OrderOutcome};
pub use orderbook::{order_index, price_index};
pub use processor::{BlockOutcome, SkipReason, SkippedOrder, apply_orders};
pub use state::{TradingState, market_registry};
