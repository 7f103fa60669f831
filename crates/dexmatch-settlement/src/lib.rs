//! # dexmatch-settlement
//!
//! Settlement plane: how much two orders can trade, what each party pays
//! and receives, and applying that to the account ledger.
//!
//! ## Flow for one fill
//!
//! 1. [`get_trade_quantity`] caps the fill by what both sides can afford
//! 2. [`settle_balance`] checks relayers, stages and applies the transfers
//!    computed by [`get_settle_balance`]
//! 3. [`verify_conservation`] guarantees no token is created or destroyed
//!
//! Cancels are charged through [`settle_cancel`].

pub mod balance;
pub mod conservation;
pub mod ledger;
pub mod quantity;
pub mod settle;

pub use balance::{SettleBalance, SideBalance, TradeTerms, get_settle_balance};
pub use conservation::{SupplyAudit, verify_conservation};
pub use ledger::{Ledger, MemoryLedger};
pub use quantity::{QuantityReject, TradeQuantity, fee_rate, get_trade_quantity};
pub use settle::{CancelOutcome, SettleOutcome, cancel_fee, settle_balance, settle_cancel};
