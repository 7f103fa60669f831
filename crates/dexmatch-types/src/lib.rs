//! # dexmatch-types
//!
//! Shared types, errors, and configuration for the **dexmatch** engine.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Primitives**: [`U256`], [`H256`], [`Address`], [`MarketId`], key conversions
//! - **Order model**: [`Order`], [`Side`], [`OrderType`], [`OrderStatus`], [`OrderSignature`]
//! - **Trade model**: [`Trade`]
//! - **Book aggregates**: [`PriceLevel`], [`BookSide`], [`ExchangeObject`]
//! - **Record codec**: [`Record`], [`IndexNode`] and the storage-key layout
//! - **Authenticity**: [`OrderSubmission`], signer recovery
//! - **Configuration**: [`EngineConfig`]
//! - **Errors**: [`DexError`] with `DEX_ERR_` prefix codes
//! - **Constants**: record widths and fee defaults

pub mod book;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod order;
pub mod primitives;
pub mod signature;
pub mod trade;

pub use book::*;
pub use codec::{IndexNode, NodeColor, Record, RecordKind};
pub use config::*;
pub use error::*;
pub use order::*;
pub use primitives::*;
pub use signature::{OrderSubmission, recover_signer};
pub use trade::*;

// Constants are accessed via `dexmatch_types::constants::FOO`; storage keys
// via `dexmatch_types::codec::*`.
