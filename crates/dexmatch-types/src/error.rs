//! Error types for the dexmatch engine.
//!
//! All errors use the `DEX_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Order errors
//! - 2xx: Balance / relayer errors
//! - 3xx: Nonce ordering errors
//! - 5xx: Matching errors
//! - 6xx: Settlement errors
//! - 9xx: Storage / internal errors
//!
//! Every variant also belongs to one [`ErrorClass`], which tells the caller
//! whether to retry later, drop the order, or abort the enclosing transaction.

use thiserror::Error;

use crate::{Address, H256, U256};

/// How a caller must react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Ordering signal: skip or postpone the order, state is untouched.
    Retryable,
    /// Permanent reject: the order is dropped, a nonce may have been consumed.
    Rejected,
    /// Internal failure: abort the enclosing transaction and revert.
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable => write!(f, "RETRYABLE"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Central error enum for all dexmatch operations.
#[derive(Debug, Error)]
pub enum DexError {
    // =================================================================
    // Order Errors (1xx)
    // =================================================================
    /// The order failed structural validation.
    #[error("DEX_ERR_100: Invalid order: {reason}")]
    InvalidOrder { reason: String },

    /// Price is zero or outside the hash-width field.
    #[error("DEX_ERR_101: Invalid price: {price}")]
    InvalidPrice { price: U256 },

    /// Quantity is zero or outside the hash-width field.
    #[error("DEX_ERR_102: Invalid quantity: {quantity}")]
    InvalidQuantity { quantity: U256 },

    /// The signature does not recover to the order's user.
    #[error("DEX_ERR_103: Invalid signature: {reason}")]
    InvalidSignature { reason: String },

    /// The supplied order hash differs from the recomputed content hash.
    #[error("DEX_ERR_104: Order hash mismatch: expected {expected:?}, got {actual:?}")]
    HashMismatch { expected: H256, actual: H256 },

    /// No order with this id exists in the market.
    #[error("DEX_ERR_105: Order not found: {order_id}")]
    OrderNotFound { order_id: u64 },

    /// A cancel request could not be honoured.
    #[error("DEX_ERR_106: Cancel rejected: {reason}")]
    CancelRejected { reason: String },

    // =================================================================
    // Balance / Relayer Errors (2xx)
    // =================================================================
    /// Not enough token balance to perform the operation.
    #[error("DEX_ERR_200: Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: U256, available: U256 },

    /// The relayer's fee reserve cannot cover the matching fee.
    #[error("DEX_ERR_201: Insufficient relayer fee for {relayer:?}: need {needed}, have {available}")]
    InsufficientRelayerFee {
        relayer: Address,
        needed: U256,
        available: U256,
    },

    /// The exchange address is not a registered relayer.
    #[error("DEX_ERR_202: Relayer not registered: {0:?}")]
    RelayerNotRegistered(Address),

    // =================================================================
    // Nonce Ordering Errors (3xx)
    // =================================================================
    /// The order's nonce is below the user's expected nonce.
    #[error("DEX_ERR_300: Nonce too low: expected {expected}, got {got}")]
    NonceTooLow { expected: u64, got: U256 },

    /// The order's nonce is above the user's expected nonce.
    #[error("DEX_ERR_301: Nonce too high: expected {expected}, got {got}")]
    NonceTooHigh { expected: u64, got: U256 },

    // =================================================================
    // Matching Errors (5xx)
    // =================================================================
    /// The matching algorithm hit an inconsistent book.
    #[error("DEX_ERR_500: Matching failed: {reason}")]
    MatchingFailed { reason: String },

    /// Cross-node determinism check failed.
    #[error("DEX_ERR_501: Determinism violation: expected {expected}, got {actual}")]
    DeterminismViolation { expected: String, actual: String },

    // =================================================================
    // Settlement Errors (6xx)
    // =================================================================
    /// Settlement arithmetic produced a degenerate trade.
    #[error("DEX_ERR_600: Settlement failed: {reason}")]
    SettlementFailed { reason: String },

    /// An intermediate value does not fit the hash-width field.
    #[error("DEX_ERR_601: Arithmetic overflow in {context}")]
    ArithmeticOverflow { context: String },

    /// Value was created or destroyed by a settlement.
    #[error("DEX_ERR_602: Supply invariant violation: {reason}")]
    SupplyInvariantViolation { reason: String },

    // =================================================================
    // Storage / Internal (9xx)
    // =================================================================
    /// A node referenced by the index structure is absent from the store.
    #[error("DEX_ERR_900: Missing index node {key:?} in namespace {namespace:?}")]
    MissingNode { namespace: H256, key: H256 },

    /// A stored record could not be decoded.
    #[error("DEX_ERR_901: Corrupt {kind} record: {reason}")]
    CorruptRecord { kind: &'static str, reason: String },

    /// The empty-key sentinel was used as a real index key.
    #[error("DEX_ERR_902: Empty key is reserved as the index sentinel")]
    ReservedKey,

    /// Keyed store failure.
    #[error("DEX_ERR_903: Store error: {0}")]
    Store(String),

    /// Unrecoverable internal error.
    #[error("DEX_ERR_904: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("DEX_ERR_905: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config, missing fields, etc.).
    #[error("DEX_ERR_906: Configuration error: {0}")]
    Configuration(String),
}

impl DexError {
    /// Classify this error for the caller's control flow.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NonceTooLow { .. } | Self::NonceTooHigh { .. } => ErrorClass::Retryable,
            Self::InvalidOrder { .. }
            | Self::InvalidPrice { .. }
            | Self::InvalidQuantity { .. }
            | Self::InvalidSignature { .. }
            | Self::HashMismatch { .. }
            | Self::OrderNotFound { .. }
            | Self::CancelRejected { .. }
            | Self::InsufficientBalance { .. }
            | Self::InsufficientRelayerFee { .. }
            | Self::RelayerNotRegistered(_) => ErrorClass::Rejected,
            Self::MatchingFailed { .. }
            | Self::DeterminismViolation { .. }
            | Self::SettlementFailed { .. }
            | Self::ArithmeticOverflow { .. }
            | Self::SupplyInvariantViolation { .. }
            | Self::MissingNode { .. }
            | Self::CorruptRecord { .. }
            | Self::ReservedKey
            | Self::Store(_)
            | Self::Internal(_)
            | Self::Serialization(_)
            | Self::Configuration(_) => ErrorClass::Fatal,
        }
    }

    /// Shorthand for `class() == ErrorClass::Fatal`.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    pub(crate) fn corrupt(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            kind,
            reason: reason.into(),
        }
    }

    pub(crate) fn overflow(context: impl Into<String>) -> Self {
        Self::ArithmeticOverflow {
            context: context.into(),
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, DexError>;

impl From<secp256k1::Error> for DexError {
    fn from(err: secp256k1::Error) -> Self {
        Self::InvalidSignature {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
