//! System-wide constants for the dexmatch engine.

/// Width of every hash-width field (hashes, big integers, index keys).
pub const HASH_LENGTH: usize = 32;

/// Width of an account / token / relayer address.
pub const ADDRESS_LENGTH: usize = 20;

/// Fixed width of the ASCII status field in an order record.
pub const STATUS_FIELD_LENGTH: usize = 15;

/// Fixed width of the ASCII side field in an order record.
pub const SIDE_FIELD_LENGTH: usize = 4;

/// Fixed width of the ASCII type field in an order record.
pub const TYPE_FIELD_LENGTH: usize = 6;

/// Fixed width of the pair-name field in an order record.
pub const PAIR_NAME_LENGTH: usize = 86;

/// Encoded size of an order record.
pub const ORDER_RECORD_LENGTH: usize = 2 * HASH_LENGTH
    + 4 * ADDRESS_LENGTH
    + STATUS_FIELD_LENGTH
    + SIDE_FIELD_LENGTH
    + TYPE_FIELD_LENGTH
    + HASH_LENGTH
    + 1
    + 2 * HASH_LENGTH
    + 4 * HASH_LENGTH
    + PAIR_NAME_LENGTH
    + 3 * 8
    + 3 * HASH_LENGTH;

/// Encoded size of a price-level record (with the trailing sub-index root).
pub const PRICE_LEVEL_RECORD_LENGTH: usize = 4 * HASH_LENGTH + 8 + HASH_LENGTH;

/// Encoded size of an order-book-side record.
pub const BOOK_SIDE_RECORD_LENGTH: usize = 2 * HASH_LENGTH + 2 * 8;

/// Encoded size of an exchange-object record.
pub const EXCHANGE_RECORD_LENGTH: usize = 8 + 2 * HASH_LENGTH;

/// Minimum encoded size of an index node (no value bytes).
pub const INDEX_NODE_HEADER_LENGTH: usize = 3 * HASH_LENGTH + 1;

/// Denominator for maker/taker fee rates (basis points over 10 000).
pub const DEFAULT_FEE_BASE: u64 = 10_000;

/// Denominator for the cancel fee rate.
pub const DEFAULT_CANCEL_FEE_BASE: u64 = 100_000;

/// Matching fee debited from each relayer's reserve per trade (0.001 native).
pub const DEFAULT_MATCHING_FEE: u64 = 1_000_000_000_000_000;

/// Fee debited from the relayer's reserve per successful cancel.
pub const DEFAULT_RELAYER_CANCEL_FEE: u64 = 100_000_000_000_000;

/// Default bound on opposing price levels visited by one order.
pub const DEFAULT_MAX_PRICE_LEVELS: usize = 256;

/// Default capacity of the keyed store's read cache.
pub const DEFAULT_STORE_CACHE_SIZE: usize = 4_096;

/// Prefix of the Ethereum personal-message envelope used for order signatures.
pub const SIGNED_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "dexmatch";
