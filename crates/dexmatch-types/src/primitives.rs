//! Hash-width primitives shared by every dexmatch crate.
//!
//! Amounts, prices, nonces and fees are [`U256`]; hashes and index keys are
//! [`H256`]; accounts, relayers and tokens are 20-byte [`Address`]es.
//! Index keys are 32-byte big-endian encodings, so byte order on [`H256`]
//! equals numeric order on the encoded integer.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::{DexError, Result};

pub use primitive_types::{H160, H256, U256, U512};

/// A 20-byte account, relayer or token address.
pub type Address = H160;

/// The empty-key sentinel of the ordered index.
pub const EMPTY_KEY: H256 = H256([0u8; 32]);

// ---------------------------------------------------------------------------
// MarketId
// ---------------------------------------------------------------------------

/// Identifier of a trading pair: `keccak256(base ‖ quote)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MarketId(pub H256);

impl MarketId {
    #[must_use]
    pub fn from_tokens(base: &Address, quote: &Address) -> Self {
        Self(keccak256(&[base.as_bytes(), quote.as_bytes()]))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "market:{}", hex::encode(&self.0.as_bytes()[..8]))
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Keccak-256 over the concatenation of `parts`.
#[must_use]
pub fn keccak256(parts: &[&[u8]]) -> H256 {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    H256::from_slice(&hasher.finalize())
}

// ---------------------------------------------------------------------------
// Fixed-width conversions
// ---------------------------------------------------------------------------

/// Big-endian, left-padded 32-byte encoding.
#[must_use]
pub fn u256_to_bytes(value: &U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

/// Index key for an integer (price, order id, quantity).
#[must_use]
pub fn u256_key(value: &U256) -> H256 {
    H256(u256_to_bytes(value))
}

#[must_use]
pub fn u64_key(value: u64) -> H256 {
    H256::from_low_u64_be(value)
}

#[must_use]
pub fn key_to_u256(key: &H256) -> U256 {
    U256::from_big_endian(key.as_bytes())
}

/// Decode an order-id key; fails if the key does not fit in a `u64`.
pub fn key_to_u64(key: &H256) -> Result<u64> {
    let bytes = key.as_bytes();
    if bytes[..24].iter().any(|b| *b != 0) {
        return Err(DexError::corrupt("index key", "order id wider than 64 bits"));
    }
    Ok(key.to_low_u64_be())
}

/// `a * b / c` with a 512-bit intermediate.
pub fn mul_div(a: &U256, b: &U256, c: &U256) -> Result<U256> {
    if c.is_zero() {
        return Err(DexError::overflow("division by zero"));
    }
    let wide = a.full_mul(*b) / U512::from(*c);
    U256::try_from(wide).map_err(|_| DexError::overflow("mul_div result"))
}
