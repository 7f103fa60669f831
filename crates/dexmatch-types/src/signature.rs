//! Order authenticity: content hashes, cancel hashes and signer recovery.
//!
//! Orders are signed as Ethereum personal messages: the signer signs
//! `keccak256("\x19Ethereum Signed Message:\n32" ‖ hash)` with a recoverable
//! secp256k1 key and encodes the recovery id as V = 27 or 28. The signer
//! address is the last 20 bytes of `keccak256(uncompressed_pubkey[1..])`.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1};
use serde::{Deserialize, Serialize};

use crate::constants::SIGNED_MESSAGE_PREFIX;
use crate::error::{DexError, Result};
use crate::{
    Address, EMPTY_KEY, H256, Order, OrderSignature, OrderStatus, OrderType, Side, U256,
    keccak256, u256_to_bytes,
};

/// Hash a cancel request for the order identified by `target_hash`.
#[must_use]
pub fn cancel_hash(target_hash: &H256, nonce: &U256) -> H256 {
    keccak256(&[
        target_hash.as_bytes(),
        &u256_to_bytes(nonce),
        OrderStatus::Cancelled.as_str().as_bytes(),
    ])
}

/// The personal-message digest actually signed for `hash`.
#[must_use]
pub fn signed_message_hash(hash: &H256) -> H256 {
    keccak256(&[SIGNED_MESSAGE_PREFIX, hash.as_bytes()])
}

/// Ethereum address of a secp256k1 public key.
#[must_use]
pub fn public_key_address(key: &PublicKey) -> Address {
    let uncompressed = key.serialize_uncompressed();
    let digest = keccak256(&[&uncompressed[1..]]);
    Address::from_slice(&digest.as_bytes()[12..])
}

/// Recover the address that signed `hash`.
pub fn recover_signer(hash: &H256, signature: &OrderSignature) -> Result<Address> {
    let recovery = match signature.v {
        27 | 28 => i32::from(signature.v - 27),
        0 | 1 => i32::from(signature.v),
        other => {
            return Err(DexError::InvalidSignature {
                reason: format!("recovery byte {other}"),
            });
        }
    };
    let recid = RecoveryId::from_i32(recovery)?;
    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(signature.r.as_bytes());
    compact[32..].copy_from_slice(signature.s.as_bytes());
    let sig = RecoverableSignature::from_compact(&compact, recid)?;
    let msg = Message::from_digest(signed_message_hash(hash).to_fixed_bytes());
    let key = Secp256k1::verification_only().recover_ecdsa(&msg, &sig)?;
    Ok(public_key_address(&key))
}

/// Sign `hash` as a personal message.
pub fn sign_hash(secret: &secp256k1::SecretKey, hash: &H256) -> OrderSignature {
    let msg = Message::from_digest(signed_message_hash(hash).to_fixed_bytes());
    let sig = Secp256k1::signing_only().sign_ecdsa_recoverable(&msg, secret);
    let (recid, compact) = sig.serialize_compact();
    // recovery ids are 0..=3; only 0 and 1 occur for valid keys
    let v = u8::try_from(recid.to_i32()).unwrap_or(0) + 27;
    OrderSignature {
        v,
        r: H256::from_slice(&compact[..32]),
        s: H256::from_slice(&compact[32..]),
    }
}

/// Address controlled by `secret`.
#[must_use]
pub fn secret_key_address(secret: &secp256k1::SecretKey) -> Address {
    let secp = Secp256k1::signing_only();
    public_key_address(&PublicKey::from_secret_key(&secp, secret))
}

/// A signed order or cancel request as received from a relayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSubmission {
    pub quantity: U256,
    pub price: U256,
    pub exchange_address: Address,
    pub user_address: Address,
    pub base_token: Address,
    pub quote_token: Address,
    /// NEW for a fresh order, CANCELLED for a cancel request.
    pub status: OrderStatus,
    pub side: Side,
    pub order_type: OrderType,
    pub pair_name: String,
    pub nonce: U256,
    pub maker_fee: U256,
    pub taker_fee: U256,
    /// For a cancel, the hash of the order being cancelled.
    pub hash: H256,
    pub signature: OrderSignature,
    /// For a cancel, the id of the order being cancelled.
    #[serde(default)]
    pub order_id: u64,
}

impl OrderSubmission {
    /// Verify authenticity and convert into an engine order stamped with
    /// `timestamp`.
    ///
    /// For a new order the supplied hash must equal the recomputed content
    /// hash. For a cancel the signature covers [`cancel_hash`] of the target.
    pub fn into_order(self, timestamp: u64) -> Result<Order> {
        let order = Order {
            quantity: self.quantity,
            price: self.price,
            exchange_address: self.exchange_address,
            user_address: self.user_address,
            base_token: self.base_token,
            quote_token: self.quote_token,
            status: self.status,
            side: self.side,
            order_type: self.order_type,
            hash: self.hash,
            signature: self.signature,
            filled_amount: U256::zero(),
            nonce: self.nonce,
            maker_fee: self.maker_fee,
            taker_fee: self.taker_fee,
            pair_name: self.pair_name,
            created_at: timestamp,
            updated_at: timestamp,
            order_id: self.order_id,
            next_order: EMPTY_KEY,
            prev_order: EMPTY_KEY,
            order_list: EMPTY_KEY,
        };
        let signed = match order.status {
            OrderStatus::Cancelled => cancel_hash(&order.hash, &order.nonce),
            OrderStatus::New => {
                let expected = order.compute_hash();
                if expected != order.hash {
                    return Err(DexError::HashMismatch {
                        expected,
                        actual: order.hash,
                    });
                }
                expected
            }
            other => {
                return Err(DexError::InvalidOrder {
                    reason: format!("submission status {other}"),
                });
            }
        };
        let signer = recover_signer(&signed, &order.signature)?;
        if signer != order.user_address {
            return Err(DexError::InvalidSignature {
                reason: format!(
                    "signed by {signer:?}, order belongs to {:?}",
                    order.user_address
                ),
            });
        }
        Ok(order)
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl OrderSubmission {
    /// A signed NEW limit submission from the owner of `secret`.
    pub fn signed_limit(
        secret: &secp256k1::SecretKey,
        side: Side,
        price: U256,
        quantity: U256,
        nonce: u64,
    ) -> Self {
        let template = Order::dummy_limit_for_user(
            secret_key_address(secret),
            side,
            price,
            quantity,
            nonce,
        );
        Self {
            quantity,
            price,
            exchange_address: template.exchange_address,
            user_address: template.user_address,
            base_token: template.base_token,
            quote_token: template.quote_token,
            status: OrderStatus::New,
            side,
            order_type: OrderType::Limit,
            pair_name: template.pair_name.clone(),
            nonce: template.nonce,
            maker_fee: template.maker_fee,
            taker_fee: template.taker_fee,
            hash: template.hash,
            signature: sign_hash(secret, &template.hash),
            order_id: 0,
        }
    }

    /// A signed cancel for a resting order.
    pub fn signed_cancel(secret: &secp256k1::SecretKey, target: &Order, nonce: u64) -> Self {
        let nonce = U256::from(nonce);
        Self {
            quantity: target.quantity,
            price: target.price,
            exchange_address: target.exchange_address,
            user_address: target.user_address,
            base_token: target.base_token,
            quote_token: target.quote_token,
            status: OrderStatus::Cancelled,
            side: target.side,
            order_type: target.order_type,
            pair_name: target.pair_name.clone(),
            nonce,
            maker_fee: target.maker_fee,
            taker_fee: target.taker_fee,
            hash: target.hash,
            signature: sign_hash(secret, &cancel_hash(&target.hash, &nonce)),
            order_id: target.order_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::SecretKey;

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn sign_then_recover() {
        let secret = key(7);
        let hash = H256::repeat_byte(0x42);
        let sig = sign_hash(&secret, &hash);
        assert!(sig.v == 27 || sig.v == 28);
        assert_eq!(recover_signer(&hash, &sig).unwrap(), secret_key_address(&secret));
    }

    #[test]
    fn known_address_for_secret_one() {
        let mut raw = [0u8; 32];
        raw[31] = 1;
        let secret = SecretKey::from_slice(&raw).unwrap();
        assert_eq!(
            hex::encode(secret_key_address(&secret).as_bytes()),
            "7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn submission_into_order() {
        let secret = key(9);
        let sub = OrderSubmission::signed_limit(
            &secret,
            Side::Bid,
            U256::from(100),
            U256::from(10),
            0,
        );
        let order = sub.into_order(1_000).unwrap();
        assert_eq!(order.user_address, secret_key_address(&secret));
        assert_eq!(order.created_at, 1_000);
        assert_eq!(order.hash, order.compute_hash());
    }

    #[test]
    fn tampered_submission_is_rejected() {
        let secret = key(9);
        let mut sub = OrderSubmission::signed_limit(
            &secret,
            Side::Bid,
            U256::from(100),
            U256::from(10),
            0,
        );
        sub.quantity = U256::from(11);
        assert!(matches!(
            sub.clone().into_order(0),
            Err(DexError::HashMismatch { .. })
        ));

        // Re-hash with the new quantity but keep the old signature.
        let order =
            Order::dummy_limit_for_user(sub.user_address, Side::Bid, sub.price, sub.quantity, 0);
        sub.hash = order.compute_hash();
        assert!(matches!(
            sub.into_order(0),
            Err(DexError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn wrong_signer_is_rejected() {
        let mut sub = OrderSubmission::signed_limit(
            &key(3),
            Side::Ask,
            U256::from(5),
            U256::from(5),
            1,
        );
        sub.signature = sign_hash(&key(4), &sub.hash);
        assert!(matches!(
            sub.into_order(0),
            Err(DexError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn cancel_submission_verifies_cancel_hash() {
        let secret = key(11);
        let target = OrderSubmission::signed_limit(
            &secret,
            Side::Ask,
            U256::from(100),
            U256::from(4),
            0,
        )
        .into_order(0)
        .unwrap();
        let cancel = OrderSubmission::signed_cancel(&secret, &target, 1);
        let order = cancel.into_order(5).unwrap();
        assert!(order.is_cancel());
        assert_eq!(order.hash, target.hash);
    }

    #[test]
    fn bad_recovery_byte() {
        let sig = OrderSignature {
            v: 31,
            ..OrderSignature::default()
        };
        assert!(matches!(
            recover_signer(&H256::zero(), &sig),
            Err(DexError::InvalidSignature { .. })
        ));
    }
}
