//! Order types for the dexmatch matching engine.
//!
//! An [`Order`] is created from a signed submission, rests in the book under
//! its price level's order-id sub-index, and has its remaining quantity
//! reduced in place on each match. Quantity zero means logically removed.

use serde::{Deserialize, Serialize};

use crate::primitives::{Address, EMPTY_KEY, H256, MarketId, U256, keccak256, u256_to_bytes};

/// Which side of the book this order is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Bid => Self::Ask,
            Self::Ask => Self::Bid,
        }
    }

    /// ASCII form stored in order records.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bid => "BID",
            Self::Ask => "ASK",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BID" => Some(Self::Bid),
            "ASK" => Some(Self::Ask),
            _ => None,
        }
    }

    /// Numeric encoding used in content hashes and storage keys.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Bid => 0,
            Self::Ask => 1,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The type of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Limit => "LIMIT",
            Self::Market => "MARKET",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LIMIT" => Some(Self::Limit),
            "MARKET" => Some(Self::Market),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Open,
    PartialFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Open => "OPEN",
            Self::PartialFilled => "PARTIAL_FILLED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(Self::New),
            "OPEN" => Some(Self::Open),
            "PARTIAL_FILLED" => Some(Self::PartialFilled),
            "FILLED" => Some(Self::Filled),
            "CANCELLED" => Some(Self::Cancelled),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// `true` while the order may still rest in the book.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Open | Self::PartialFilled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recoverable ECDSA signature (V is 27 or 28).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OrderSignature {
    pub v: u8,
    pub r: H256,
    pub s: H256,
}

/// Core order struct.
///
/// `next_order` and `prev_order` are carried for layout compatibility and
/// stay at the empty sentinel; FIFO inside a level comes from the level's
/// order-id sub-index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Remaining quantity in base-token units.
    pub quantity: U256,
    /// Limit price in quote units per whole base token. Zero means "no price".
    pub price: U256,
    /// Relayer that submitted the order.
    pub exchange_address: Address,
    pub user_address: Address,
    pub base_token: Address,
    pub quote_token: Address,
    pub status: OrderStatus,
    pub side: Side,
    pub order_type: OrderType,
    /// Content hash over the economic fields.
    pub hash: H256,
    pub signature: OrderSignature,
    pub filled_amount: U256,
    pub nonce: U256,
    pub maker_fee: U256,
    pub taker_fee: U256,
    pub pair_name: String,
    pub created_at: u64,
    pub updated_at: u64,
    /// Assigned from the market's counter when the order rests.
    pub order_id: u64,
    pub next_order: H256,
    pub prev_order: H256,
    /// Namespace of the order-id sub-index holding this order.
    pub order_list: H256,
}

impl Order {
    /// Deterministic content hash of the economic fields.
    #[must_use]
    pub fn compute_hash(&self) -> H256 {
        let side = u256_to_bytes(&U256::from(self.side.code()));
        keccak256(&[
            self.exchange_address.as_bytes(),
            self.user_address.as_bytes(),
            self.base_token.as_bytes(),
            self.quote_token.as_bytes(),
            &u256_to_bytes(&self.quantity),
            &u256_to_bytes(&self.price),
            &side,
            &u256_to_bytes(&self.nonce),
            &u256_to_bytes(&self.maker_fee),
            &u256_to_bytes(&self.taker_fee),
        ])
    }

    #[must_use]
    pub fn market(&self) -> MarketId {
        MarketId::from_tokens(&self.base_token, &self.quote_token)
    }

    /// A submission carrying CANCELLED status is a cancel request.
    #[must_use]
    pub fn is_cancel(&self) -> bool {
        self.status == OrderStatus::Cancelled
    }

    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Whether this order's limit accepts a trade at `price`.
    #[must_use]
    pub fn crosses(&self, price: &U256) -> bool {
        match (self.order_type, self.side) {
            (OrderType::Market, _) => true,
            (OrderType::Limit, Side::Bid) => *price <= self.price,
            (OrderType::Limit, Side::Ask) => *price >= self.price,
        }
    }

    /// Reduce the remaining quantity by a fill and update status.
    pub fn apply_fill(&mut self, quantity: &U256, timestamp: u64) {
        self.quantity = self.quantity.saturating_sub(*quantity);
        self.filled_amount = self.filled_amount.saturating_add(*quantity);
        self.status = if self.quantity.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartialFilled
        };
        self.updated_at = timestamp;
    }

    /// Mark as rejected by the engine: quantity zeroed.
    pub fn reject(&mut self, timestamp: u64) {
        self.quantity = U256::zero();
        self.status = OrderStatus::Rejected;
        self.updated_at = timestamp;
    }
}

/// Why the engine rejected an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    InvalidPrice,
    InvalidQuantity,
    InsufficientBalance,
    InsufficientRelayerFee,
    RelayerNotRegistered,
    /// Fee rate at or above the fee base.
    FeeRateTooHigh,
    /// The affordable quantity is too small to move any quote tokens.
    DustTrade,
    /// The level-walk budget ran out while the remainder still crossed.
    LevelBudgetExhausted,
    CancelRejected(String),
    InvalidOrder(String),
}

impl RejectReason {
    /// Map a permanent-reject error onto a reason; `None` for other classes.
    #[must_use]
    pub fn from_error(err: &crate::DexError) -> Option<Self> {
        use crate::DexError as E;
        Some(match err {
            E::InvalidPrice { .. } => Self::InvalidPrice,
            E::InvalidQuantity { .. } => Self::InvalidQuantity,
            E::InsufficientBalance { .. } => Self::InsufficientBalance,
            E::InsufficientRelayerFee { .. } => Self::InsufficientRelayerFee,
            E::RelayerNotRegistered(_) => Self::RelayerNotRegistered,
            E::CancelRejected { reason } => Self::CancelRejected(reason.clone()),
            E::InvalidOrder { reason } | E::InvalidSignature { reason } => {
                Self::InvalidOrder(reason.clone())
            }
            E::HashMismatch { .. } => Self::InvalidOrder("hash mismatch".into()),
            E::OrderNotFound { order_id } => {
                Self::CancelRejected(format!("order {order_id} not found"))
            }
            _ => return None,
        })
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CancelRejected(reason) => write!(f, "cancel rejected: {reason}"),
            Self::InvalidOrder(reason) => write!(f, "invalid order: {reason}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// An order dropped by the engine, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedOrder {
    pub order: Order,
    pub reason: RejectReason,
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Order {
    /// A limit order on a fixed test pair with a valid content hash.
    pub fn dummy_limit(side: Side, price: U256, quantity: U256) -> Self {
        Self::dummy_limit_for_user(Address::from_low_u64_be(0xA11CE), side, price, quantity, 0)
    }

    pub fn dummy_limit_for_user(
        user: Address,
        side: Side,
        price: U256,
        quantity: U256,
        nonce: u64,
    ) -> Self {
        let mut order = Self {
            quantity,
            price,
            exchange_address: Address::from_low_u64_be(0xE0),
            user_address: user,
            base_token: Address::from_low_u64_be(0xBA5E),
            quote_token: Address::from_low_u64_be(0x0007E),
            status: OrderStatus::New,
            side,
            order_type: OrderType::Limit,
            hash: EMPTY_KEY,
            signature: OrderSignature::default(),
            filled_amount: U256::zero(),
            nonce: U256::from(nonce),
            maker_fee: U256::from(10),
            taker_fee: U256::from(10),
            pair_name: "BASE/QUOTE".to_string(),
            created_at: 0,
            updated_at: 0,
            order_id: 0,
            next_order: EMPTY_KEY,
            prev_order: EMPTY_KEY,
            order_list: EMPTY_KEY,
        };
        order.hash = order.compute_hash();
        order
    }
}
