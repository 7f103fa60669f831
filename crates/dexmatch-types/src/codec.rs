//! Fixed-width binary records and storage keys.
//!
//! Every persisted object is one variant of the closed [`Record`] enum with
//! its own fixed-width layout. Integers are big-endian and left-padded to
//! their field width; ASCII fields are zero-padded on the right. The record
//! kind never appears inside the encoding: it lives only in the storage-key
//! prefix, see [`prefix`].

use crate::constants::{
    ADDRESS_LENGTH, BOOK_SIDE_RECORD_LENGTH, EXCHANGE_RECORD_LENGTH, HASH_LENGTH,
    INDEX_NODE_HEADER_LENGTH, ORDER_RECORD_LENGTH, PAIR_NAME_LENGTH, PRICE_LEVEL_RECORD_LENGTH,
    SIDE_FIELD_LENGTH, STATUS_FIELD_LENGTH, TYPE_FIELD_LENGTH,
};
use crate::error::{DexError, Result};
use crate::{
    Address, BookSide, ExchangeObject, H256, MarketId, Order, OrderSignature, OrderStatus,
    OrderType, PriceLevel, Side, U256, u256_to_bytes,
};

// ---------------------------------------------------------------------------
// Storage keys
// ---------------------------------------------------------------------------

/// Storage-key prefixes, one per record family.
pub mod prefix {
    pub const INDEX_NODE: u8 = 0x01;
    pub const NODE_HASH: u8 = 0x02;
    pub const INDEX_ROOT: u8 = 0x03;
    pub const ORDER: u8 = 0x04;
    pub const BOOK_SIDE: u8 = 0x05;
    pub const EXCHANGE: u8 = 0x06;
}

fn storage_key(prefix: u8, parts: &[&[u8]]) -> Vec<u8> {
    let len = 1 + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.push(prefix);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

#[must_use]
pub fn index_node_key(namespace: &H256, key: &H256) -> Vec<u8> {
    storage_key(prefix::INDEX_NODE, &[namespace.as_bytes(), key.as_bytes()])
}

#[must_use]
pub fn node_hash_key(namespace: &H256, key: &H256) -> Vec<u8> {
    storage_key(prefix::NODE_HASH, &[namespace.as_bytes(), key.as_bytes()])
}

#[must_use]
pub fn index_root_key(namespace: &H256) -> Vec<u8> {
    storage_key(prefix::INDEX_ROOT, &[namespace.as_bytes()])
}

#[must_use]
pub fn order_key(market: &MarketId, order_id: u64) -> Vec<u8> {
    storage_key(prefix::ORDER, &[market.as_bytes(), &order_id.to_be_bytes()])
}

#[must_use]
pub fn book_side_key(market: &MarketId, side: Side) -> Vec<u8> {
    storage_key(prefix::BOOK_SIDE, &[market.as_bytes(), &[side.code()]])
}

#[must_use]
pub fn exchange_key(market: &MarketId) -> Vec<u8> {
    storage_key(prefix::EXCHANGE, &[market.as_bytes()])
}

// ---------------------------------------------------------------------------
// Index node
// ---------------------------------------------------------------------------

/// Red-black color bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeColor {
    Black,
    Red,
}

impl NodeColor {
    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Black => 0,
            Self::Red => 1,
        }
    }
}

/// A stored node of the ordered index. Links hold the neighbour's key or
/// the empty sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNode {
    pub left: H256,
    pub right: H256,
    pub parent: H256,
    pub color: NodeColor,
    pub value: Vec<u8>,
}

impl IndexNode {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INDEX_NODE_HEADER_LENGTH + self.value.len());
        out.extend_from_slice(self.left.as_bytes());
        out.extend_from_slice(self.right.as_bytes());
        out.extend_from_slice(self.parent.as_bytes());
        out.push(self.color.as_byte());
        out.extend_from_slice(&self.value);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INDEX_NODE_HEADER_LENGTH {
            return Err(DexError::corrupt(
                "index node",
                format!("{} bytes, need at least {INDEX_NODE_HEADER_LENGTH}", bytes.len()),
            ));
        }
        let mut r = Reader::new("index node", bytes);
        let left = r.h256()?;
        let right = r.h256()?;
        let parent = r.h256()?;
        let color = match r.byte()? {
            0 => NodeColor::Black,
            1 => NodeColor::Red,
            other => {
                return Err(DexError::corrupt("index node", format!("color byte {other}")));
            }
        };
        Ok(Self {
            left,
            right,
            parent,
            color,
            value: r.rest().to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

impl Order {
    /// Encode into the 600-byte order record. Fails only if the pair name
    /// exceeds its field.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.pair_name.len() > PAIR_NAME_LENGTH {
            return Err(DexError::InvalidOrder {
                reason: format!("pair name longer than {PAIR_NAME_LENGTH} bytes"),
            });
        }
        let mut w = Writer::with_capacity(ORDER_RECORD_LENGTH);
        w.u256(&self.quantity);
        w.u256(&self.price);
        w.address(&self.exchange_address);
        w.address(&self.user_address);
        w.address(&self.base_token);
        w.address(&self.quote_token);
        w.padded(self.status.as_str().as_bytes(), STATUS_FIELD_LENGTH);
        w.padded(self.side.as_str().as_bytes(), SIDE_FIELD_LENGTH);
        w.padded(self.order_type.as_str().as_bytes(), TYPE_FIELD_LENGTH);
        w.h256(&self.hash);
        w.byte(self.signature.v);
        w.h256(&self.signature.r);
        w.h256(&self.signature.s);
        w.u256(&self.filled_amount);
        w.u256(&self.nonce);
        w.u256(&self.maker_fee);
        w.u256(&self.taker_fee);
        w.padded(self.pair_name.as_bytes(), PAIR_NAME_LENGTH);
        w.u64(self.created_at);
        w.u64(self.updated_at);
        w.u64(self.order_id);
        w.h256(&self.next_order);
        w.h256(&self.prev_order);
        w.h256(&self.order_list);
        Ok(w.finish())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::exact("order", bytes, ORDER_RECORD_LENGTH)?;
        let quantity = r.u256()?;
        let price = r.u256()?;
        let exchange_address = r.address()?;
        let user_address = r.address()?;
        let base_token = r.address()?;
        let quote_token = r.address()?;
        let status = r.ascii(STATUS_FIELD_LENGTH)?;
        let status = OrderStatus::parse(&status)
            .ok_or_else(|| DexError::corrupt("order", format!("status {status:?}")))?;
        let side = r.ascii(SIDE_FIELD_LENGTH)?;
        let side =
            Side::parse(&side).ok_or_else(|| DexError::corrupt("order", format!("side {side:?}")))?;
        let order_type = r.ascii(TYPE_FIELD_LENGTH)?;
        let order_type = OrderType::parse(&order_type)
            .ok_or_else(|| DexError::corrupt("order", format!("type {order_type:?}")))?;
        let hash = r.h256()?;
        let signature = OrderSignature {
            v: r.byte()?,
            r: r.h256()?,
            s: r.h256()?,
        };
        Ok(Self {
            quantity,
            price,
            exchange_address,
            user_address,
            base_token,
            quote_token,
            status,
            side,
            order_type,
            hash,
            signature,
            filled_amount: r.u256()?,
            nonce: r.u256()?,
            maker_fee: r.u256()?,
            taker_fee: r.u256()?,
            pair_name: r.ascii(PAIR_NAME_LENGTH)?,
            created_at: r.u64()?,
            updated_at: r.u64()?,
            order_id: r.u64()?,
            next_order: r.h256()?,
            prev_order: r.h256()?,
            order_list: r.h256()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

impl PriceLevel {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(PRICE_LEVEL_RECORD_LENGTH);
        w.u256(&self.volume);
        w.u256(&self.price);
        w.h256(&self.head);
        w.h256(&self.tail);
        w.u64(self.length);
        w.h256(&self.orders_root);
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::exact("price level", bytes, PRICE_LEVEL_RECORD_LENGTH)?;
        Ok(Self {
            volume: r.u256()?,
            price: r.u256()?,
            head: r.h256()?,
            tail: r.h256()?,
            length: r.u64()?,
            orders_root: r.h256()?,
        })
    }
}

impl BookSide {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(BOOK_SIDE_RECORD_LENGTH);
        w.u256(&self.volume);
        w.h256(&self.root);
        w.u64(self.order_count);
        w.u64(self.level_count);
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::exact("book side", bytes, BOOK_SIDE_RECORD_LENGTH)?;
        Ok(Self {
            volume: r.u256()?,
            root: r.h256()?,
            order_count: r.u64()?,
            level_count: r.u64()?,
        })
    }
}

impl ExchangeObject {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(EXCHANGE_RECORD_LENGTH);
        w.u64(self.order_counter);
        w.h256(&self.ask_root);
        w.h256(&self.bid_root);
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::exact("exchange", bytes, EXCHANGE_RECORD_LENGTH)?;
        Ok(Self {
            order_counter: r.u64()?,
            ask_root: r.h256()?,
            bid_root: r.h256()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Discriminant of a [`Record`], mirrored by its storage-key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    IndexNode,
    Order,
    PriceLevel,
    BookSide,
    Exchange,
}

/// Any persisted object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    IndexNode(IndexNode),
    Order(Box<Order>),
    PriceLevel(PriceLevel),
    BookSide(BookSide),
    Exchange(ExchangeObject),
}

impl Record {
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::IndexNode(_) => RecordKind::IndexNode,
            Self::Order(_) => RecordKind::Order,
            Self::PriceLevel(_) => RecordKind::PriceLevel,
            Self::BookSide(_) => RecordKind::BookSide,
            Self::Exchange(_) => RecordKind::Exchange,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(match self {
            Self::IndexNode(node) => node.encode(),
            Self::Order(order) => order.encode()?,
            Self::PriceLevel(level) => level.encode(),
            Self::BookSide(side) => side.encode(),
            Self::Exchange(ex) => ex.encode(),
        })
    }

    pub fn decode(kind: RecordKind, bytes: &[u8]) -> Result<Self> {
        Ok(match kind {
            RecordKind::IndexNode => Self::IndexNode(IndexNode::decode(bytes)?),
            RecordKind::Order => Self::Order(Box::new(Order::decode(bytes)?)),
            RecordKind::PriceLevel => Self::PriceLevel(PriceLevel::decode(bytes)?),
            RecordKind::BookSide => Self::BookSide(BookSide::decode(bytes)?),
            RecordKind::Exchange => Self::Exchange(ExchangeObject::decode(bytes)?),
        })
    }
}

// ---------------------------------------------------------------------------
// Field reader / writer
// ---------------------------------------------------------------------------

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn with_capacity(len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(len),
        }
    }

    fn u256(&mut self, value: &U256) {
        self.buf.extend_from_slice(&u256_to_bytes(value));
    }

    fn h256(&mut self, value: &H256) {
        self.buf.extend_from_slice(value.as_bytes());
    }

    fn address(&mut self, value: &Address) {
        self.buf.extend_from_slice(value.as_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn byte(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Caller guarantees `bytes.len() <= width`.
    fn padded(&mut self, bytes: &[u8], width: usize) {
        let n = bytes.len().min(width);
        self.buf.extend_from_slice(&bytes[..n]);
        self.buf.resize(self.buf.len() + (width - n), 0);
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct Reader<'a> {
    kind: &'static str,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(kind: &'static str, buf: &'a [u8]) -> Self {
        Self { kind, buf, pos: 0 }
    }

    fn exact(kind: &'static str, buf: &'a [u8], len: usize) -> Result<Self> {
        if buf.len() != len {
            return Err(DexError::corrupt(
                kind,
                format!("{} bytes, expected {len}", buf.len()),
            ));
        }
        Ok(Self::new(kind, buf))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| DexError::corrupt(self.kind, "truncated"))?;
        self.pos = end;
        Ok(slice)
    }

    fn u256(&mut self) -> Result<U256> {
        Ok(U256::from_big_endian(self.take(HASH_LENGTH)?))
    }

    fn h256(&mut self) -> Result<H256> {
        Ok(H256::from_slice(self.take(HASH_LENGTH)?))
    }

    fn address(&mut self) -> Result<Address> {
        Ok(Address::from_slice(self.take(ADDRESS_LENGTH)?))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn ascii(&mut self, width: usize) -> Result<String> {
        let raw = self.take(width)?;
        let end = raw.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        String::from_utf8(raw[..end].to_vec())
            .map_err(|_| DexError::corrupt(self.kind, "non-UTF-8 text field"))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}
