//! Shared fixture for the matchcore integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use dexmatch_matchcore::{BlockContext, MatchingEngine, OrderOutcome, TradingState};
use dexmatch_settlement::{Ledger, MemoryLedger, SupplyAudit};
use dexmatch_trie::MemoryStore;
use dexmatch_types::{Address, EngineConfig, MarketId, Order, OrderType, Side, U256};

pub const RELAYER_OWNER: u64 = 0x0E;
pub const COINBASE: u64 = 0xC0;
pub const BASE_FUNDING: u64 = 1_000_000;
pub const QUOTE_FUNDING: u64 = 1_000_000_000;

/// Install a test log subscriber once; `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

pub fn template() -> Order {
    Order::dummy_limit(Side::Bid, U256::one(), U256::one())
}

pub struct Fixture {
    pub engine: MatchingEngine,
    pub store: Arc<MemoryStore>,
    pub state: TradingState<Arc<MemoryStore>>,
    pub ledger: MemoryLedger,
    pub audit: SupplyAudit,
    pub ctx: BlockContext,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Whole-unit base token: quote = qty × price.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, 0)
    }

    /// Base token with `decimals` places: quote = qty × price / 10^decimals.
    pub fn with_base_decimals(decimals: usize) -> Self {
        Self::build(EngineConfig::default(), decimals)
    }

    fn build(config: EngineConfig, decimals: usize) -> Self {
        init_tracing();
        let t = template();
        let mut ledger = MemoryLedger::new();
        ledger.register_token(t.base_token, decimals);
        ledger.register_relayer(t.exchange_address, addr(RELAYER_OWNER), U256::exp10(30));
        let store = Arc::new(MemoryStore::default());
        Self {
            engine: MatchingEngine::new(config).expect("valid config"),
            state: TradingState::new(store.clone()),
            store,
            ledger,
            audit: SupplyAudit::new(),
            ctx: BlockContext {
                coinbase: addr(COINBASE),
                timestamp: 1_700_000_000,
            },
        }
    }

    /// Fund `users` with the default base and quote amounts.
    pub fn with_users(users: u64) -> Self {
        let mut fx = Self::new();
        for user in 1..=users {
            fx.fund(user, BASE_FUNDING, QUOTE_FUNDING);
        }
        fx
    }

    pub fn fund(&mut self, user: u64, base: u64, quote: u64) {
        let t = template();
        self.fund_address(addr(user), t.base_token, base);
        self.fund_address(addr(user), t.quote_token, quote);
    }

    pub fn fund_address(&mut self, owner: Address, token: Address, amount: u64) {
        self.ledger.deposit(token, owner, U256::from(amount));
        self.audit.record_mint(token, U256::from(amount));
    }

    pub fn market(&self) -> MarketId {
        template().market()
    }

    /// A limit order from `user` carrying the user's next nonce.
    pub fn limit(&self, user: u64, side: Side, price: u64, qty: u64) -> Order {
        let nonce = self.ledger.nonce(&addr(user));
        Order::dummy_limit_for_user(addr(user), side, U256::from(price), U256::from(qty), nonce)
    }

    pub fn market_order(&self, user: u64, side: Side, qty: u64) -> Order {
        let mut order = self.limit(user, side, 0, qty);
        order.order_type = OrderType::Market;
        order.hash = order.compute_hash();
        order
    }

    pub fn process(&mut self, order: Order) -> OrderOutcome {
        self.engine
            .process_order(&mut self.state, &mut self.ledger, &self.ctx, order)
            .expect("order processed")
    }

    pub fn submit(&mut self, user: u64, side: Side, price: u64, qty: u64) -> OrderOutcome {
        let order = self.limit(user, side, price, qty);
        self.process(order)
    }

    pub fn volume_at(&self, side: Side, price: u64) -> U256 {
        self.state
            .volume_at(&self.market(), side, &U256::from(price))
            .unwrap()
    }

    /// Check both tokens' supply against what was deposited.
    pub fn assert_supply(&self) {
        let t = template();
        for token in [t.base_token, t.quote_token] {
            self.audit
                .verify(&token, self.ledger.total_supply(&token))
                .unwrap();
        }
    }
}
