//! Account ledger interface and the in-memory reference ledger.
//!
//! The ledger owns token balances, user nonces, relayer fee reserves and
//! native balances. It follows the enclosing transaction model: callers take
//! a [`Ledger::snapshot`] before an order and [`Ledger::revert_to_snapshot`]
//! on a fatal error.

use std::collections::BTreeMap;

use dexmatch_types::{Address, DexError, Result, U256};

/// Balances, nonces and relayer registry consulted by settlement.
pub trait Ledger {
    fn token_balance(&self, token: &Address, owner: &Address) -> U256;
    fn set_token_balance(&mut self, token: &Address, owner: &Address, amount: U256);

    /// Next nonce the user must submit.
    fn nonce(&self, user: &Address) -> u64;
    fn set_nonce(&mut self, user: &Address, nonce: u64);

    /// Native-token reserve a relayer keeps for matching fees.
    fn relayer_fee(&self, relayer: &Address) -> U256;
    fn set_relayer_fee(&mut self, relayer: &Address, amount: U256);
    /// Owner of a registered relayer; `None` if unregistered.
    fn relayer_owner(&self, relayer: &Address) -> Option<Address>;

    /// Owner credited with fees on behalf of a block proposer.
    fn proposer_owner(&self, coinbase: &Address) -> Option<Address>;
    fn add_native_balance(&mut self, account: &Address, amount: U256) -> Result<()>;

    /// `10^decimals` of a token.
    fn token_decimal(&self, token: &Address) -> Result<U256>;

    fn snapshot(&mut self) -> usize;
    fn revert_to_snapshot(&mut self, snapshot: usize) -> Result<()>;
    /// Make every change permanent and drop the undo history. Snapshots
    /// taken before the commit can no longer be reverted to.
    fn commit(&mut self);
}

#[derive(Debug, Clone)]
enum LedgerUndo {
    Balance {
        token: Address,
        owner: Address,
        prev: Option<U256>,
    },
    Nonce {
        user: Address,
        prev: Option<u64>,
    },
    RelayerFee {
        relayer: Address,
        prev: Option<U256>,
    },
    Native {
        account: Address,
        prev: Option<U256>,
    },
}

/// In-memory [`Ledger`] with an undo log.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    balances: BTreeMap<(Address, Address), U256>,
    nonces: BTreeMap<Address, u64>,
    relayer_fees: BTreeMap<Address, U256>,
    relayer_owners: BTreeMap<Address, Address>,
    proposer_owners: BTreeMap<Address, Address>,
    native: BTreeMap<Address, U256>,
    decimals: BTreeMap<Address, U256>,
    undo: Vec<LedgerUndo>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a relayer with its owner and initial fee reserve.
    pub fn register_relayer(&mut self, relayer: Address, owner: Address, reserve: U256) {
        self.relayer_owners.insert(relayer, owner);
        self.relayer_fees.insert(relayer, reserve);
    }

    pub fn register_proposer(&mut self, coinbase: Address, owner: Address) {
        self.proposer_owners.insert(coinbase, owner);
    }

    pub fn register_token(&mut self, token: Address, decimals: usize) {
        self.decimals.insert(token, U256::exp10(decimals));
    }

    /// Credit tokens outside any snapshot (genesis funding).
    pub fn deposit(&mut self, token: Address, owner: Address, amount: U256) {
        let entry = self.balances.entry((token, owner)).or_default();
        *entry = entry.saturating_add(amount);
    }

    #[must_use]
    pub fn native_balance(&self, account: &Address) -> U256 {
        self.native.get(account).copied().unwrap_or_default()
    }

    /// Sum of every holder's balance of `token`.
    #[must_use]
    pub fn total_supply(&self, token: &Address) -> U256 {
        self.balances
            .iter()
            .filter(|((t, _), _)| t == token)
            .fold(U256::zero(), |acc, (_, v)| acc.saturating_add(*v))
    }

    /// Sum of native balances and relayer reserves.
    #[must_use]
    pub fn native_supply(&self) -> U256 {
        self.native
            .values()
            .chain(self.relayer_fees.values())
            .fold(U256::zero(), |acc, v| acc.saturating_add(*v))
    }
}

impl Ledger for MemoryLedger {
    fn token_balance(&self, token: &Address, owner: &Address) -> U256 {
        self.balances
            .get(&(*token, *owner))
            .copied()
            .unwrap_or_default()
    }

    fn set_token_balance(&mut self, token: &Address, owner: &Address, amount: U256) {
        let prev = self.balances.insert((*token, *owner), amount);
        self.undo.push(LedgerUndo::Balance {
            token: *token,
            owner: *owner,
            prev,
        });
    }

    fn nonce(&self, user: &Address) -> u64 {
        self.nonces.get(user).copied().unwrap_or(0)
    }

    fn set_nonce(&mut self, user: &Address, nonce: u64) {
        let prev = self.nonces.insert(*user, nonce);
        self.undo.push(LedgerUndo::Nonce { user: *user, prev });
    }

    fn relayer_fee(&self, relayer: &Address) -> U256 {
        self.relayer_fees.get(relayer).copied().unwrap_or_default()
    }

    fn set_relayer_fee(&mut self, relayer: &Address, amount: U256) {
        let prev = self.relayer_fees.insert(*relayer, amount);
        self.undo.push(LedgerUndo::RelayerFee {
            relayer: *relayer,
            prev,
        });
    }

    fn relayer_owner(&self, relayer: &Address) -> Option<Address> {
        self.relayer_owners.get(relayer).copied()
    }

    fn proposer_owner(&self, coinbase: &Address) -> Option<Address> {
        self.proposer_owners.get(coinbase).copied()
    }

    fn add_native_balance(&mut self, account: &Address, amount: U256) -> Result<()> {
        let current = self.native_balance(account);
        let next = current
            .checked_add(amount)
            .ok_or_else(|| DexError::ArithmeticOverflow {
                context: "native balance".into(),
            })?;
        let prev = self.native.insert(*account, next);
        self.undo.push(LedgerUndo::Native {
            account: *account,
            prev,
        });
        Ok(())
    }

    fn token_decimal(&self, token: &Address) -> Result<U256> {
        self.decimals
            .get(token)
            .copied()
            .ok_or_else(|| DexError::InvalidOrder {
                reason: format!("unknown token decimals for {token:?}"),
            })
    }

    fn snapshot(&mut self) -> usize {
        self.undo.len()
    }

    fn revert_to_snapshot(&mut self, snapshot: usize) -> Result<()> {
        if snapshot > self.undo.len() {
            return Err(DexError::Internal(format!(
                "ledger snapshot {snapshot} is ahead of the undo log ({})",
                self.undo.len()
            )));
        }
        while self.undo.len() > snapshot {
            let Some(entry) = self.undo.pop() else { break };
            match entry {
                LedgerUndo::Balance { token, owner, prev } => {
                    restore(&mut self.balances, (token, owner), prev);
                }
                LedgerUndo::Nonce { user, prev } => restore(&mut self.nonces, user, prev),
                LedgerUndo::RelayerFee { relayer, prev } => {
                    restore(&mut self.relayer_fees, relayer, prev);
                }
                LedgerUndo::Native { account, prev } => restore(&mut self.native, account, prev),
            }
        }
        Ok(())
    }

    fn commit(&mut self) {
        tracing::debug!(undone = self.undo.len(), "Ledger committed");
        self.undo.clear();
    }
}

fn restore<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, prev: Option<V>) {
    match prev {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}
