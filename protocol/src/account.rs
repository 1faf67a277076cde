//! # Account Ledger
//!
//! Balance bookkeeping for the interfaces the core consumes: confirmed
//! balances, unconfirmed balances (the admission pipeline's double-spend
//! guard), effective balances for hallmark weighting, and the alias
//! registry touched by alias-assignment transactions.
//!
//! Every account carries two balances. The confirmed balance moves only
//! when a block is applied or undone. The unconfirmed balance additionally
//! reflects transactions sitting in the pool, so a sender cannot spend the
//! same funds twice before either spend confirms. Both are denominated in
//! atomic units.
//!
//! Mutations on the hot paths happen with the chain lock held by the
//! caller; the maps here are concurrent only so that read-side consumers
//! (peer weighting, status queries) never block the pipeline.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use crate::config::ONE_NHZ;
use crate::crypto::account_id_from_public_key;
use crate::events::Listeners;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Event kinds emitted by the ledger. Payload is the account id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountEvent {
    /// Confirmed balance changed.
    Balance,
    /// Unconfirmed balance changed.
    UnconfirmedBalance,
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A snapshot of one account's state.
#[derive(Debug, Clone, Default)]
pub struct Account {
    /// Account id: first 8 bytes of SHA-256(public key), little-endian.
    pub id: i64,
    /// The account's public key, once observed on a signed transaction.
    pub public_key: Option<[u8; 32]>,
    /// Confirmed balance in atomic units.
    pub balance: i64,
    /// Confirmed balance minus pending outgoing spends, in atomic units.
    pub unconfirmed_balance: i64,
}

impl Account {
    /// Stake eligible for peer weighting, in whole NHZ.
    pub fn effective_balance(&self) -> i64 {
        self.balance / ONE_NHZ
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// An alias registered on chain by an alias-assignment transaction.
#[derive(Debug, Clone)]
pub struct Alias {
    pub name: String,
    pub uri: String,
    pub account_id: i64,
    /// Id of the transaction that last assigned this alias. Checked on
    /// block undo: an alias reassigned since cannot be rolled back.
    pub transaction_id: i64,
}

/// The account state store.
pub struct Ledger {
    accounts: DashMap<i64, Account>,
    aliases: DashMap<String, Alias>,
    listeners: Arc<Listeners<i64, AccountEvent>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            aliases: DashMap::new(),
            listeners: Arc::new(Listeners::new()),
        }
    }

    /// The ledger's event registry. The peer registry subscribes here to
    /// re-derive hallmark weights on balance changes.
    pub fn listeners(&self) -> &Arc<Listeners<i64, AccountEvent>> {
        &self.listeners
    }

    /// Snapshot of an account, if it exists.
    pub fn get(&self, account_id: i64) -> Option<Account> {
        self.accounts.get(&account_id).map(|a| a.clone())
    }

    /// Records the public key for an account on first sight. A later,
    /// different key for the same id is ignored with a warning; the id
    /// projection is lossy and a mismatch means a collision or an attack.
    pub fn associate_public_key(&self, public_key: &[u8; 32]) -> i64 {
        let id = account_id_from_public_key(public_key);
        let mut entry = self.accounts.entry(id).or_insert_with(|| Account {
            id,
            ..Account::default()
        });
        match entry.public_key {
            None => entry.public_key = Some(*public_key),
            Some(existing) if existing != *public_key => {
                warn!(account = id, "public key mismatch for account id, keeping first");
            }
            _ => {}
        }
        id
    }

    /// Confirmed balance in atomic units; 0 for unknown accounts.
    pub fn balance(&self, account_id: i64) -> i64 {
        self.accounts.get(&account_id).map(|a| a.balance).unwrap_or(0)
    }

    /// Unconfirmed balance in atomic units; 0 for unknown accounts.
    pub fn unconfirmed_balance(&self, account_id: i64) -> i64 {
        self.accounts
            .get(&account_id)
            .map(|a| a.unconfirmed_balance)
            .unwrap_or(0)
    }

    /// Effective balance in whole NHZ; 0 for unknown accounts.
    pub fn effective_balance(&self, account_id: i64) -> i64 {
        self.accounts
            .get(&account_id)
            .map(|a| a.effective_balance())
            .unwrap_or(0)
    }

    /// Adjusts the confirmed balance and emits `Balance`.
    pub fn add_to_balance(&self, account_id: i64, delta: i64) {
        self.with_account(account_id, |account| {
            account.balance = account.balance.saturating_add(delta);
        });
        self.listeners.notify(AccountEvent::Balance, &account_id);
    }

    /// Adjusts the unconfirmed balance and emits `UnconfirmedBalance`.
    pub fn add_to_unconfirmed_balance(&self, account_id: i64, delta: i64) {
        self.with_account(account_id, |account| {
            account.unconfirmed_balance = account.unconfirmed_balance.saturating_add(delta);
        });
        self.listeners.notify(AccountEvent::UnconfirmedBalance, &account_id);
    }

    /// Adjusts both balances together (incoming funds) and emits both
    /// events.
    pub fn add_to_balance_and_unconfirmed(&self, account_id: i64, delta: i64) {
        self.with_account(account_id, |account| {
            account.balance = account.balance.saturating_add(delta);
            account.unconfirmed_balance = account.unconfirmed_balance.saturating_add(delta);
        });
        self.listeners.notify(AccountEvent::Balance, &account_id);
        self.listeners.notify(AccountEvent::UnconfirmedBalance, &account_id);
    }

    /// Attempts to reserve `amount` from the account's unconfirmed
    /// balance. Returns `false` without mutating when funds are short.
    /// Callers hold the chain lock, so check-then-subtract is atomic
    /// against every other balance mutation path.
    pub fn reserve_unconfirmed(&self, account_id: i64, amount: i64) -> bool {
        let reserved = self.with_account(account_id, |account| {
            if account.unconfirmed_balance < amount {
                false
            } else {
                account.unconfirmed_balance -= amount;
                true
            }
        });
        if reserved {
            self.listeners.notify(AccountEvent::UnconfirmedBalance, &account_id);
        }
        reserved
    }

    // -- Aliases ------------------------------------------------------------

    pub fn alias(&self, name: &str) -> Option<Alias> {
        self.aliases.get(&name.to_lowercase()).map(|a| a.clone())
    }

    /// Registers or reassigns an alias. Alias names are case-insensitive.
    pub fn set_alias(&self, alias: Alias) {
        self.aliases.insert(alias.name.to_lowercase(), alias);
    }

    /// Removes an alias if it was last assigned by `transaction_id`.
    /// Returns `false` when the alias is missing or has been reassigned,
    /// in which case the assignment cannot be undone.
    pub fn remove_alias_if_assigned_by(&self, name: &str, transaction_id: i64) -> bool {
        let key = name.to_lowercase();
        let matches = self
            .aliases
            .get(&key)
            .map(|a| a.transaction_id == transaction_id)
            .unwrap_or(false);
        if matches {
            self.aliases.remove(&key);
        }
        matches
    }

    /// Runs `f` with the (created-if-absent) account entry locked. The
    /// entry guard never escapes, so listener notification always
    /// happens after it is released.
    fn with_account<R>(&self, account_id: i64, f: impl FnOnce(&mut Account) -> R) -> R {
        let mut entry = self.accounts.entry(account_id).or_insert_with(|| Account {
            id: account_id,
            ..Account::default()
        });
        f(&mut entry)
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
