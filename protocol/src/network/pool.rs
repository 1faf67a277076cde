//! # Transaction Pool
//!
//! The unconfirmed-transaction set and everything feeding it: the
//! admission pipeline shared by client broadcasts and peer gossip, the
//! block apply/undo hooks, the replay-hash index, and the three
//! maintenance workers.
//!
//! ## Indices
//!
//! - `unconfirmed` — admitted, not yet in a block. Keyed by id.
//! - `double_spending` — admitted by signature but rejected by balance;
//!   kept so repeated offers of the same transaction do no work. Keyed
//!   by id.
//! - `non_broadcasted` — locally originated, not yet observed back from
//!   the network; the rebroadcast worker keeps resending these. Keyed
//!   by id.
//! - `transaction_hashes` — full 32-byte hash → `{id, expiration}`, the
//!   replay guard. Ids are lossy projections, so replay prevention must
//!   key on the full hash.
//!
//! The id maps silently overwrite when two distinct transactions share a
//! 64-bit id. That collision is possible by construction and tolerated;
//! the hash index is what protects the chain.
//!
//! ## Locking
//!
//! Every mutation path runs under the chain lock, serializing admission
//! against block processing so the "already confirmed?" check and the
//! pool insertion are atomic. Listener notification happens after the
//! lock is released, in the mutating thread.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::account::Ledger;
use crate::config::{
    GRANDFATHERED_COLLISION_HEIGHT, MAX_DEADLINE_MINUTES, MAX_TIMESTAMP_DRIFT_SECONDS,
};
use crate::epoch::epoch_time;
use crate::events::Listeners;
use crate::network::peers::Peers;
use crate::network::protocol;
use crate::scheduler::Scheduler;
use crate::storage::{Block, Blockchain};
use crate::transaction::{codec, Transaction, UndoNotSupportedError, ValidationError};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Event kinds emitted by the pool. Payload is the affected batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionEvent {
    AddedUnconfirmedTransactions,
    AddedDoubleSpendingTransactions,
    AddedConfirmedTransactions,
    RemovedUnconfirmedTransactions,
}

/// Cached per-hash state so the replay index can be pruned by expiration
/// without re-parsing transactions.
#[derive(Debug, Clone, Copy)]
struct TransactionHashInfo {
    transaction_id: i64,
    expiration: u32,
}

impl TransactionHashInfo {
    fn of(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id(),
            expiration: tx.expiration(),
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionPool
// ---------------------------------------------------------------------------

/// The pool. One per node; shared behind `Arc`.
pub struct TransactionPool {
    chain: Arc<Blockchain>,
    ledger: Arc<Ledger>,
    peers: Arc<Peers>,
    unconfirmed: DashMap<i64, Arc<Transaction>>,
    double_spending: DashMap<i64, Arc<Transaction>>,
    non_broadcasted: DashMap<i64, Arc<Transaction>>,
    transaction_hashes: DashMap<[u8; 32], TransactionHashInfo>,
    listeners: Arc<Listeners<Vec<Arc<Transaction>>, TransactionEvent>>,
}

impl TransactionPool {
    pub fn new(chain: Arc<Blockchain>, ledger: Arc<Ledger>, peers: Arc<Peers>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            ledger,
            peers,
            unconfirmed: DashMap::new(),
            double_spending: DashMap::new(),
            non_broadcasted: DashMap::new(),
            transaction_hashes: DashMap::new(),
            listeners: Arc::new(Listeners::new()),
        })
    }

    /// The pool's event bus.
    pub fn listeners(&self) -> &Arc<Listeners<Vec<Arc<Transaction>>, TransactionEvent>> {
        &self.listeners
    }

    // -- Read access --------------------------------------------------------

    /// Snapshot of the unconfirmed set.
    pub fn all_unconfirmed_transactions(&self) -> Vec<Arc<Transaction>> {
        self.unconfirmed.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Lookup in the unconfirmed set.
    pub fn unconfirmed_transaction(&self, transaction_id: i64) -> Option<Arc<Transaction>> {
        self.unconfirmed
            .get(&transaction_id)
            .map(|t| Arc::clone(&t))
    }

    pub fn unconfirmed_count(&self) -> usize {
        self.unconfirmed.len()
    }

    pub fn double_spending_count(&self) -> usize {
        self.double_spending.len()
    }

    pub fn non_broadcasted_count(&self) -> usize {
        self.non_broadcasted.len()
    }

    /// Whether the replay index holds an entry for this hash.
    pub fn has_transaction_hash(&self, hash: &[u8; 32]) -> bool {
        self.transaction_hashes.contains_key(hash)
    }

    /// The inbound `getUnconfirmedTransactions` response.
    pub fn unconfirmed_transactions_response(&self) -> Value {
        let rendered: Vec<Value> = self
            .all_unconfirmed_transactions()
            .iter()
            .map(|tx| codec::to_json(tx))
            .collect();
        serde_json::json!({ "unconfirmedTransactions": rendered })
    }

    /// Drops every pool index. Used when the chain rescans from scratch.
    pub fn clear(&self) {
        self.unconfirmed.clear();
        self.double_spending.clear();
        self.non_broadcasted.clear();
        self.transaction_hashes.clear();
    }

    // -- Admission ----------------------------------------------------------

    /// Client-originated entry point: runs the shared admission pipeline
    /// with fan-out enabled, then remembers the transaction for
    /// rebroadcast until the network echoes it back, whatever the
    /// admission outcome was.
    pub fn broadcast(&self, transaction: Transaction) {
        let tx = Arc::new(transaction);
        self.process_transactions(vec![Arc::clone(&tx)], true);
        self.non_broadcasted.insert(tx.id(), Arc::clone(&tx));
        debug!(id = %tx.string_id(), "accepted new transaction");
    }

    /// Peer-originated entry point: parses each JSON entry, dropping
    /// malformed or invalid ones with a debug log (silently for types
    /// that are not yet enabled), feeds the batch through admission, and
    /// finally clears every received id from the non-broadcast set: an
    /// echo from the network means the transaction made it out.
    pub fn process_peer_transactions(&self, transactions_data: &[Value], send_to_peers: bool) {
        let height = self.chain.height();
        let mut transactions = Vec::with_capacity(transactions_data.len());
        for tx_data in transactions_data {
            match codec::from_json(tx_data) {
                Ok(tx) => match tx.validate_attachment(height) {
                    Ok(()) => transactions.push(Arc::new(tx)),
                    Err(ValidationError::NotYetEnabled(_)) => {}
                    Err(e) => debug!(error = %e, "dropping invalid transaction"),
                },
                Err(e) => debug!(error = %e, "dropping invalid transaction"),
            }
        }
        let ids: Vec<i64> = transactions.iter().map(|tx| tx.id()).collect();
        self.process_transactions(transactions, send_to_peers);
        for id in ids {
            self.non_broadcasted.remove(&id);
        }
    }

    /// The shared admission pipeline.
    ///
    /// Per transaction: the clock gate runs outside the lock; the
    /// identity, signature, attachment, replay, and balance checks run
    /// under the chain lock; outcomes accumulate outside it. After the
    /// batch, valid transactions that did not originate here are fanned
    /// out in a single request, and the batch events fire.
    pub fn process_transactions(
        &self,
        transactions: Vec<Arc<Transaction>>,
        send_to_peers: bool,
    ) {
        let mut forwarded: Vec<Arc<Transaction>> = Vec::new();
        let mut added_unconfirmed: Vec<Arc<Transaction>> = Vec::new();
        let mut added_double_spending: Vec<Arc<Transaction>> = Vec::new();

        for tx in transactions {
            let current_time = epoch_time();
            if tx.timestamp() > current_time + MAX_TIMESTAMP_DRIFT_SECONDS
                || tx.expiration() < current_time
                || tx.deadline() > MAX_DEADLINE_MINUTES
            {
                continue;
            }

            let double_spending;
            {
                let _chain = self.chain.lock();
                let id = tx.id();

                if self.chain.has_transaction(id)
                    || self.unconfirmed.contains_key(&id)
                    || self.double_spending.contains_key(&id)
                    || !tx.verify()
                {
                    continue;
                }
                if tx.validate_attachment(self.chain.height()).is_err() {
                    continue;
                }
                if self.transaction_hashes.contains_key(tx.hash()) {
                    continue;
                }

                double_spending = !tx.apply_unconfirmed(&self.ledger);

                if double_spending {
                    self.double_spending.insert(id, Arc::clone(&tx));
                } else {
                    if send_to_peers {
                        if self.non_broadcasted.contains_key(&id) {
                            debug!(
                                id = %tx.string_id(),
                                "received back transaction that we generated, will not forward"
                            );
                        } else {
                            forwarded.push(Arc::clone(&tx));
                        }
                    }
                    self.unconfirmed.insert(id, Arc::clone(&tx));
                }
            }

            if double_spending {
                added_double_spending.push(tx);
            } else {
                added_unconfirmed.push(tx);
            }
        }

        if !forwarded.is_empty() {
            self.peers.send_transactions_to_some_peers(&forwarded);
        }
        if !added_unconfirmed.is_empty() {
            self.listeners.notify(
                TransactionEvent::AddedUnconfirmedTransactions,
                &added_unconfirmed,
            );
        }
        if !added_double_spending.is_empty() {
            self.listeners.notify(
                TransactionEvent::AddedDoubleSpendingTransactions,
                &added_double_spending,
            );
        }
    }

    // -- Block hooks ---------------------------------------------------------

    /// Applies a block: ledger effects, per-transaction confirmation,
    /// replay-index insertion, and pruning of hash entries older than the
    /// block's timestamp.
    pub fn apply(&self, block: &Block) {
        let _chain = self.chain.lock();
        self.chain.push_block(block.clone());
        for tx in block.transactions() {
            if !self.unconfirmed.contains_key(&tx.id()) {
                // A forger may include transactions this node never saw
                // in its pool; take their reservation now.
                if !tx.apply_unconfirmed(&self.ledger) {
                    debug!(id = %tx.string_id(), "block transaction without unconfirmed funds");
                }
            }
            tx.apply(&self.ledger);
            self.transaction_hashes
                .insert(*tx.hash(), TransactionHashInfo::of(tx));
        }
        let block_timestamp = block.timestamp();
        self.transaction_hashes
            .retain(|_, info| info.expiration >= block_timestamp);
    }

    /// Undoes a block: removes each transaction's hash entry (only while
    /// it still maps to that transaction's id; a reclaimed entry belongs
    /// to a newer transaction and stays), reinserts the transactions
    /// into the unconfirmed set, and reverses their ledger effects.
    ///
    /// An `UndoNotSupportedError` aborts mid-block; the chain must
    /// rescan rather than roll back.
    pub fn undo(&self, block: &Block) -> Result<(), UndoNotSupportedError> {
        let added: Vec<Arc<Transaction>>;
        {
            let _chain = self.chain.lock();
            self.chain.pop_block();
            let mut reinserted = Vec::with_capacity(block.transactions().len());
            for tx in block.transactions() {
                self.transaction_hashes
                    .remove_if(tx.hash(), |_, info| info.transaction_id == tx.id());
                let tx = Arc::new(tx.clone());
                self.unconfirmed.insert(tx.id(), Arc::clone(&tx));
                tx.undo(&self.ledger)?;
                reinserted.push(tx);
            }
            added = reinserted;
        }
        if !added.is_empty() {
            self.listeners
                .notify(TransactionEvent::AddedUnconfirmedTransactions, &added);
        }
        Ok(())
    }

    /// Probes a candidate block's transactions against the replay index
    /// with put-if-absent semantics. The first collision marks the block
    /// invalid and is returned, except at the grandfathered height where
    /// collisions are ignored. On a duplicate, entries inserted for the
    /// block's other transactions are backed out.
    pub fn check_transaction_hashes(&self, block: &Block) -> Option<Transaction> {
        let _chain = self.chain.lock();
        let mut duplicate: Option<Transaction> = None;
        for tx in block.transactions() {
            let collided = {
                match self.transaction_hashes.entry(*tx.hash()) {
                    dashmap::mapref::entry::Entry::Occupied(_) => true,
                    dashmap::mapref::entry::Entry::Vacant(vacant) => {
                        vacant.insert(TransactionHashInfo::of(tx));
                        false
                    }
                }
            };
            if collided && block.height() != GRANDFATHERED_COLLISION_HEIGHT {
                duplicate = Some(tx.clone());
                break;
            }
        }

        if let Some(duplicate) = &duplicate {
            for tx in block.transactions() {
                if tx != duplicate {
                    self.transaction_hashes
                        .remove_if(tx.hash(), |_, info| info.transaction_id == tx.id());
                }
            }
        }
        duplicate
    }

    /// Removes a freshly applied block's transactions from the
    /// unconfirmed set and emits the removed/confirmed batch events.
    pub fn update_unconfirmed_transactions(&self, block: &Block) {
        let mut added_confirmed = Vec::with_capacity(block.transactions().len());
        let mut removed_unconfirmed = Vec::new();

        {
            let _chain = self.chain.lock();
            for tx in block.transactions() {
                added_confirmed.push(Arc::new(tx.clone()));
                if let Some((_, removed)) = self.unconfirmed.remove(&tx.id()) {
                    removed_unconfirmed.push(removed);
                }
                // TODO: also clear confirmed ids out of double_spending;
                // entries for confirmed transactions linger until restart.
            }
        }

        if !removed_unconfirmed.is_empty() {
            self.listeners.notify(
                TransactionEvent::RemovedUnconfirmedTransactions,
                &removed_unconfirmed,
            );
        }
        if !added_confirmed.is_empty() {
            self.listeners.notify(
                TransactionEvent::AddedConfirmedTransactions,
                &added_confirmed,
            );
        }
    }

    // -- Maintenance workers -------------------------------------------------

    /// Registers the expiration sweep, rebroadcast, and pull workers.
    pub fn spawn_workers(self: &Arc<Self>, scheduler: &Scheduler) {
        let pool = Arc::clone(self);
        scheduler.schedule(
            "pool-expire",
            Duration::from_secs(1),
            Box::new(move || {
                pool.remove_expired_unconfirmed();
                Ok(())
            }),
        );

        let pool = Arc::clone(self);
        scheduler.schedule(
            "pool-rebroadcast",
            Duration::from_secs(60),
            Box::new(move || {
                pool.rebroadcast_pending();
                Ok(())
            }),
        );

        let pool = Arc::clone(self);
        scheduler.schedule(
            "pool-pull",
            Duration::from_secs(5),
            Box::new(move || {
                pool.pull_unconfirmed_from_peer();
                Ok(())
            }),
        );
    }

    /// Expiration sweep: under the chain lock, drops unconfirmed
    /// transactions that expired or stopped validating (the chain may
    /// have moved under them), releasing their balance reservations.
    pub fn remove_expired_unconfirmed(&self) {
        let current_time = epoch_time();
        let mut removed: Vec<Arc<Transaction>> = Vec::new();
        {
            let _chain = self.chain.lock();
            let height = self.chain.height();
            let candidates: Vec<Arc<Transaction>> = self
                .unconfirmed
                .iter()
                .map(|r| Arc::clone(r.value()))
                .collect();
            for tx in candidates {
                let invalid = tx.validate_attachment(height).is_err();
                if tx.expiration() < current_time || invalid {
                    if self.unconfirmed.remove(&tx.id()).is_some() {
                        tx.undo_unconfirmed(&self.ledger);
                        removed.push(tx);
                    }
                }
            }
        }
        if !removed.is_empty() {
            self.listeners
                .notify(TransactionEvent::RemovedUnconfirmedTransactions, &removed);
        }
    }

    /// Rebroadcast: drops non-broadcast entries that confirmed, expired,
    /// or stopped validating; resends the rest once they are older than
    /// 30 seconds, giving the normal gossip path a head start.
    pub fn rebroadcast_pending(&self) {
        let current_time = epoch_time();
        let height = self.chain.height();
        let mut to_send: Vec<Arc<Transaction>> = Vec::new();

        let entries: Vec<Arc<Transaction>> = self
            .non_broadcasted
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        for tx in entries {
            let invalid = tx.validate_attachment(height).is_err();
            if self.chain.has_transaction(tx.id()) || tx.expiration() < current_time || invalid {
                self.non_broadcasted.remove(&tx.id());
            } else if tx.timestamp() < current_time.saturating_sub(30) {
                to_send.push(tx);
            }
        }

        if !to_send.is_empty() {
            self.peers.send_transactions_to_some_peers(&to_send);
        }
    }

    /// Pull: asks one weighted-selected connected peer for its
    /// unconfirmed set and feeds it through admission without forwarding.
    pub fn pull_unconfirmed_from_peer(&self) {
        use crate::network::peer::PeerState;

        let Some(peer) = self.peers.get_any_peer(PeerState::Connected, true) else {
            return;
        };
        let Some(response) = peer.send(&protocol::get_unconfirmed_transactions_request()) else {
            return;
        };
        let Some(transactions) = response
            .get("unconfirmedTransactions")
            .and_then(Value::as_array)
        else {
            return;
        };
        if transactions.is_empty() {
            return;
        }
        self.process_peer_transactions(transactions, false);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NhzKeypair;
    use crate::network::peers::PeersConfig;
    use crate::transaction::TransactionBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        pool: Arc<TransactionPool>,
        ledger: Arc<Ledger>,
        chain: Arc<Blockchain>,
        keypair: NhzKeypair,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(Ledger::new());
        let chain = Arc::new(Blockchain::new());
        let peers = Peers::new(PeersConfig::default(), Arc::clone(&ledger)).expect("config");
        let pool = TransactionPool::new(Arc::clone(&chain), Arc::clone(&ledger), peers);
        Fixture {
            pool,
            ledger,
            chain,
            keypair: NhzKeypair::generate(),
        }
    }

    impl Fixture {
        fn fund_sender(&self, atomic_units: i64) -> i64 {
            let account = self
                .ledger
                .associate_public_key(&self.keypair.public_key());
            self.ledger
                .add_to_balance_and_unconfirmed(account, atomic_units);
            account
        }

        fn payment(&self, amount: i64, fee: i64, timestamp: u32) -> Arc<Transaction> {
            Arc::new(
                TransactionBuilder::new(1440, amount, fee)
                    .recipient(4242)
                    .timestamp(timestamp)
                    .sign(&self.keypair)
                    .expect("valid"),
            )
        }

        fn event_counter(&self, event: TransactionEvent) -> Arc<AtomicUsize> {
            let count = Arc::new(AtomicUsize::new(0));
            let c = Arc::clone(&count);
            self.pool.listeners().add_listener(
                event,
                Box::new(move |batch| {
                    c.fetch_add(batch.len(), Ordering::SeqCst);
                }),
            );
            count
        }
    }

    // -- Admission ----------------------------------------------------------

    #[test]
    fn admits_valid_transaction() {
        let f = fixture();
        f.fund_sender(1000);
        let added = f.event_counter(TransactionEvent::AddedUnconfirmedTransactions);

        let tx = f.payment(100, 1, epoch_time());
        f.pool.process_transactions(vec![Arc::clone(&tx)], false);

        assert_eq!(f.pool.unconfirmed_count(), 1);
        assert!(f.pool.unconfirmed_transaction(tx.id()).is_some());
        assert_eq!(added.load(Ordering::SeqCst), 1);
        // The sender's reservation is in place.
        assert_eq!(f.ledger.unconfirmed_balance(tx.sender_id()), 899);
    }

    #[test]
    fn clock_gate_drops_future_and_expired() {
        let f = fixture();
        f.fund_sender(1000);
        let added = f.event_counter(TransactionEvent::AddedUnconfirmedTransactions);
        let now = epoch_time();

        // Too far in the future.
        let future = f.payment(100, 1, now + MAX_TIMESTAMP_DRIFT_SECONDS + 10);
        // Already expired: deadline 1 minute, issued long ago.
        let expired = Arc::new(
            TransactionBuilder::new(1, 100, 1)
                .recipient(4242)
                .timestamp(now - 600)
                .sign(&f.keypair)
                .unwrap(),
        );
        // Deadline over the protocol maximum.
        let overlong = Arc::new(
            TransactionBuilder::new(MAX_DEADLINE_MINUTES + 1, 100, 1)
                .recipient(4242)
                .timestamp(now)
                .sign(&f.keypair)
                .unwrap(),
        );

        f.pool
            .process_transactions(vec![future, expired, overlong], false);
        assert_eq!(f.pool.unconfirmed_count(), 0);
        assert_eq!(added.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn replay_by_id_is_silent() {
        let f = fixture();
        f.fund_sender(1000);
        let added = f.event_counter(TransactionEvent::AddedUnconfirmedTransactions);
        let doubled = f.event_counter(TransactionEvent::AddedDoubleSpendingTransactions);

        let tx = f.payment(100, 1, epoch_time());
        f.pool.process_transactions(vec![Arc::clone(&tx)], false);
        // The same signed bytes again: dropped without any event.
        f.pool.process_transactions(vec![Arc::clone(&tx)], false);

        assert_eq!(f.pool.unconfirmed_count(), 1);
        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert_eq!(doubled.load(Ordering::SeqCst), 0);
        // And the reservation happened exactly once.
        assert_eq!(f.ledger.unconfirmed_balance(tx.sender_id()), 899);
    }

    #[test]
    fn replay_by_hash_is_silent() {
        let f = fixture();
        f.fund_sender(1000);
        let added = f.event_counter(TransactionEvent::AddedUnconfirmedTransactions);
        let doubled = f.event_counter(TransactionEvent::AddedDoubleSpendingTransactions);

        let tx = f.payment(100, 1, epoch_time());
        // A candidate block probe leaves the hash in the replay index.
        let block = Block::new(1, epoch_time(), vec![(*tx).clone()]);
        assert!(f.pool.check_transaction_hashes(&block).is_none());
        assert!(f.pool.has_transaction_hash(tx.hash()));

        f.pool.process_transactions(vec![tx], false);
        assert_eq!(f.pool.unconfirmed_count(), 0);
        assert_eq!(added.load(Ordering::SeqCst), 0);
        assert_eq!(doubled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn double_spend_goes_to_the_double_spending_set() {
        let f = fixture();
        // Balance 100: the first 80+1 fits, the second does not.
        f.fund_sender(100);
        let added = f.event_counter(TransactionEvent::AddedUnconfirmedTransactions);
        let doubled = f.event_counter(TransactionEvent::AddedDoubleSpendingTransactions);
        let now = epoch_time();

        let a = f.payment(80, 1, now);
        let b = f.payment(80, 1, now - 1); // distinct bytes, same sender
        f.pool
            .process_transactions(vec![Arc::clone(&a), Arc::clone(&b)], false);

        assert_eq!(f.pool.unconfirmed_count(), 1);
        assert!(f.pool.unconfirmed_transaction(a.id()).is_some());
        assert_eq!(f.pool.double_spending_count(), 1);
        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert_eq!(doubled.load(Ordering::SeqCst), 1);
        // Only the admitted transaction holds a reservation.
        assert_eq!(f.ledger.unconfirmed_balance(a.sender_id()), 19);
    }

    #[test]
    fn invalid_signature_is_dropped() {
        let f = fixture();
        f.fund_sender(1000);

        let good = f.payment(100, 1, epoch_time());
        // Re-assemble with a corrupted signature.
        let mut signature = *good.signature();
        signature[0] ^= 0xFF;
        let bad = Arc::new(
            Transaction::new(
                good.transaction_type(),
                good.timestamp(),
                good.deadline(),
                *good.sender_public_key(),
                good.recipient_id(),
                good.amount(),
                good.fee(),
                None,
                signature,
                good.attachment().clone(),
            )
            .unwrap(),
        );

        f.pool.process_transactions(vec![bad], false);
        assert_eq!(f.pool.unconfirmed_count(), 0);
    }

    // -- Peer entry point ----------------------------------------------------

    #[test]
    fn peer_batch_parses_and_drops_garbage() {
        let f = fixture();
        f.fund_sender(1000);

        let tx = f.payment(100, 1, epoch_time());
        let batch = vec![
            codec::to_json(&tx),
            serde_json::json!({ "nonsense": true }),
            serde_json::json!(42),
        ];
        f.pool.process_peer_transactions(&batch, false);

        assert_eq!(f.pool.unconfirmed_count(), 1);
    }

    #[test]
    fn network_echo_clears_non_broadcasted() {
        let f = fixture();
        f.fund_sender(1000);

        let tx = f.payment(100, 1, epoch_time());
        f.pool.broadcast((*tx).clone());
        assert_eq!(f.pool.non_broadcasted_count(), 1);
        assert_eq!(f.pool.unconfirmed_count(), 1);

        // The network echoes the transaction back.
        f.pool
            .process_peer_transactions(&[codec::to_json(&tx)], true);
        assert_eq!(f.pool.non_broadcasted_count(), 0);
        // Still admitted exactly once.
        assert_eq!(f.pool.unconfirmed_count(), 1);
    }

    #[test]
    fn broadcast_remembers_even_rejected_transactions() {
        let f = fixture();
        // No funds: admission marks it double-spending.
        let tx = f.payment(100, 1, epoch_time());
        f.pool.broadcast((*tx).clone());

        assert_eq!(f.pool.double_spending_count(), 1);
        // Still queued for rebroadcast until it expires or confirms.
        assert_eq!(f.pool.non_broadcasted_count(), 1);
    }

    // -- Block hooks ---------------------------------------------------------

    #[test]
    fn apply_then_undo_restores_pool_and_balances() {
        let f = fixture();
        let sender = f.fund_sender(1000);
        let now = epoch_time();

        let a = f.payment(100, 1, now);
        let b = f.payment(200, 1, now - 1);
        let c = f.payment(300, 1, now - 2);
        f.pool.process_transactions(
            vec![Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)],
            false,
        );
        assert_eq!(f.pool.unconfirmed_count(), 3);
        let reserved_balance = f.ledger.unconfirmed_balance(sender);

        let block = Block::new(1, now, vec![(*a).clone(), (*b).clone()]);
        f.pool.apply(&block);
        f.pool.update_unconfirmed_transactions(&block);

        assert_eq!(f.pool.unconfirmed_count(), 1);
        assert!(f.pool.unconfirmed_transaction(c.id()).is_some());
        assert!(f.chain.has_transaction(a.id()));
        assert!(f.chain.has_transaction(b.id()));
        assert!(f.pool.has_transaction_hash(a.hash()));
        assert!(f.pool.has_transaction_hash(b.hash()));
        assert_eq!(f.ledger.balance(sender), 1000 - 101 - 201);
        assert_eq!(f.ledger.balance(4242), 300);

        f.pool.undo(&block).expect("payments undo cleanly");

        assert_eq!(f.pool.unconfirmed_count(), 3);
        assert!(!f.pool.has_transaction_hash(a.hash()));
        assert!(!f.pool.has_transaction_hash(b.hash()));
        assert!(!f.chain.has_transaction(a.id()));
        assert_eq!(f.ledger.balance(sender), 1000);
        assert_eq!(f.ledger.balance(4242), 0);
        assert_eq!(f.ledger.unconfirmed_balance(sender), reserved_balance);
    }

    #[test]
    fn apply_purges_expired_hash_entries() {
        let f = fixture();
        f.fund_sender(1000);
        let now = epoch_time();

        // Confirm one transaction; its hash enters the index with its
        // expiration as the eviction basis.
        let short_lived = Arc::new(
            TransactionBuilder::new(1, 100, 1)
                .recipient(4242)
                .timestamp(now)
                .sign(&f.keypair)
                .unwrap(),
        );
        let first = Block::new(1, now, vec![(*short_lived).clone()]);
        f.pool.apply(&first);
        assert!(f.pool.has_transaction_hash(short_lived.hash()));

        // A much later block sweeps the expired entry.
        let later = Block::new(2, short_lived.expiration() + 1, vec![]);
        f.pool.apply(&later);
        assert!(!f.pool.has_transaction_hash(short_lived.hash()));
    }

    #[test]
    fn grandfathered_height_ignores_collisions() {
        let f = fixture();
        f.fund_sender(1000);
        let now = epoch_time();

        let a = f.payment(100, 1, now);
        let b = f.payment(200, 1, now - 1);

        // The same transaction twice: guaranteed hash collision.
        let colliding = vec![(*a).clone(), (*b).clone(), (*a).clone()];

        // At the grandfathered height the collision is ignored.
        let grandfathered = Block::new(GRANDFATHERED_COLLISION_HEIGHT, now, colliding.clone());
        assert!(f.pool.check_transaction_hashes(&grandfathered).is_none());
        assert!(f.pool.has_transaction_hash(a.hash()));
        assert!(f.pool.has_transaction_hash(b.hash()));

        f.pool.clear();

        // Anywhere else the duplicate is reported and the entries
        // inserted for the block's other transactions are backed out.
        let ordinary = Block::new(58_295, now, colliding);
        let duplicate = f.pool.check_transaction_hashes(&ordinary).expect("duplicate");
        assert_eq!(duplicate.id(), a.id());
        assert!(!f.pool.has_transaction_hash(b.hash()));
    }

    // -- Maintenance ---------------------------------------------------------

    #[test]
    fn expiration_sweep_restores_reservations() {
        let f = fixture();
        let sender = f.fund_sender(1000);
        let removed = f.event_counter(TransactionEvent::RemovedUnconfirmedTransactions);
        let now = epoch_time();

        // Expires roughly five seconds from now.
        let tx = Arc::new(
            TransactionBuilder::new(1, 100, 1)
                .recipient(4242)
                .timestamp(now - 55)
                .sign(&f.keypair)
                .unwrap(),
        );
        f.pool.process_transactions(vec![Arc::clone(&tx)], false);
        assert_eq!(f.pool.unconfirmed_count(), 1);
        assert_eq!(f.ledger.unconfirmed_balance(sender), 899);

        // Not yet expired: the sweep leaves it alone.
        f.pool.remove_expired_unconfirmed();
        assert_eq!(f.pool.unconfirmed_count(), 1);

        std::thread::sleep(Duration::from_secs(6));
        f.pool.remove_expired_unconfirmed();

        assert_eq!(f.pool.unconfirmed_count(), 0);
        assert_eq!(f.ledger.unconfirmed_balance(sender), 1000);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rebroadcast_drops_confirmed_and_expired() {
        let f = fixture();
        f.fund_sender(1000);
        let now = epoch_time();

        let tx = f.payment(100, 1, now - 31);
        f.pool.broadcast((*tx).clone());
        assert_eq!(f.pool.non_broadcasted_count(), 1);

        // Old enough to resend; with no peers this is a no-op walk, and
        // the entry persists for the next round.
        f.pool.rebroadcast_pending();
        assert_eq!(f.pool.non_broadcasted_count(), 1);

        // Once the chain confirms it, rebroadcast lets it go.
        f.chain
            .push_block(Block::new(1, now, vec![(*tx).clone()]));
        f.pool.rebroadcast_pending();
        assert_eq!(f.pool.non_broadcasted_count(), 0);
    }

    #[test]
    fn clear_empties_every_index() {
        let f = fixture();
        f.fund_sender(1000);
        let tx = f.payment(100, 1, epoch_time());
        f.pool.broadcast((*tx).clone());
        f.pool
            .check_transaction_hashes(&Block::new(1, epoch_time(), vec![(*tx).clone()]));

        f.pool.clear();
        assert_eq!(f.pool.unconfirmed_count(), 0);
        assert_eq!(f.pool.non_broadcasted_count(), 0);
        assert_eq!(f.pool.double_spending_count(), 0);
        assert!(!f.pool.has_transaction_hash(tx.hash()));
    }
}
