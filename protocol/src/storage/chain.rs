//! # Chain Store & Chain Lock
//!
//! The canonical chain as the core consumes it: confirmed-transaction
//! lookup, current height, last block timestamp, and the process-wide
//! chain mutex.
//!
//! The chain lock is the single serialization point between the
//! transaction pool and block processing. Admission must not observe a
//! chain that changes between its "already confirmed?" lookup and its
//! pool insertion, and block apply/undo must not interleave with either.
//! Every pool mutation path acquires this lock; block processing runs its
//! pool hooks while holding it. It is an explicit mutex field rather than
//! an ambient monitor so the coupling is visible at call sites.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::storage::Block;
use crate::transaction::Transaction;

/// The canonical chain view.
pub struct Blockchain {
    chain_lock: Mutex<()>,
    blocks: RwLock<Vec<Block>>,
    confirmed: DashMap<i64, Arc<Transaction>>,
}

impl Blockchain {
    /// Creates a chain holding only the (empty) genesis block.
    pub fn new() -> Self {
        Self {
            chain_lock: Mutex::new(()),
            blocks: RwLock::new(vec![Block::new(0, 0, Vec::new())]),
            confirmed: DashMap::new(),
        }
    }

    /// Acquires the chain-wide lock. Hold the guard for the whole
    /// check-then-mutate sequence; see the module docs.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.chain_lock.lock()
    }

    /// Height of the last block.
    pub fn height(&self) -> u32 {
        self.blocks.read().last().map(Block::height).unwrap_or(0)
    }

    /// Timestamp of the last block, epoch seconds.
    pub fn last_block_timestamp(&self) -> u32 {
        self.blocks.read().last().map(Block::timestamp).unwrap_or(0)
    }

    /// Whether a transaction with this id is confirmed.
    pub fn has_transaction(&self, transaction_id: i64) -> bool {
        self.confirmed.contains_key(&transaction_id)
    }

    /// The confirmed transaction with this id, if any.
    pub fn transaction(&self, transaction_id: i64) -> Option<Arc<Transaction>> {
        self.confirmed.get(&transaction_id).map(|t| Arc::clone(&t))
    }

    /// Number of confirmed transactions.
    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    /// Appends a block and records its transactions as confirmed.
    /// Callers hold the chain lock.
    pub fn push_block(&self, block: Block) {
        for tx in block.transactions() {
            self.confirmed.insert(tx.id(), Arc::new(tx.clone()));
        }
        self.blocks.write().push(block);
    }

    /// Removes the last block, un-confirming its transactions. The
    /// genesis block is never popped. Callers hold the chain lock.
    pub fn pop_block(&self) -> Option<Block> {
        let mut blocks = self.blocks.write();
        if blocks.len() <= 1 {
            return None;
        }
        let block = blocks.pop()?;
        for tx in block.transactions() {
            self.confirmed.remove(&tx.id());
        }
        Some(block)
    }

    /// The last block.
    pub fn last_block(&self) -> Block {
        self.blocks
            .read()
            .last()
            .cloned()
            .unwrap_or_else(|| Block::new(0, 0, Vec::new()))
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NhzKeypair;
    use crate::transaction::TransactionBuilder;

    fn make_tx(keypair: &NhzKeypair, amount: i64) -> Transaction {
        TransactionBuilder::new(1440, amount, 1)
            .recipient(9)
            .timestamp(500)
            .sign(keypair)
            .unwrap()
    }

    #[test]
    fn starts_at_genesis() {
        let chain = Blockchain::new();
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.last_block_timestamp(), 0);
        assert_eq!(chain.confirmed_count(), 0);
    }

    #[test]
    fn push_confirms_transactions() {
        let kp = NhzKeypair::generate();
        let chain = Blockchain::new();
        let tx = make_tx(&kp, 10);
        let id = tx.id();

        chain.push_block(Block::new(1, 60, vec![tx]));
        assert_eq!(chain.height(), 1);
        assert!(chain.has_transaction(id));
        assert_eq!(chain.transaction(id).unwrap().id(), id);
    }

    #[test]
    fn pop_unconfirms_transactions() {
        let kp = NhzKeypair::generate();
        let chain = Blockchain::new();
        let tx = make_tx(&kp, 10);
        let id = tx.id();

        chain.push_block(Block::new(1, 60, vec![tx]));
        let popped = chain.pop_block().expect("one block above genesis");
        assert_eq!(popped.height(), 1);
        assert!(!chain.has_transaction(id));
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn genesis_is_never_popped() {
        let chain = Blockchain::new();
        assert!(chain.pop_block().is_none());
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn lock_serializes_mutation() {
        let chain = Arc::new(Blockchain::new());
        let kp = NhzKeypair::generate();

        let mut handles = vec![];
        for i in 1..=4u32 {
            let chain = Arc::clone(&chain);
            let tx = make_tx(&kp, i64::from(i));
            handles.push(std::thread::spawn(move || {
                let _guard = chain.lock();
                let height = chain.height() + 1;
                chain.push_block(Block::new(height, height * 60, vec![tx]));
            }));
        }
        for h in handles {
            h.join().expect("thread panicked");
        }

        // Heights are consecutive because each push ran under the lock.
        assert_eq!(chain.height(), 4);
        assert_eq!(chain.confirmed_count(), 4);
    }
}
