//! # Node Root
//!
//! The top-level value that owns the core's components and wires them
//! together: ledger, chain store, peer registry, transaction pool, and
//! the worker scheduler. The binary constructs one of these, registers
//! its listener hooks, and calls [`NhzNode::start`] once the inbound
//! server is bound.
//!
//! Inbound peer requests funnel through [`NhzNode::handle_peer_request`],
//! which dispatches on the `requestType` field the way the peer servlet
//! does on the wire.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::account::Ledger;
use crate::network::peers::{ConfigError, Peers, PeersConfig};
use crate::network::pool::TransactionPool;
use crate::network::protocol::REQUEST_TYPE;
use crate::scheduler::{Scheduler, WorkerResult};
use crate::storage::{Block, Blockchain};
use crate::transaction::Transaction;

/// The assembled node core.
pub struct NhzNode {
    ledger: Arc<Ledger>,
    chain: Arc<Blockchain>,
    peers: Arc<Peers>,
    pool: Arc<TransactionPool>,
    scheduler: Scheduler,
}

impl NhzNode {
    /// Builds and wires every component. Workers are registered but do
    /// not run until [`start`](Self::start).
    pub fn new(config: PeersConfig) -> Result<Self, ConfigError> {
        let ledger = Arc::new(Ledger::new());
        let chain = Arc::new(Blockchain::new());
        let peers = Peers::new(config, Arc::clone(&ledger))?;
        let pool = TransactionPool::new(Arc::clone(&chain), Arc::clone(&ledger), Arc::clone(&peers));

        let scheduler = Scheduler::new();
        peers.spawn_workers(&scheduler);
        pool.spawn_workers(&scheduler);

        Ok(Self {
            ledger,
            chain,
            peers,
            pool,
            scheduler,
        })
    }

    // -- Component access ----------------------------------------------------

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    pub fn peers(&self) -> &Arc<Peers> {
        &self.peers
    }

    pub fn pool(&self) -> &Arc<TransactionPool> {
        &self.pool
    }

    /// The scheduler, exposed so the embedding binary can add
    /// `before_start` hooks (e.g. binding the inbound listener).
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Runs `before_start` hooks and starts every registered worker.
    pub fn start(&self) -> WorkerResult {
        self.scheduler.start()?;
        info!("node core started");
        Ok(())
    }

    /// Cooperative shutdown: stops workers, then drains the send pool.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.peers.shutdown();
        info!("node core stopped");
    }

    // -- Client entry point --------------------------------------------------

    /// Submits a locally originated transaction: admission plus fan-out,
    /// and rebroadcast tracking until the network echoes it back.
    pub fn broadcast_transaction(&self, transaction: Transaction) {
        self.pool.broadcast(transaction);
    }

    // -- Inbound peer requests -----------------------------------------------

    /// Dispatches one inbound peer request and returns the response
    /// object. Unknown request types answer with an error object rather
    /// than failing the connection.
    pub fn handle_peer_request(&self, remote_address: &str, request: &Value) -> Value {
        match request.get(REQUEST_TYPE).and_then(Value::as_str) {
            Some("getInfo") => self.peers.process_get_info(remote_address, request),
            Some("getPeers") => self.peers.get_peers_response(),
            Some("getUnconfirmedTransactions") => self.pool.unconfirmed_transactions_response(),
            Some("processTransactions") => {
                match request.get("transactions").and_then(Value::as_array) {
                    Some(transactions) => {
                        self.pool.process_peer_transactions(transactions, true);
                        json!({})
                    }
                    None => json!({ "error": "missing transactions" }),
                }
            }
            Some("processBlock") => self.process_peer_block(remote_address, request),
            _ => json!({ "error": "unsupported request type" }),
        }
    }

    /// Handles an inbound candidate block: replay-hash probe, then the
    /// apply hooks. A malformed block is a protocol violation and
    /// blacklists the sender.
    fn process_peer_block(&self, remote_address: &str, request: &Value) -> Value {
        let block = match Block::from_json(request) {
            Ok(block) => block,
            Err(e) => {
                debug!(remote = remote_address, error = %e, "malformed block");
                if let Some(peer) = self.peers.get_peer(remote_address) {
                    peer.blacklist();
                }
                return json!({ "accepted": false, "error": "malformed block" });
            }
        };

        if block.height() != self.chain.height() + 1 {
            return json!({ "accepted": false });
        }

        if let Some(duplicate) = self.pool.check_transaction_hashes(&block) {
            debug!(
                id = %duplicate.string_id(),
                height = block.height(),
                "duplicate transaction hash in block"
            );
            return json!({ "accepted": false, "error": "duplicate transaction hash" });
        }

        self.pool.apply(&block);
        self.pool.update_unconfirmed_transactions(&block);
        json!({ "accepted": true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NhzKeypair;
    use crate::epoch::epoch_time;
    use crate::transaction::{codec, TransactionBuilder};

    fn node() -> NhzNode {
        NhzNode::new(PeersConfig::default()).expect("default config is valid")
    }

    fn funded_payment(node: &NhzNode, keypair: &NhzKeypair, amount: i64) -> Transaction {
        let account = node.ledger().associate_public_key(&keypair.public_key());
        node.ledger()
            .add_to_balance_and_unconfirmed(account, amount * 10);
        TransactionBuilder::new(1440, amount, 1)
            .recipient(777)
            .timestamp(epoch_time())
            .sign(keypair)
            .expect("valid")
    }

    #[test]
    fn unknown_request_type_errors() {
        let node = node();
        let response = node.handle_peer_request("192.0.2.1", &json!({ "requestType": "mystery" }));
        assert!(response.get("error").is_some());

        let response = node.handle_peer_request("192.0.2.1", &json!({}));
        assert!(response.get("error").is_some());
    }

    #[test]
    fn get_info_answers_identity() {
        let node = node();
        let response = node.handle_peer_request(
            "192.0.2.2",
            &json!({ "requestType": "getInfo", "application": "Nhz" }),
        );
        assert_eq!(response.get("application"), Some(&json!("Nhz")));
        assert!(node.peers().get_peer("192.0.2.2").is_some());
    }

    #[test]
    fn process_transactions_admits_batch() {
        let node = node();
        let kp = NhzKeypair::generate();
        let tx = funded_payment(&node, &kp, 100);

        let response = node.handle_peer_request(
            "192.0.2.3",
            &json!({
                "requestType": "processTransactions",
                "transactions": [codec::to_json(&tx)],
            }),
        );
        assert!(response.get("error").is_none());
        assert_eq!(node.pool().unconfirmed_count(), 1);

        let listed = node.handle_peer_request(
            "192.0.2.3",
            &json!({ "requestType": "getUnconfirmedTransactions" }),
        );
        assert_eq!(
            listed["unconfirmedTransactions"].as_array().unwrap().len(),
            1
        );
    }

    #[test]
    fn process_block_applies_and_confirms() {
        let node = node();
        let kp = NhzKeypair::generate();
        let tx = funded_payment(&node, &kp, 100);
        let block = Block::new(1, epoch_time(), vec![tx.clone()]);

        let mut request = block.to_json();
        request
            .as_object_mut()
            .unwrap()
            .insert("requestType".into(), json!("processBlock"));

        let response = node.handle_peer_request("192.0.2.4", &request);
        assert_eq!(response.get("accepted"), Some(&json!(true)));
        assert!(node.chain().has_transaction(tx.id()));

        // The same block again is not the next height anymore.
        let response = node.handle_peer_request("192.0.2.4", &request);
        assert_eq!(response.get("accepted"), Some(&json!(false)));
    }

    #[test]
    fn malformed_block_blacklists_known_sender() {
        let node = node();
        let peer = node.peers().add_peer("192.0.2.5").expect("admitted");

        let response = node.handle_peer_request(
            "192.0.2.5",
            &json!({ "requestType": "processBlock", "height": 1 }),
        );
        assert_eq!(response.get("accepted"), Some(&json!(false)));
        assert!(peer.is_blacklisted());
    }

    #[test]
    fn start_and_shutdown_cycle() {
        let node = node();
        node.start().expect("start");
        assert!(node.scheduler().is_started());
        node.shutdown();
    }
}
